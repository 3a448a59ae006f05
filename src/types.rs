//! Type-safe configuration types for tri-install
//!
//! Closed sets of options are Rust enums instead of strings so that typos in a
//! plan file fail at load time and every consumer matches exhaustively.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Partition install type as understood by the installation engine.
///
/// The `.eli` variants are GELI-encrypted and require a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum InstallType {
    #[default]
    #[strum(serialize = "ZFS")]
    #[serde(rename = "ZFS")]
    Zfs,
    #[strum(serialize = "ZFS.eli")]
    #[serde(rename = "ZFS.eli")]
    ZfsEli,
    #[strum(serialize = "UFS")]
    #[serde(rename = "UFS")]
    Ufs,
    #[strum(serialize = "UFS.eli")]
    #[serde(rename = "UFS.eli")]
    UfsEli,
    #[strum(serialize = "SWAP")]
    #[serde(rename = "SWAP")]
    Swap,
    #[strum(serialize = "SWAP.eli")]
    #[serde(rename = "SWAP.eli")]
    SwapEli,
}

impl InstallType {
    /// Check if this partition is GELI-encrypted
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::ZfsEli | Self::UfsEli | Self::SwapEli)
    }

    /// Check if this partition becomes (part of) a ZFS pool
    pub fn is_zfs(self) -> bool {
        matches!(self, Self::Zfs | Self::ZfsEli)
    }

    /// Check if this partition is swap space
    pub fn is_swap(self) -> bool {
        matches!(self, Self::Swap | Self::SwapEli)
    }
}

/// Region of a device that the installation may use.
///
/// Serialized as `all`, `free`, or the slice name (`s1`, `p2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InstallRegion {
    /// Wipe the device and write a fresh partition table
    #[default]
    WholeDisk,
    /// Only use unpartitioned space next to existing partitions
    FreeSpace,
    /// Replace the contents of one existing slice
    Slice(String),
}

impl InstallRegion {
    /// Value of the engine's `partition=` key
    pub fn engine_value(&self) -> &str {
        match self {
            Self::WholeDisk => "ALL",
            Self::FreeSpace => "free",
            Self::Slice(name) => name,
        }
    }
}

impl fmt::Display for InstallRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WholeDisk => write!(f, "all"),
            Self::FreeSpace => write!(f, "free"),
            Self::Slice(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for InstallRegion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::WholeDisk),
            "free" => Ok(Self::FreeSpace),
            _ if is_slice_name(s) => Ok(Self::Slice(s.to_string())),
            _ => Err(format!(
                "Invalid install region '{}' (expected all, free, sN or pN)",
                s
            )),
        }
    }
}

impl TryFrom<String> for InstallRegion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstallRegion> for String {
    fn from(region: InstallRegion) -> Self {
        region.to_string()
    }
}

/// MBR slices are `s1`..`s4`, GPT partitions are `p1`, `p2`, ...
fn is_slice_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some('s') | Some('p'))
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

/// Partition table found on (or written to) a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum PartitionTable {
    #[default]
    #[strum(serialize = "GPT")]
    #[serde(rename = "GPT")]
    Gpt,
    #[strum(serialize = "MBR")]
    #[serde(rename = "MBR")]
    Mbr,
    /// Blank device
    #[strum(serialize = "none")]
    #[serde(rename = "none")]
    None,
}

/// System boot loader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BootLoader {
    /// The stock FreeBSD loader
    #[default]
    Bsd,
    /// rEFInd boot manager (UEFI only)
    Refind,
}

/// Firmware mode the host booted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum FirmwareMode {
    #[strum(serialize = "UEFI")]
    #[serde(rename = "UEFI")]
    Uefi,
    #[default]
    #[strum(serialize = "BIOS")]
    #[serde(rename = "BIOS")]
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

/// Rendering mode of the config compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CompileMode {
    /// Everything, secrets included; the only text the engine may execute
    Full,
    /// Secrets redacted, for review before installing
    Summary,
}
