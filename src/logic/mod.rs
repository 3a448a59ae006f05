//! Logic modules — translates high-level user choices into concrete lists.
//!
//! # Modules
//!
//! - `packages` — Package catalog tree, selection flattening, shell defaults

pub mod packages;
