//! Engine modules — the "brain" that turns an install plan into engine input.
//!
//! The engine layer sits between the plan (what the caller wants) and the
//! supervisor (what actually runs). Both stages are pure: the planner checks the
//! plan against a hardware snapshot, the compiler renders the result as text.
//!
//! # Modules
//!
//! - `storage` — Disk planner: validation, layout resolution, pool naming
//! - `compiler` — Config compiler: `full` and redacted `summary` output

pub mod compiler;
pub mod storage;
