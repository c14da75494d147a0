//! CLI commands.

pub mod copy;
pub mod download;
pub mod sas;
pub mod upload;
