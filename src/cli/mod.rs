//! CLI subcommand implementations for the reelgrab binary.

pub mod doctor;
pub mod run_cmd;
