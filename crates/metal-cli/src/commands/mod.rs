//! CLI subcommands.

pub mod up;
pub mod whoami;
