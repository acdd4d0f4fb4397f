//! Flow orchestration behind the `wmdeploy` subcommands.

pub mod install;
pub mod report;
pub mod status;
pub mod uninstall;
