//! `webmonitor_deploy`: provisioning and teardown of the webmonitor system
//! service.
//!
//! `wmdeploy install` creates a dedicated non-interactive system identity,
//! the managed directory layout, a copy of the application with its own
//! virtualenv, a systemd unit and global CLI links. `wmdeploy uninstall`
//! reverses all of it, optionally keeping configuration and taking a
//! verified backup of the data first.
//!
//! Every operation reaches the host through three narrow capability traits
//! bundled in [`platform::Host`], so the flows run unchanged against the
//! in-memory fakes in [`platform::mock`].
//!
//! Flows are synchronous and assume a single invocation at a time; running
//! two installs or uninstalls concurrently on one host is not supported.

pub mod cli;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod logger;
pub mod platform;
pub mod provision;
