//! System interface: the privileged capabilities the flows depend on.

pub mod mock;
pub mod pal;
pub mod process;
pub mod systemd;

use crate::platform::pal::Platform;
use crate::platform::process::CommandRunner;
use crate::platform::systemd::InitSystem;

/// The capability set handed to the orchestrator for one invocation.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    /// Privilege, account database and ownership.
    pub platform: &'a dyn Platform,
    /// External commands (interpreter, package installer).
    pub runner: &'a dyn CommandRunner,
    /// Init-system client.
    pub init: &'a dyn InitSystem,
}

impl<'a> Host<'a> {
    /// Bundle the three capabilities.
    #[must_use]
    pub fn new(
        platform: &'a dyn Platform,
        runner: &'a dyn CommandRunner,
        init: &'a dyn InitSystem,
    ) -> Self {
        Self {
            platform,
            runner,
            init,
        }
    }
}
