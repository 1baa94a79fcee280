//! Service-manager abstraction
//!
//! Persistence needs the firewall service unit enabled (so the dumped
//! configuration loads at boot) and restarted (so it takes effect now).
//! [`ServiceControl`] keeps that dependency narrow; production code uses
//! [`Systemctl`], tests use a recording fake.

use crate::core::error::{Error, Result};
use tracing::info;

/// Narrow interface to the boot-time service manager.
pub trait ServiceControl {
    /// Enables a unit for boot.
    fn enable(&self, unit: &str) -> Result<()>;

    /// Restarts a unit immediately.
    fn restart(&self, unit: &str) -> Result<()>;
}

/// Production [`ServiceControl`] invoking `systemctl` through the elevation
/// layer.
pub struct Systemctl;

impl Systemctl {
    fn run(verb: &str, unit: &str) -> Result<()> {
        let output = crate::elevation::systemctl_command(&[verb, unit])
            .map_err(|e| Error::Elevation(e.to_string()))?
            .output()?;

        if output.status.success() {
            info!("systemctl {verb} {unit} succeeded");
            Ok(())
        } else {
            Err(Error::Service(format!(
                "systemctl {verb} {unit} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl ServiceControl for Systemctl {
    fn enable(&self, unit: &str) -> Result<()> {
        Self::run("enable", unit)
    }

    fn restart(&self, unit: &str) -> Result<()> {
        Self::run("restart", unit)
    }
}
