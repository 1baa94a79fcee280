//! Kernel-prerequisite manager
//!
//! Port forwarding needs IP forwarding enabled for both families, and the
//! tool also carries the BBR congestion-control lines its provisioning
//! heritage expects. Before any rule is installed, [`ensure_prerequisites`]
//! reads the live values and appends the missing `key = value` lines to the
//! sysctl configuration file.
//!
//! The file is append-only from this tool's point of view: satisfied lines
//! are never rewritten. After appending, the file is de-duplicated (stable
//! sort + unique) and the kernel parameters are reloaded. Reload failures
//! are warnings, never errors - forwarding can still be configured when the
//! reload command is unavailable.

use crate::core::error::{Error, Result};
use crate::settings::Settings;
use std::path::Path;
use tracing::{debug, info, warn};

/// Kernel parameters required before rules are installed, with their
/// expected values.
pub const REQUIRED: &[(&str, &str)] = &[
    ("net.ipv4.ip_forward", "1"),
    ("net.ipv6.conf.all.forwarding", "1"),
    ("net.core.default_qdisc", "fq"),
    ("net.ipv4.tcp_congestion_control", "bbr"),
];

/// Narrow interface to the kernel parameter mechanism.
pub trait KernelParams {
    /// Reads the current value of a dotted sysctl key.
    fn read(&self, key: &str) -> Result<String>;

    /// Reloads kernel parameters from the given configuration file.
    fn reload(&self, conf: &Path) -> Result<()>;
}

/// Production [`KernelParams`] reading `/proc/sys` and invoking `sysctl -p`.
pub struct ProcSysctl;

impl KernelParams for ProcSysctl {
    fn read(&self, key: &str) -> Result<String> {
        let path = format!("/proc/sys/{}", key.replace('.', "/"));
        let value = std::fs::read_to_string(&path)
            .map_err(|e| Error::Sysctl(format!("cannot read {path}: {e}")))?;
        Ok(value.trim().to_string())
    }

    fn reload(&self, conf: &Path) -> Result<()> {
        let conf_str = conf
            .to_str()
            .ok_or_else(|| Error::Sysctl("configuration path is not valid UTF-8".to_string()))?;

        let output = crate::elevation::sysctl_command(&["-p", conf_str])
            .map_err(|e| Error::Elevation(e.to_string()))?
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Sysctl(format!(
                "sysctl -p failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// What a prerequisite pass did
#[derive(Debug, Default)]
pub struct SysctlReport {
    /// Keys whose lines were appended to the configuration file
    pub appended: Vec<String>,
    /// Whether a reload was performed (and succeeded)
    pub reloaded: bool,
    /// Advisory problems that did not abort the pass
    pub warnings: Vec<String>,
}

/// Ensures all required kernel parameters are enabled.
///
/// Idempotent: when every parameter already holds its expected value this
/// performs no writes and no reload.
pub fn ensure_prerequisites(
    params: &dyn KernelParams,
    settings: &Settings,
) -> Result<SysctlReport> {
    let mut report = SysctlReport::default();

    for (key, want) in REQUIRED {
        match params.read(key) {
            Ok(current) if current == *want => {
                debug!("{key} already {want}");
            }
            Ok(current) => {
                info!("{key} is {current}, wants {want}");
                report.appended.push((*key).to_string());
            }
            Err(e) => {
                // Unreadable parameter: flag it, but do not write a setting
                // we cannot verify
                report.warnings.push(format!("cannot read {key}: {e}"));
            }
        }
    }

    if report.appended.is_empty() {
        debug!("all kernel prerequisites satisfied");
        return Ok(report);
    }

    append_and_dedup(&report.appended, &settings.sysctl_conf)?;

    match params.reload(&settings.sysctl_conf) {
        Ok(()) => report.reloaded = true,
        Err(e) => {
            warn!("kernel parameter reload failed: {e}");
            report
                .warnings
                .push(format!("settings saved but not reloaded: {e}"));
        }
    }

    // BBR only takes effect when the kernel module is available; surface the
    // gap instead of silently claiming success
    if report
        .appended
        .iter()
        .any(|k| k == "net.ipv4.tcp_congestion_control")
        && report.reloaded
        && params
            .read("net.ipv4.tcp_congestion_control")
            .is_ok_and(|v| v != "bbr")
    {
        report.warnings.push(
            "BBR is configured but not active; the tcp_bbr module may need a reboot".to_string(),
        );
    }

    Ok(report)
}

/// Appends the `key = value` lines for the given keys to the configuration
/// file, then de-duplicates the whole file with a stable sort + unique pass.
fn append_and_dedup(keys: &[String], conf: &Path) -> Result<()> {
    let existing = match std::fs::read_to_string(conf) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    for key in keys {
        let want = REQUIRED
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .unwrap_or_default();
        lines.push(format!("{key} = {want}"));
    }

    lines.sort();
    lines.dedup();
    lines.retain(|l| !l.is_empty());

    let content = format!("{}\n", lines.join("\n"));
    crate::utils::install_file(&content, conf, "644")?;
    info!("appended {} setting(s) to {}", keys.len(), conf.display());
    Ok(())
}
