//! Privilege elevation for system operations
//!
//! pfwd mutates kernel and system state through a small set of external
//! binaries. This module is the only place commands for them are built, so
//! the set of programs that can run elevated stays bounded:
//!
//! - **nft**: rule probes, batch application, ruleset dumps
//! - **sysctl**: reloading kernel parameters after the prerequisite pass
//! - **systemctl**: enabling/restarting the firewall service unit
//! - **install**: writing staged configuration files to system locations
//! - the system package manager (apt-get/dnf/pacman), only for the one-time
//!   "firewall engine missing" startup recovery
//!
//! # Elevation Strategy
//!
//! - Running as root: commands execute directly, no wrapper.
//! - Otherwise `run0` is preferred when available (systemd v256+, no SUID),
//!   with `sudo` as the fallback for ordinary terminal sessions.
//!
//! # Environment Variables
//!
//! - `PFWD_ELEVATION_METHOD`: force a specific method (`sudo` or `run0`).
//! - `PFWD_TEST_NO_ELEVATION`: bypass elevation entirely (tests only).
//! - `PFWD_NFT_COMMAND`, `PFWD_SYSCTL_COMMAND`, `PFWD_SYSTEMCTL_COMMAND`,
//!   `PFWD_INSTALL_COMMAND`: override the binary path for the respective
//!   program. Integration tests point these at mock scripts.
//!
//! # Security
//!
//! Arguments are passed directly without shell interpretation; callers
//! validate all operator input before it reaches this layer.

use std::io;
use std::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// No usable elevation helper found in PATH
    #[error("no elevation helper found - install sudo or run0, or run as root")]
    NoHelperAvailable,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `PFWD_ELEVATION_METHOD`
    #[error("Invalid PFWD_ELEVATION_METHOD '{0}'. Valid options: sudo, run0")]
    InvalidMethod(String),

    /// Program is not in the approved elevation set
    #[error("program '{0}' is not approved for elevation")]
    ProgramNotApproved(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Programs this module will construct commands for.
const APPROVED: &[&str] = &[
    "nft",
    "sysctl",
    "systemctl",
    "install",
    "apt-get",
    "dnf",
    "pacman",
];

/// Checks if a binary exists in PATH (or is an absolute/relative path to a file)
pub(crate) fn binary_exists(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

/// Checks a `PFWD_ELEVATION_METHOD` value.
fn validate_method(method: &str) -> Result<(), ElevationError> {
    match method {
        "sudo" | "run0" => Ok(()),
        other => Err(ElevationError::InvalidMethod(other.to_string())),
    }
}

/// Resolves the binary to run for an approved program, honoring the
/// per-program `PFWD_<PROGRAM>_COMMAND` override used by tests and packagers.
fn resolve_program(program: &str) -> String {
    let var = match program {
        "nft" => "PFWD_NFT_COMMAND",
        "sysctl" => "PFWD_SYSCTL_COMMAND",
        "systemctl" => "PFWD_SYSTEMCTL_COMMAND",
        "install" => "PFWD_INSTALL_COMMAND",
        _ => return program.to_string(),
    };
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| program.to_string())
}

/// Internal helper to build an elevated command for an approved program.
///
/// Not exposed publicly - callers use the specific constructors below so the
/// set of elevatable binaries stays auditable in one place.
fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    if !APPROVED.contains(&program) {
        return Err(ElevationError::ProgramNotApproved(program.to_string()));
    }

    let resolved = resolve_program(program);

    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("PFWD_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(&resolved);
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Direct Root Execution (No wrapper needed)
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(&resolved);
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Explicit elevation method override (scripts with sudoers NOPASSWD, etc.)
    if let Ok(method) = std::env::var("PFWD_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            validate_method(&method)?;
            if !binary_exists(&method) {
                return Err(ElevationError::MethodNotAvailable(method));
            }
            let mut cmd = Command::new(&method);
            cmd.arg(&resolved).args(args);
            return Ok(cmd);
        }
    }

    // 4. Automatic detection - prefer run0 (modern, no SUID), fall back to sudo
    if binary_exists("run0") {
        let mut cmd = Command::new("run0");
        cmd.arg(&resolved).args(args);
        return Ok(cmd);
    }

    if binary_exists("sudo") {
        let mut cmd = Command::new("sudo");
        cmd.arg(&resolved).args(args);
        return Ok(cmd);
    }

    Err(ElevationError::NoHelperAvailable)
}

/// Returns true when this process can execute privileged commands: either it
/// is already root or an elevation helper is present.
pub fn can_elevate() -> bool {
    std::env::var("PFWD_TEST_NO_ELEVATION").is_ok()
        || nix::unistd::getuid().is_root()
        || binary_exists("run0")
        || binary_exists("sudo")
}

/// Returns true when the resolved firewall engine binary is present.
pub fn engine_available() -> bool {
    binary_exists(&resolve_program("nft"))
}

/// Returns the first supported system package manager found in PATH.
pub fn detect_package_manager() -> Option<&'static str> {
    ["apt-get", "dnf", "pacman"]
        .into_iter()
        .find(|pm| binary_exists(pm))
}

/// Creates an elevated `nft` command with the specified arguments.
///
/// # Example
///
/// ```no_run
/// use pfwd::elevation::nft_command;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let output = nft_command(&["list", "ruleset"])?.output()?;
/// # Ok(())
/// # }
/// ```
pub fn nft_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("nft", args)
}

/// Creates an elevated `sysctl` command with the specified arguments.
pub fn sysctl_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("sysctl", args)
}

/// Creates an elevated `systemctl` command with the specified arguments.
pub fn systemctl_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("systemctl", args)
}

/// Creates an elevated `install` command with the specified arguments.
///
/// Used for writing staged configuration files to system locations like
/// `/etc/nftables.conf` without running the whole process as root.
pub fn install_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("install", args)
}

/// Creates an elevated package-manager command.
///
/// `manager` must be one of `apt-get`, `dnf`, or `pacman`; anything else is
/// rejected. Only used by the startup "engine missing" recovery path.
pub fn package_manager_command(manager: &str, args: &[&str]) -> Result<Command, ElevationError> {
    match manager {
        "apt-get" | "dnf" | "pacman" => build_elevated_command(manager, args),
        _ => Err(ElevationError::ProgramNotApproved(manager.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        assert!(!binary_exists("pfwd_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_binary_exists_absolute_path() {
        assert!(binary_exists("/bin/sh"));
        assert!(!binary_exists("/bin/pfwd_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_create_nft_command_test_mode() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("PFWD_TEST_NO_ELEVATION", "1");
        }

        let cmd = nft_command(&["list", "ruleset"]);
        assert!(cmd.is_ok());
    }

    #[test]
    fn test_unapproved_program_rejected() {
        let result = build_elevated_command("rm", &["-rf", "/"]);
        assert!(matches!(result, Err(ElevationError::ProgramNotApproved(_))));

        let result = package_manager_command("zypper", &["install", "nftables"]);
        assert!(matches!(result, Err(ElevationError::ProgramNotApproved(_))));
    }

    #[test]
    fn test_validate_method() {
        assert!(validate_method("sudo").is_ok());
        assert!(validate_method("run0").is_ok());
        assert!(matches!(
            validate_method("doas"),
            Err(ElevationError::InvalidMethod(_))
        ));
        assert!(matches!(
            validate_method("pkexec"),
            Err(ElevationError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_program_override() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("PFWD_TEST_NO_ELEVATION", "1");
            std::env::set_var("PFWD_NFT_COMMAND", "/tmp/mock-nft");
        }

        let cmd = nft_command(&["list", "ruleset"]).unwrap();
        assert_eq!(cmd.get_program(), "/tmp/mock-nft");

        unsafe {
            std::env::remove_var("PFWD_NFT_COMMAND");
        }
    }
}
