//! Runtime settings: system file locations and the firewall service unit
//!
//! Defaults target a stock systemd + nftables distribution. Every path can
//! be overridden through a `PFWD_*` environment variable, which is how the
//! test suite redirects writes into temp directories and how distro
//! packagers relocate the canonical files.

use std::path::PathBuf;

/// Locations of the system artifacts pfwd reads and writes
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kernel-parameter file the prerequisite pass appends to
    pub sysctl_conf: PathBuf,
    /// Canonical nftables configuration file persisted after every mutation
    pub nft_conf: PathBuf,
    /// Service unit reloading the nftables configuration at boot
    pub nft_service: String,
    /// Whether privileged operations are recorded in the audit log
    pub audit_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sysctl_conf: PathBuf::from("/etc/sysctl.conf"),
            nft_conf: PathBuf::from("/etc/nftables.conf"),
            nft_service: "nftables".to_string(),
            audit_enabled: true,
        }
    }
}

impl Settings {
    /// Builds settings from the environment, falling back to the defaults.
    ///
    /// Recognized variables: `PFWD_SYSCTL_CONF`, `PFWD_NFT_CONF`,
    /// `PFWD_NFT_SERVICE`, and `PFWD_AUDIT` (`0` disables audit logging).
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(path) = non_empty_var("PFWD_SYSCTL_CONF") {
            settings.sysctl_conf = PathBuf::from(path);
        }
        if let Some(path) = non_empty_var("PFWD_NFT_CONF") {
            settings.nft_conf = PathBuf::from(path);
        }
        if let Some(unit) = non_empty_var("PFWD_NFT_SERVICE") {
            settings.nft_service = unit;
        }
        if let Some(flag) = non_empty_var("PFWD_AUDIT") {
            settings.audit_enabled = flag != "0";
        }

        settings
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.sysctl_conf, PathBuf::from("/etc/sysctl.conf"));
        assert_eq!(settings.nft_conf, PathBuf::from("/etc/nftables.conf"));
        assert_eq!(settings.nft_service, "nftables");
        assert!(settings.audit_enabled);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("PFWD_SYSCTL_CONF", "/tmp/sysctl.test");
            std::env::set_var("PFWD_NFT_CONF", "/tmp/nftables.test");
            std::env::set_var("PFWD_NFT_SERVICE", "nftables-test");
            std::env::set_var("PFWD_AUDIT", "0");
        }

        let settings = Settings::from_env();

        unsafe {
            std::env::remove_var("PFWD_SYSCTL_CONF");
            std::env::remove_var("PFWD_NFT_CONF");
            std::env::remove_var("PFWD_NFT_SERVICE");
            std::env::remove_var("PFWD_AUDIT");
        }

        assert_eq!(settings.sysctl_conf, PathBuf::from("/tmp/sysctl.test"));
        assert_eq!(settings.nft_conf, PathBuf::from("/tmp/nftables.test"));
        assert_eq!(settings.nft_service, "nftables-test");
        assert!(!settings.audit_enabled);
    }

    #[test]
    fn test_empty_env_ignored() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var("PFWD_NFT_SERVICE", "");
        }

        let settings = Settings::from_env();

        unsafe {
            std::env::remove_var("PFWD_NFT_SERVICE");
        }

        assert_eq!(settings.nft_service, "nftables");
    }
}
