//! Ruleset persistence
//!
//! After every kernel-state mutation the complete live ruleset (every
//! table, not just `port_forward`) is dumped to the canonical nftables
//! configuration file, so the on-disk and in-kernel states stay
//! synchronized. The previous file, when one exists, is first copied to a
//! timestamped sibling; only the five newest backups are kept.
//!
//! Service enable/restart failures are warnings: by the time they run the
//! dump is already consistent on disk, and non-systemd environments should
//! not lose the add itself.

use crate::core::engine::RuleEngine;
use crate::core::error::Result;
use crate::core::service::ServiceControl;
use crate::settings::Settings;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Number of timestamped backups kept next to the canonical file.
const MAX_BACKUPS: usize = 5;

/// What a persist pass produced
#[derive(Debug)]
pub struct PersistReport {
    /// Backup path of the previous configuration, when one existed
    pub backup: Option<PathBuf>,
    /// SHA-256 checksum of the written dump
    pub checksum: String,
    /// Advisory problems that did not abort the pass
    pub warnings: Vec<String>,
}

/// Snapshots the live ruleset to disk and arranges boot-time reload.
pub fn persist(
    engine: &dyn RuleEngine,
    service: &dyn ServiceControl,
    settings: &Settings,
) -> Result<PersistReport> {
    let dump = engine.list_ruleset()?;

    let mut warnings = Vec::new();

    let backup = if settings.nft_conf.exists() {
        match backup_existing(&settings.nft_conf, &mut warnings) {
            Ok(path) => Some(path),
            Err(e) => {
                // A failed backup must not block the dump; the live ruleset
                // is the state the operator just confirmed
                warn!("backup failed: {e}");
                warnings.push(format!("previous configuration not backed up: {e}"));
                None
            }
        }
    } else {
        None
    };

    let content = format!("#!/usr/sbin/nft -f\n\nflush ruleset\n\n{dump}");
    crate::utils::install_file(&content, &settings.nft_conf, "644")?;
    info!("ruleset persisted to {}", settings.nft_conf.display());

    let checksum = {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    for (what, result) in [
        ("enable", service.enable(&settings.nft_service)),
        ("restart", service.restart(&settings.nft_service)),
    ] {
        if let Err(e) = result {
            warn!("service {what} failed: {e}");
            warnings.push(format!(
                "could not {what} service '{}': {e}",
                settings.nft_service
            ));
        }
    }

    Ok(PersistReport {
        backup,
        checksum,
        warnings,
    })
}

/// Copies the current configuration to a timestamped sibling and prunes old
/// backups.
fn backup_existing(conf: &Path, warnings: &mut Vec<String>) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup_name = format!(
        "{}.{timestamp}.bak",
        conf.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "nftables.conf".to_string())
    );
    let backup_path = conf.with_file_name(backup_name);

    crate::utils::install_copy(conf, &backup_path, "600")?;
    info!("previous configuration backed up to {}", backup_path.display());

    if let Err(e) = prune_backups(conf) {
        warnings.push(format!("old backups not pruned: {e}"));
    }

    Ok(backup_path)
}

/// Removes all but the newest [`MAX_BACKUPS`] backups of the given file.
fn prune_backups(conf: &Path) -> Result<()> {
    let dir = match conf.parent() {
        Some(dir) => dir,
        None => return Ok(()),
    };
    let prefix = format!(
        "{}.",
        conf.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );

    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
                .unwrap_or(false)
        })
        .collect();

    // Timestamps sort lexicographically; newest last
    backups.sort();

    if backups.len() > MAX_BACKUPS {
        let excess = backups.len() - MAX_BACKUPS;
        for backup in backups.drain(..excess) {
            if let Err(e) = std::fs::remove_file(&backup) {
                warn!("failed to remove old backup {:?}: {}", backup, e);
            } else {
                info!("removed old backup: {:?}", backup);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{setup_test_env, FakeEngine, FakeService};

    fn test_settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            sysctl_conf: dir.path().join("sysctl.conf"),
            nft_conf: dir.path().join("nftables.conf"),
            nft_service: "nftables".to_string(),
            audit_enabled: false,
        }
    }

    #[test]
    fn test_first_persist_writes_dump_without_backup() {
        setup_test_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);

        let engine = FakeEngine::new();
        let service = FakeService::new();

        let report = persist(&engine, &service, &settings).unwrap();

        assert!(report.backup.is_none());
        assert_eq!(report.checksum.len(), 64);

        let written = std::fs::read_to_string(&settings.nft_conf).unwrap();
        assert!(written.starts_with("#!/usr/sbin/nft -f"));
        assert!(written.contains("flush ruleset"));
        assert!(written.contains(&engine.list_ruleset().unwrap()));
    }

    #[test]
    fn test_persist_backs_up_previous_file() {
        setup_test_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);

        std::fs::write(&settings.nft_conf, "previous ruleset\n").unwrap();

        let engine = FakeEngine::new();
        let service = FakeService::new();

        let report = persist(&engine, &service, &settings).unwrap();

        let backup = report.backup.expect("backup should exist");
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "previous ruleset\n"
        );
        // Canonical file holds the new dump, not the old content
        let written = std::fs::read_to_string(&settings.nft_conf).unwrap();
        assert!(!written.contains("previous ruleset"));
    }

    #[test]
    fn test_persist_enables_and_restarts_service() {
        setup_test_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);

        let engine = FakeEngine::new();
        let service = FakeService::new();

        let report = persist(&engine, &service, &settings).unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(service.enabled(), vec!["nftables"]);
        assert_eq!(service.restarted(), vec!["nftables"]);
    }

    #[test]
    fn test_service_failure_is_a_warning() {
        setup_test_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);

        let engine = FakeEngine::new();
        let service = FakeService::new();
        service.fail();

        let report = persist(&engine, &service, &settings).unwrap();

        assert_eq!(report.warnings.len(), 2);
        // The dump itself still landed
        assert!(settings.nft_conf.exists());
    }

    #[test]
    fn test_round_trip_dump_matches_engine() {
        setup_test_env();
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(&dir);

        let engine = FakeEngine::new();
        crate::core::table::ensure_table(&engine).unwrap();
        crate::core::table::ensure_chains(&engine).unwrap();

        let live = engine.list_ruleset().unwrap();
        persist(&engine, &FakeService::new(), &settings).unwrap();

        let written = std::fs::read_to_string(&settings.nft_conf).unwrap();
        assert!(written.ends_with(&live));
    }
}
