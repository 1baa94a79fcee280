//! Firewall engine abstraction
//!
//! [`RuleEngine`] is the narrow seam between the forwarding logic and the
//! underlying firewall engine. Production code uses [`NftCli`], which shells
//! out to `nft` through the elevation layer; tests substitute an in-memory
//! fake so the table, chain, and rule logic runs without privileges.
//!
//! Existence probes always hit the live engine. Nothing in this crate caches
//! "table exists" state, so kernel reality and program belief cannot drift.

use crate::core::error::{Error, Result};
use std::io::Write;
use std::process::Stdio;
use tracing::{debug, error, info};

/// Address family of the managed table. `inet` holds both IPv4 and IPv6
/// NAT rules in one table.
pub const TABLE_FAMILY: &str = "inet";

/// Name of the table owning every rule this tool manages.
pub const TABLE_NAME: &str = "port_forward";

/// Narrow interface to the firewall engine.
pub trait RuleEngine {
    /// Probes the live engine for the managed table.
    fn table_exists(&self) -> Result<bool>;

    /// Probes the live engine for a chain inside the managed table.
    fn chain_exists(&self, chain: &str) -> Result<bool>;

    /// Applies a JSON batch. The engine applies the whole batch or none of
    /// it, which is what makes a four-rule intent installation atomic.
    fn apply(&self, batch: &serde_json::Value) -> Result<()>;

    /// Deletes the managed table and, transitively, every rule in it.
    fn delete_table(&self) -> Result<()>;

    /// Dumps the complete live ruleset (every table) as nft text.
    fn list_ruleset(&self) -> Result<String>;
}

/// Production [`RuleEngine`] backed by the `nft` binary.
pub struct NftCli;

impl NftCli {
    fn run(args: &[&str]) -> Result<std::process::Output> {
        let output = crate::elevation::nft_command(args)
            .map_err(|e| Error::Elevation(e.to_string()))?
            .output()?;
        Ok(output)
    }

    /// Runs an existence probe, mapping "object missing" errors to
    /// `Ok(false)` and anything else to an error.
    fn probe(args: &[&str]) -> Result<bool> {
        let output = Self::run(args)?;

        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("no such file or directory")
            || stderr.contains("does not exist")
            || stderr.contains("not found")
        {
            return Ok(false);
        }

        Err(Error::Nftables {
            message: format!("probe failed: {}", stderr.trim()),
            stderr: Some(stderr),
            exit_code: output.status.code(),
        })
    }
}

impl RuleEngine for NftCli {
    fn table_exists(&self) -> Result<bool> {
        Self::probe(&["list", "table", TABLE_FAMILY, TABLE_NAME])
    }

    fn chain_exists(&self, chain: &str) -> Result<bool> {
        Self::probe(&["list", "chain", TABLE_FAMILY, TABLE_NAME, chain])
    }

    fn apply(&self, batch: &serde_json::Value) -> Result<()> {
        let json_string = serde_json::to_string(batch)?;
        debug!("applying nft batch: {json_string}");

        let mut child = crate::elevation::nft_command(&["--json", "-f", "-"])
            .map_err(|e| Error::Elevation(e.to_string()))?
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn nft: {e}");
                Error::Internal(format!("Failed to spawn nft: {e}"))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(json_string.as_bytes())?;
        }

        let output = child.wait_with_output()?;

        if output.status.success() {
            info!("nft batch applied");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!("nft batch failed: {stderr}");
            Err(Error::Nftables {
                message: stderr.clone(),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    fn delete_table(&self) -> Result<()> {
        let output = Self::run(&["delete", "table", TABLE_FAMILY, TABLE_NAME])?;

        if output.status.success() {
            info!("table {TABLE_FAMILY} {TABLE_NAME} deleted");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!("table delete failed: {stderr}");
            Err(Error::Nftables {
                message: stderr.clone(),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }

    fn list_ruleset(&self) -> Result<String> {
        let output = Self::run(&["list", "ruleset"])?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(Error::Nftables {
                message: stderr.clone(),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }
}
