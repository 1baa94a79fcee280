//! Rule table store: lifecycle of the `port_forward` table and its chains
//!
//! The table is the sole owner of every rule this tool manages. It and its
//! two NAT chains are created lazily on the first add and deleted as a whole
//! by clear-all. Existence is decided by probing the live engine on every
//! call; there is deliberately no cached "already created" flag anywhere.

use crate::core::engine::{RuleEngine, TABLE_FAMILY, TABLE_NAME};
use crate::core::error::Result;
use serde_json::json;
use tracing::{debug, info};

/// Destination-NAT chain, hooked before routing.
pub const PREROUTING: &str = "prerouting";

/// Masquerade chain, hooked after routing.
pub const POSTROUTING: &str = "postrouting";

/// Standard nftables NAT hook priorities.
const PREROUTING_PRIO: i32 = -100;
const POSTROUTING_PRIO: i32 = 100;

/// Outcome of a clear-all request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The table existed and was deleted with all its rules
    Cleared,
    /// No table present; nothing was done
    NothingToClear,
}

/// Ensures the managed table exists, creating it when absent.
///
/// Returns true when the table was created by this call. Safe to call
/// unconditionally before every rule add.
pub fn ensure_table(engine: &dyn RuleEngine) -> Result<bool> {
    if engine.table_exists()? {
        debug!("table {TABLE_FAMILY} {TABLE_NAME} already present");
        return Ok(false);
    }

    engine.apply(&json!({
        "nftables": [
            { "add": { "table": { "family": TABLE_FAMILY, "name": TABLE_NAME } } }
        ]
    }))?;
    info!("created table {TABLE_FAMILY} {TABLE_NAME}");
    Ok(true)
}

/// Ensures both NAT chains exist inside the managed table.
///
/// Returns the number of chains created by this call (0 when everything was
/// already in place).
pub fn ensure_chains(engine: &dyn RuleEngine) -> Result<usize> {
    let mut created = 0;

    for (name, hook, prio) in [
        (PREROUTING, "prerouting", PREROUTING_PRIO),
        (POSTROUTING, "postrouting", POSTROUTING_PRIO),
    ] {
        if engine.chain_exists(name)? {
            debug!("chain {name} already present");
            continue;
        }

        engine.apply(&json!({
            "nftables": [
                {
                    "add": {
                        "chain": {
                            "family": TABLE_FAMILY,
                            "table": TABLE_NAME,
                            "name": name,
                            "type": "nat",
                            "hook": hook,
                            "prio": prio,
                            "policy": "accept"
                        }
                    }
                }
            ]
        }))?;
        info!("created chain {name} (nat hook {hook}, prio {prio})");
        created += 1;
    }

    Ok(created)
}

/// Deletes the whole table if present.
///
/// Individual rules are never removed; clearing always drops the table and
/// everything in it transitively.
pub fn clear(engine: &dyn RuleEngine) -> Result<ClearOutcome> {
    if !engine.table_exists()? {
        info!("clear requested but no table present");
        return Ok(ClearOutcome::NothingToClear);
    }

    engine.delete_table()?;
    Ok(ClearOutcome::Cleared)
}

/// Returns the full live ruleset as nft text (read-only).
pub fn list(engine: &dyn RuleEngine) -> Result<String> {
    engine.list_ruleset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::FakeEngine;

    #[test]
    fn test_ensure_table_creates_once() {
        let engine = FakeEngine::new();

        assert!(ensure_table(&engine).unwrap());
        for _ in 0..5 {
            assert!(!ensure_table(&engine).unwrap());
        }

        assert_eq!(engine.table_creates(), 1);
    }

    #[test]
    fn test_ensure_chains_creates_once() {
        let engine = FakeEngine::new();
        ensure_table(&engine).unwrap();

        assert_eq!(ensure_chains(&engine).unwrap(), 2);
        for _ in 0..5 {
            assert_eq!(ensure_chains(&engine).unwrap(), 0);
        }

        assert_eq!(engine.chain_creates(), 2);
        assert!(engine.chain_exists(PREROUTING).unwrap());
        assert!(engine.chain_exists(POSTROUTING).unwrap());
    }

    #[test]
    fn test_clear_missing_table() {
        let engine = FakeEngine::new();
        assert_eq!(clear(&engine).unwrap(), ClearOutcome::NothingToClear);
        assert_eq!(engine.deletes(), 0);
    }

    #[test]
    fn test_clear_deletes_everything() {
        let engine = FakeEngine::new();
        ensure_table(&engine).unwrap();
        ensure_chains(&engine).unwrap();

        assert_eq!(clear(&engine).unwrap(), ClearOutcome::Cleared);
        assert_eq!(engine.deletes(), 1);
        assert!(!engine.table_exists().unwrap());
        assert!(!engine.chain_exists(PREROUTING).unwrap());
    }
}
