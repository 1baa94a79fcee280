//! Shared test utilities for core module tests
//!
//! Provides the in-memory fakes behind the `RuleEngine`, `ServiceControl`,
//! and `KernelParams` seams, plus environment-variable coordination.
//! This module is only compiled in test mode.

use crate::core::engine::{RuleEngine, TABLE_NAME};
use crate::core::error::{Error, Result};
use crate::core::service::ServiceControl;
use crate::core::sysctl::{KernelParams, REQUIRED};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, Once};

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when a test temporarily changes env vars and restores them
/// afterwards. Tests that only need elevation bypassed should call
/// `setup_test_env()` instead - it is one-shot and holds no guard.
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// One-time initialization flag for the test environment
static TEST_ENV_INIT: Once = Once::new();

/// Puts the process in test mode: elevation is bypassed so `install` and
/// friends run directly against temp paths without privileges.
pub fn setup_test_env() {
    TEST_ENV_INIT.call_once(|| {
        // SAFETY: called once via Once, before tests spawn their own
        // processes; the variable is only ever set, never removed
        unsafe {
            std::env::set_var("PFWD_TEST_NO_ELEVATION", "1");
        }
    });
}

/// Stateful in-memory [`RuleEngine`].
///
/// Tracks tables, chains, and rules the way the kernel would, so idempotence
/// and atomic-grouping properties can be asserted without nftables.
pub struct FakeEngine {
    tables: RefCell<HashSet<String>>,
    chains: RefCell<HashSet<String>>,
    rules: RefCell<Vec<serde_json::Value>>,
    table_creates: Cell<usize>,
    chain_creates: Cell<usize>,
    deletes: Cell<usize>,
    fail_apply: Cell<bool>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            tables: RefCell::new(HashSet::new()),
            chains: RefCell::new(HashSet::new()),
            rules: RefCell::new(Vec::new()),
            table_creates: Cell::new(0),
            chain_creates: Cell::new(0),
            deletes: Cell::new(0),
            fail_apply: Cell::new(false),
        }
    }

    /// Makes every subsequent `apply` fail with an nftables error.
    pub fn fail_next_apply(&self) {
        self.fail_apply.set(true);
    }

    pub fn table_creates(&self) -> usize {
        self.table_creates.get()
    }

    pub fn chain_creates(&self) -> usize {
        self.chain_creates.get()
    }

    pub fn deletes(&self) -> usize {
        self.deletes.get()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.borrow().len()
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine for FakeEngine {
    fn table_exists(&self) -> Result<bool> {
        Ok(self.tables.borrow().contains(TABLE_NAME))
    }

    fn chain_exists(&self, chain: &str) -> Result<bool> {
        Ok(self.chains.borrow().contains(chain))
    }

    fn apply(&self, batch: &serde_json::Value) -> Result<()> {
        if self.fail_apply.get() {
            return Err(Error::Nftables {
                message: "mock apply failure".to_string(),
                stderr: Some("mock apply failure".to_string()),
                exit_code: Some(1),
            });
        }

        let stmts = batch["nftables"]
            .as_array()
            .ok_or_else(|| Error::Internal("batch missing nftables array".to_string()))?;

        for stmt in stmts {
            if let Some(table) = stmt.pointer("/add/table/name").and_then(|v| v.as_str()) {
                self.tables.borrow_mut().insert(table.to_string());
                self.table_creates.set(self.table_creates.get() + 1);
            } else if let Some(chain) = stmt.pointer("/add/chain/name").and_then(|v| v.as_str()) {
                self.chains.borrow_mut().insert(chain.to_string());
                self.chain_creates.set(self.chain_creates.get() + 1);
            } else if let Some(rule) = stmt.pointer("/add/rule") {
                if !self.tables.borrow().contains(TABLE_NAME) {
                    return Err(Error::Nftables {
                        message: "No such file or directory".to_string(),
                        stderr: Some("table does not exist".to_string()),
                        exit_code: Some(1),
                    });
                }
                self.rules.borrow_mut().push(rule.clone());
            }
        }

        Ok(())
    }

    fn delete_table(&self) -> Result<()> {
        if !self.tables.borrow_mut().remove(TABLE_NAME) {
            return Err(Error::Nftables {
                message: "No such file or directory".to_string(),
                stderr: Some("table does not exist".to_string()),
                exit_code: Some(1),
            });
        }
        self.chains.borrow_mut().clear();
        self.rules.borrow_mut().clear();
        self.deletes.set(self.deletes.get() + 1);
        Ok(())
    }

    fn list_ruleset(&self) -> Result<String> {
        use std::fmt::Write;

        if !self.tables.borrow().contains(TABLE_NAME) {
            return Ok(String::new());
        }

        let mut out = String::new();
        let _ = writeln!(out, "table inet {TABLE_NAME} {{");
        for rule in self.rules.borrow().iter() {
            let chain = rule["chain"].as_str().unwrap_or("?");
            let comment = rule["comment"].as_str().unwrap_or("");
            let _ = writeln!(out, "    {chain}: {comment}");
        }
        let _ = writeln!(out, "}}");
        Ok(out)
    }
}

/// Recording [`ServiceControl`] fake.
pub struct FakeService {
    enabled: RefCell<Vec<String>>,
    restarted: RefCell<Vec<String>>,
    fail: Cell<bool>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            enabled: RefCell::new(Vec::new()),
            restarted: RefCell::new(Vec::new()),
            fail: Cell::new(false),
        }
    }

    pub fn fail(&self) {
        self.fail.set(true);
    }

    pub fn enabled(&self) -> Vec<String> {
        self.enabled.borrow().clone()
    }

    pub fn restarted(&self) -> Vec<String> {
        self.restarted.borrow().clone()
    }
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceControl for FakeService {
    fn enable(&self, unit: &str) -> Result<()> {
        if self.fail.get() {
            return Err(Error::Service("mock enable failure".to_string()));
        }
        self.enabled.borrow_mut().push(unit.to_string());
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<()> {
        if self.fail.get() {
            return Err(Error::Service("mock restart failure".to_string()));
        }
        self.restarted.borrow_mut().push(unit.to_string());
        Ok(())
    }
}

/// Map-backed [`KernelParams`] fake whose `reload` applies the required
/// values, simulating the kernel accepting the new configuration.
pub struct FakeParams {
    values: RefCell<HashMap<String, String>>,
    reload_count: Cell<usize>,
    fail_reload: Cell<bool>,
    reject_bbr: Cell<bool>,
}

impl FakeParams {
    /// All prerequisites already hold their expected values.
    pub fn satisfied() -> Self {
        let values = REQUIRED
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            values: RefCell::new(values),
            reload_count: Cell::new(0),
            fail_reload: Cell::new(false),
            reject_bbr: Cell::new(false),
        }
    }

    /// Fresh system defaults: forwarding off, cubic congestion control.
    pub fn unsatisfied() -> Self {
        let values = HashMap::from([
            ("net.ipv4.ip_forward".to_string(), "0".to_string()),
            ("net.ipv6.conf.all.forwarding".to_string(), "0".to_string()),
            ("net.core.default_qdisc".to_string(), "pfifo_fast".to_string()),
            (
                "net.ipv4.tcp_congestion_control".to_string(),
                "cubic".to_string(),
            ),
        ]);
        Self {
            values: RefCell::new(values),
            reload_count: Cell::new(0),
            fail_reload: Cell::new(false),
            reject_bbr: Cell::new(false),
        }
    }

    pub fn fail_reload(&self) {
        self.fail_reload.set(true);
    }

    /// Reloads succeed but the congestion control stays on cubic, as on a
    /// kernel without the tcp_bbr module.
    pub fn reject_bbr(&self) {
        self.reject_bbr.set(true);
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.get()
    }
}

impl KernelParams for FakeParams {
    fn read(&self, key: &str) -> Result<String> {
        self.values
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Sysctl(format!("unknown key {key}")))
    }

    fn reload(&self, _conf: &Path) -> Result<()> {
        if self.fail_reload.get() {
            return Err(Error::Sysctl("mock reload failure".to_string()));
        }
        self.reload_count.set(self.reload_count.get() + 1);

        let mut values = self.values.borrow_mut();
        for (key, want) in REQUIRED {
            if *key == "net.ipv4.tcp_congestion_control" && self.reject_bbr.get() {
                continue;
            }
            values.insert((*key).to_string(), (*want).to_string());
        }
        Ok(())
    }
}
