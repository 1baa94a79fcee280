//! Interactive command dispatcher
//!
//! A stdin-driven menu looping over one state (`MenuIdle`): add IPv4
//! forward, add IPv6 forward, clear all, show rules, exit. Invalid input of
//! any kind - menu choice or prompt field - is reported and re-asked; it
//! never aborts the session.
//!
//! The dispatcher is generic over its input and output streams, so every
//! prompt contract is tested headlessly with pre-supplied input. Validation
//! itself lives in [`crate::validators`]; this module only drives the
//! re-prompt cycles.

use crate::core::engine::RuleEngine;
use crate::core::error::{Error, NftablesErrorPattern, Result};
use crate::core::forward::{self, AddrFamily, ForwardIntent};
use crate::core::persist::{self, PersistReport};
use crate::core::service::ServiceControl;
use crate::core::table::{self, ClearOutcome};
use crate::settings::Settings;
use crate::{audit, validators};
use std::io::{BufRead, Write};
use tracing::error;

/// Installs an intent and persists the result.
///
/// Shared by the interactive menu and the non-interactive `add` subcommand;
/// the caller is responsible for having validated the intent.
pub fn apply_intent(
    engine: &dyn RuleEngine,
    service: &dyn ServiceControl,
    settings: &Settings,
    intent: &ForwardIntent,
) -> Result<PersistReport> {
    let family = intent.family.nfproto();
    let target = intent.dnat_target();

    if let Err(e) = forward::install(engine, intent) {
        audit::log_forward(
            settings.audit_enabled,
            family,
            intent.local_port,
            &target,
            false,
            Some(e.to_string()),
        );
        return Err(e);
    }
    audit::log_forward(
        settings.audit_enabled,
        family,
        intent.local_port,
        &target,
        true,
        None,
    );

    match persist::persist(engine, service, settings) {
        Ok(report) => {
            audit::log_persist(settings.audit_enabled, Some(&report.checksum), true, None);
            Ok(report)
        }
        Err(e) => {
            audit::log_persist(settings.audit_enabled, None, false, Some(e.to_string()));
            Err(e)
        }
    }
}

/// Clears the whole table and, when anything was deleted, persists.
///
/// A clear on a system without the table is not an error; it reports
/// [`ClearOutcome::NothingToClear`] and skips persistence entirely.
pub fn clear_all(
    engine: &dyn RuleEngine,
    service: &dyn ServiceControl,
    settings: &Settings,
) -> Result<(ClearOutcome, Option<PersistReport>)> {
    match table::clear(engine) {
        Ok(ClearOutcome::Cleared) => {
            audit::log_clear(settings.audit_enabled, true, true, None);
            let report = match persist::persist(engine, service, settings) {
                Ok(report) => {
                    audit::log_persist(settings.audit_enabled, Some(&report.checksum), true, None);
                    Some(report)
                }
                Err(e) => {
                    audit::log_persist(settings.audit_enabled, None, false, Some(e.to_string()));
                    return Err(e);
                }
            };
            Ok((ClearOutcome::Cleared, report))
        }
        Ok(ClearOutcome::NothingToClear) => {
            audit::log_clear(settings.audit_enabled, false, true, None);
            Ok((ClearOutcome::NothingToClear, None))
        }
        Err(e) => {
            audit::log_clear(settings.audit_enabled, false, false, Some(e.to_string()));
            Err(e)
        }
    }
}

/// Interactive menu loop over the forwarding operations
pub struct Dispatcher<'a, R, W> {
    input: R,
    output: W,
    engine: &'a dyn RuleEngine,
    service: &'a dyn ServiceControl,
    settings: &'a Settings,
}

impl<'a, R: BufRead, W: Write> Dispatcher<'a, R, W> {
    pub fn new(
        input: R,
        output: W,
        engine: &'a dyn RuleEngine,
        service: &'a dyn ServiceControl,
        settings: &'a Settings,
    ) -> Self {
        Self {
            input,
            output,
            engine,
            service,
            settings,
        }
    }

    /// Runs the menu until exit or end of input.
    pub fn run(&mut self) {
        loop {
            let _ = writeln!(self.output);
            let _ = writeln!(self.output, "pfwd - nftables port forwarding");
            let _ = writeln!(self.output, "  1) Add IPv4 forward");
            let _ = writeln!(self.output, "  2) Add IPv6 forward");
            let _ = writeln!(self.output, "  3) Clear all rules");
            let _ = writeln!(self.output, "  4) Show rules");
            let _ = writeln!(self.output, "  0) Exit");

            let Some(choice) = self.prompt("Select an option [0-4]: ") else {
                break;
            };

            match choice.as_str() {
                "1" => self.handle_add(AddrFamily::V4),
                "2" => self.handle_add(AddrFamily::V6),
                "3" => self.handle_clear(),
                "4" => self.handle_show(),
                "0" => {
                    let _ = writeln!(self.output, "Bye.");
                    break;
                }
                other => {
                    let _ = writeln!(
                        self.output,
                        "error: invalid option '{other}' (expected 0-4)"
                    );
                }
            }
        }
    }

    /// Writes a prompt and reads one trimmed line. None means end of input.
    fn prompt(&mut self, text: &str) -> Option<String> {
        let _ = write!(self.output, "{text}");
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    /// Asks for a port until a valid one is entered. One cycle per rejection.
    fn prompt_port(&mut self, text: &str) -> Option<u16> {
        loop {
            let value = self.prompt(text)?;
            if let Some(port) = validators::parse_port(&value) {
                return Some(port);
            }
            let _ = writeln!(self.output, "error: invalid port (must be 1-65535)");
        }
    }

    /// Asks for a family-specific remote address until valid.
    fn prompt_addr(&mut self, family: AddrFamily) -> Option<String> {
        let text = format!("Remote {} address: ", family.display_name());
        loop {
            let value = self.prompt(&text)?;
            if validators::validate_addr(family, &value) {
                return Some(value);
            }
            let _ = writeln!(
                self.output,
                "error: invalid {} address",
                family.display_name()
            );
        }
    }

    /// Asks for the remote port; empty input means the local port.
    fn prompt_remote_port(&mut self, default: u16) -> Option<u16> {
        let text = format!("Remote port [{default}]: ");
        loop {
            let value = self.prompt(&text)?;
            if value.is_empty() {
                return Some(default);
            }
            if let Some(port) = validators::parse_port(&value) {
                return Some(port);
            }
            let _ = writeln!(self.output, "error: invalid port (must be 1-65535)");
        }
    }

    fn handle_add(&mut self, family: AddrFamily) {
        let Some(local_port) = self.prompt_port("Local port: ") else {
            return;
        };
        if let Some(note) = validators::check_well_known_port(local_port) {
            let _ = writeln!(self.output, "info: {note}");
        }

        let Some(remote_addr) = self.prompt_addr(family) else {
            return;
        };
        if let Some(note) = validators::check_reserved_addr(&remote_addr) {
            let _ = writeln!(self.output, "info: {note}");
        }

        let Some(remote_port) = self.prompt_remote_port(local_port) else {
            return;
        };

        let intent = ForwardIntent::new(family, local_port, remote_addr, Some(remote_port));

        match apply_intent(self.engine, self.service, self.settings, &intent) {
            Ok(report) => {
                let _ = writeln!(
                    self.output,
                    "info: forward {} -> {} installed and persisted",
                    intent.local_port,
                    intent.dnat_target()
                );
                self.print_warnings(&report.warnings);
                self.handle_show();
            }
            Err(e) => self.report_error(&e),
        }
    }

    fn handle_clear(&mut self) {
        let Some(answer) = self.prompt(
            "Clear ALL forwarding rules? This deletes the entire port_forward table. [y/N]: ",
        ) else {
            return;
        };

        if answer != "y" && answer != "Y" {
            let _ = writeln!(self.output, "info: aborted, nothing changed");
            return;
        }

        match clear_all(self.engine, self.service, self.settings) {
            Ok((ClearOutcome::Cleared, report)) => {
                let _ = writeln!(self.output, "info: table and all rules cleared");
                if let Some(report) = report {
                    self.print_warnings(&report.warnings);
                }
            }
            Ok((ClearOutcome::NothingToClear, _)) => {
                let _ = writeln!(self.output, "info: nothing to clear");
            }
            Err(e) => self.report_error(&e),
        }
    }

    fn handle_show(&mut self) {
        match table::list(self.engine) {
            Ok(text) if text.trim().is_empty() => {
                let _ = writeln!(self.output, "info: ruleset is empty");
            }
            Ok(text) => {
                let _ = write!(self.output, "{text}");
            }
            Err(e) => self.report_error(&e),
        }
    }

    fn print_warnings(&mut self, warnings: &[String]) {
        for warning in warnings {
            let _ = writeln!(self.output, "warning: {warning}");
        }
    }

    /// Reports an operational error and returns control to the menu.
    fn report_error(&mut self, err: &Error) {
        error!("operation failed: {err}");
        match err {
            Error::Nftables { message, .. } => {
                let translation = NftablesErrorPattern::match_error(message);
                let _ = writeln!(self.output, "error: {}", translation.user_message);
                for suggestion in &translation.suggestions {
                    let _ = writeln!(self.output, "  hint: {suggestion}");
                }
            }
            other => {
                let _ = writeln!(self.output, "error: {other}");
            }
        }
    }
}
