//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! stages and deploy reports in text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{LoadedStage, StageConfig, StageFingerprint};
use crate::deploy::{DeployReport, HostOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Host row for table display.
#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Host")]
    hostname: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Roles")]
    roles: String,
}

/// Host outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Connected")]
    connected: String,
    #[tabled(rename = "Released")]
    released: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validated stage for display.
    #[must_use]
    pub fn format_stage(&self, config: &StageConfig) -> String {
        let fingerprint = StageFingerprint::new().of(config);
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "fingerprint": fingerprint,
                "stage": config,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => Self::format_stage_text(config, &fingerprint),
        }
    }

    /// Formats a stage as text.
    fn format_stage_text(config: &StageConfig, fingerprint: &str) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nStage role: {}", config.role().bold());
        let _ = writeln!(
            output,
            "   Fingerprint: {}\n",
            StageFingerprint::new().short(fingerprint)
        );

        let rows: Vec<HostRow> = config
            .hosts()
            .iter()
            .map(|h| HostRow {
                hostname: h.hostname().to_string(),
                user: h.user().to_string(),
                roles: h.roles().iter().cloned().collect::<Vec<_>>().join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let ssh = config.ssh_options();
        let port = ssh
            .port()
            .map_or_else(|| format!("{} (default)", ssh.effective_port()), |p| p.to_string());
        let _ = writeln!(output, "\n   SSH port: {port}");
        match ssh.key_paths() {
            Some(keys) => {
                for key in keys {
                    let _ = writeln!(output, "   SSH key: {}", key.display());
                }
            }
            None => {
                let _ = writeln!(output, "   SSH keys: {}", "engine default".dimmed());
            }
        }

        let _ = writeln!(output, "   API token: {}", config.api_token());
        let _ = writeln!(output, "   Deploy path: {}", config.deploy_path().display());
        let _ = writeln!(
            output,
            "   Post-deploy hook: {}",
            config
                .post_deploy_hook()
                .map_or_else(|| "none".dimmed().to_string(), ToString::to_string)
        );

        if !config.hooks().is_empty() {
            let _ = writeln!(output, "\n   Declared hooks:");
            for (name, definition) in config.hooks() {
                let _ = writeln!(output, "     {name}: {}", definition.command.join(" "));
            }
        }

        output
    }

    /// Formats the result of `validate`.
    #[must_use]
    pub fn format_validation(&self, loaded: &LoadedStage, show_warnings: bool) -> String {
        let config = loaded.config();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": true,
                "role": config.role(),
                "hosts": config.host_addresses(),
                "warnings": loaded.warnings(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Stage is valid!\n", "✓".green());

                if show_warnings && !loaded.warnings().is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in loaded.warnings() {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nStage summary:");
                let _ = writeln!(output, "   Role: {}", config.role());
                let _ = writeln!(output, "   Hosts: {}", config.hosts().len());
                let _ = writeln!(output, "   Deploy path: {}", config.deploy_path().display());
                output
            }
        }
    }

    /// Formats a deploy report.
    #[must_use]
    pub fn format_report(&self, report: &DeployReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &DeployReport) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\n{} Deploy {}", "✓".green(), report.phase);
        let _ = writeln!(output, "   Run: {}", report.run_id);
        let _ = writeln!(output, "   Fingerprint: {}\n", StageFingerprint::new().short(&report.fingerprint));

        let rows: Vec<OutcomeRow> = report.hosts.iter().map(Self::outcome_row).collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let hook = report
            .hook
            .as_ref()
            .map_or_else(|| "none".dimmed().to_string(), |name| format!("{name} {}", "ran".green()));
        let _ = writeln!(output, "\n   Post-deploy hook: {hook}");

        let elapsed = report.finished_at - report.started_at;
        let _ = writeln!(output, "   Duration: {}ms", elapsed.num_milliseconds());

        output
    }

    fn outcome_row(outcome: &HostOutcome) -> OutcomeRow {
        let mark = |ok: bool| {
            if ok {
                "✓".green().to_string()
            } else {
                "✗".red().to_string()
            }
        };
        OutcomeRow {
            host: outcome.host.clone(),
            connected: mark(outcome.connected),
            released: mark(outcome.released),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageLoader, StageSource};

    fn stage() -> StageConfig {
        StageLoader::new()
            .with_env(|_| None)
            .load(StageSource::Yaml(String::from(
                r"
role: www
hosts: [deployer@tunnel.example.com]
ssh_options: { port: 7047 }
api_token: CT0wnKJbr3mk
deploy_path: /var/www/app
post_deploy_hook: activate_merchant_e
",
            )))
            .unwrap()
            .into_config()
    }

    #[test]
    fn test_text_never_shows_token() {
        let output = OutputFormatter::new(OutputFormat::Text).format_stage(&stage());
        assert!(!output.contains("CT0wnKJbr3mk"));
        assert!(output.contains("[redacted]"));
        assert!(output.contains("7047"));
    }

    #[test]
    fn test_report_text() {
        let now = chrono::Utc::now();
        let report = DeployReport {
            run_id: String::from("run-1"),
            fingerprint: String::from("abcdef0123456789"),
            role: String::from("www"),
            phase: crate::deploy::RunPhase::Activated,
            hosts: vec![HostOutcome {
                host: String::from("deployer@tunnel.example.com"),
                connected: true,
                released: true,
            }],
            hook: Some(String::from("activate_merchant_e")),
            hook_invoked: true,
            initiated_from: String::from("laptop"),
            started_at: now,
            finished_at: now,
        };

        let output = OutputFormatter::new(OutputFormat::Text).format_report(&report);
        assert!(output.contains("activated"));
        assert!(output.contains("abcdef01"));
        assert!(output.contains("deployer@tunnel.example.com"));
        assert!(output.contains("activate_merchant_e"));
    }

    #[test]
    fn test_json_never_shows_token() {
        let output = OutputFormatter::new(OutputFormat::Json).format_stage(&stage());
        assert!(!output.contains("CT0wnKJbr3mk"));

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["stage"]["role"], "www");
        assert_eq!(value["stage"]["ssh_options"]["port"], 7047);
        assert!(value["stage"]["ssh_options"].get("key_paths").is_none());
    }
}
