//! Run summary rendering
//!
//! Tables for humans on stdout, JSON or YAML for scripts. Logs go to stderr,
//! so machine-readable output can be piped safely.

use anyhow::{Context, Result};
use clap::ValueEnum;
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::orchestrator::RunSummary;
use crate::secrets::SecretOrigin;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

pub fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Yaml => print_yaml(summary),
        OutputFormat::Table => {
            print_summary_table(summary);
            Ok(())
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize>(data: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(data).context("Failed to serialize to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a horizontal separator line
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    println!();
    let mut header = String::new();
    for (name, width) in columns {
        header.push_str(&format!("{:<width$} ", name, width = width));
    }
    println!("{}", header.trim().bold());

    let total_width: usize = columns.iter().map(|(_, w)| w + 1).sum();
    print_separator(total_width.saturating_sub(1));
}

fn print_summary_table(summary: &RunSummary) {
    println!("{} {}", "Operation:".bold(), summary.operation);

    if !summary.secrets.is_empty() {
        print_table_header(&[("SECRET", 32), ("ORIGIN", 10), ("CLASS", 14), ("FROM", 16)]);
        for secret in &summary.secrets {
            let origin = match secret.origin {
                SecretOrigin::Preserved => format!("{:<10}", "preserved").green().to_string(),
                SecretOrigin::Generated => format!("{:<10}", "generated").yellow().to_string(),
            };
            println!(
                "{:<32} {} {:<14} {}",
                truncate(&secret.name, 32),
                origin,
                secret.class.to_string(),
                secret.source_service.as_deref().unwrap_or("-")
            );
        }
    }

    if !summary.files_written.is_empty() {
        print_table_header(&[("SERVICE", 16), ("FILE", 48), ("ACTION", 8)]);
        for write in &summary.files_written {
            let action = if write.created { "created" } else { "updated" };
            println!("{:<16} {:<48} {}", write.service, truncate(&write.path.display().to_string(), 48), action);
        }
    }

    for failure in &summary.file_failures {
        println!(
            "{} {} ({}): {}",
            "write failed".red(),
            failure.service,
            failure.path.display(),
            failure.error
        );
    }
    for skipped in &summary.skipped_services {
        println!("{} {}: {}", "skipped service".yellow(), skipped.service, skipped.reason);
    }

    if let Some(routes) = &summary.routes {
        print_table_header(&[("KIND", 10), ("CREATED", 8), ("UPDATED", 8), ("UNCHANGED", 10), ("FAILED", 8)]);
        let rows = [("routes", Some(routes)), ("consumers", summary.consumers.as_ref())];
        for (kind, counts) in rows {
            if let Some(c) = counts {
                let failed = if c.failed > 0 {
                    format!("{:<8}", c.failed).red().to_string()
                } else {
                    format!("{:<8}", c.failed)
                };
                println!("{:<10} {:<8} {:<8} {:<10} {}", kind, c.created, c.updated, c.unchanged, failed);
            }
        }
    }

    if !summary.skipped_providers.is_empty() {
        print_table_header(&[("PROVIDER", 20), ("REASON", 22), ("DETAIL", 50)]);
        for skipped in &summary.skipped_providers {
            let reason = serde_json::to_value(skipped.reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            println!(
                "{:<20} {} {}",
                skipped.provider,
                format!("{:<22}", reason).yellow(),
                truncate(&skipped.message, 50)
            );
        }
    }

    for failure in &summary.route_failures {
        println!(
            "{} {} [{}]: {}",
            "route failed".red(),
            failure.route_id,
            failure.provider,
            truncate(&failure.error, 80)
        );
    }
    for failure in &summary.consumer_failures {
        println!("{} {}: {}", "consumer failed".red(), failure.username, truncate(&failure.error, 80));
    }
    if !summary.deleted_routes.is_empty() {
        println!("{} {} route(s)", "Deleted".green(), summary.deleted_routes.len());
    }

    if let Some(backup) = &summary.backup {
        println!(
            "{} {} ({}, {} files) at {}",
            "Backup:".bold(),
            backup.id,
            backup.kind,
            backup.files,
            backup.dir.display()
        );
    }
    if !summary.backups.is_empty() {
        print_table_header(&[("ID", 44), ("NAME", 24), ("KIND", 10), ("FILES", 6), ("CREATED", 24)]);
        for backup in &summary.backups {
            println!(
                "{:<44} {:<24} {:<10} {:<6} {}",
                truncate(&backup.id, 44),
                truncate(&backup.name, 24),
                backup.kind.to_string(),
                backup.files,
                backup.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            );
        }
    }
    if let Some(restore) = &summary.restore {
        println!("{} {} file(s) from {}", "Restored".green(), restore.restored, restore.backup);
    }
    for path in &summary.removed {
        println!("{} {}", "removed".dimmed(), path.display());
    }

    for warning in &summary.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }

    if summary.is_partial() {
        println!("\n{}", "Completed with failures".red().bold());
    } else {
        println!("\n{}", "Done".green().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json", true).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("yaml", true).unwrap(), OutputFormat::Yaml);
        assert_eq!(OutputFormat::from_str("table", true).unwrap(), OutputFormat::Table);
        assert!(OutputFormat::from_str("invalid", true).is_err());
    }

    #[test]
    fn test_print_summary_all_formats() {
        let summary = RunSummary::new("setup");
        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Yaml] {
            assert!(print_summary(&summary, format).is_ok());
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hi", 5), "hi");
        assert_eq!(truncate("hello", 3), "...");
    }
}
