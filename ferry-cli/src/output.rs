//! Terminal output helpers
//!
//! Human-readable rendering of artifacts, publish reports, rollout status
//! and run failures.

use colored::*;
use ferry_core::domain::build::ImageArtifact;
use ferry_core::domain::rollout::{RolloutPhase, RolloutStatus};
use ferry_core::domain::run::Stage;
use ferry_core::domain::tag::TagSet;
use ferry_runner::error::{RunError, StageError};
use ferry_runner::service::{PublishReport, RunObserver};
use uuid::Uuid;

/// Prints a line as each stage starts
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn stage_started(&self, _run_id: Uuid, stage: Stage) {
        println!("{} {}", "→".cyan().bold(), stage.as_str().bold());
    }

    fn artifact_built(&self, _run_id: Uuid, artifact: &ImageArtifact) {
        print_artifact(artifact);
    }

    fn tags_planned(&self, _run_id: Uuid, tags: &TagSet) {
        println!("  {} {}", "Tags:".dimmed(), tags.tags().join(", "));
    }

    fn tags_published(&self, _run_id: Uuid, report: &PublishReport) {
        print_publish_report(report);
    }
}

pub fn print_artifact(artifact: &ImageArtifact) {
    println!("  {} {}", "Image:".dimmed(), artifact.local_ref);
    println!("  {} {}", "Digest:".dimmed(), artifact.digest);
    println!(
        "  {} {}",
        "Size:".dimmed(),
        format_size(artifact.size_bytes)
    );
    println!("  {} {}", "Platforms:".dimmed(), artifact.platforms.join(", "));
}

pub fn print_publish_report(report: &PublishReport) {
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "  {} {} {}",
                "✓".green(),
                outcome.reference,
                format!("({} attempt(s))", outcome.attempts).dimmed()
            ),
            Some(error) => println!(
                "  {} {} {}",
                "✗".red(),
                outcome.reference,
                format!("({} attempt(s)): {}", outcome.attempts, error).dimmed()
            ),
        }
    }
}

pub fn print_rollout(status: &RolloutStatus) {
    let phase = format!("{:?}", status.phase());
    let phase = match status.phase() {
        RolloutPhase::Succeeded => phase.green(),
        RolloutPhase::Failed | RolloutPhase::TimedOut => phase.red(),
        RolloutPhase::Pending | RolloutPhase::Progressing => phase.yellow(),
    };
    println!(
        "  {} {} ({}/{} ready)",
        "Rollout:".dimmed(),
        phase,
        status.ready_replicas(),
        status.desired_replicas()
    );
    if let Some(message) = status.message() {
        println!("  {} {}", "Message:".dimmed(), message);
    }
}

/// Prints a failed run with whatever detail its error carries
pub fn print_run_error(error: &RunError) {
    if error.is_cancelled() {
        println!(
            "{}",
            format!("⚠ Run cancelled during {} stage", error.stage).yellow()
        );
        return;
    }

    println!("{}", format!("✗ {}", error).red().bold());

    match &error.source {
        StageError::BuildFailure { diagnostics, .. } if !diagnostics.is_empty() => {
            println!("{}", "─".repeat(80).dimmed());
            println!("{}", diagnostics);
            println!("{}", "─".repeat(80).dimmed());
        }
        StageError::PublishFailure(report) => print_publish_report(report),
        other => {
            if let Some(status) = other.rollout_status() {
                print_rollout(status);
            }
        }
    }

    if error.source.is_retryable() {
        println!(
            "{}",
            "This failure is retryable; re-run the command to try again.".dimmed()
        );
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
