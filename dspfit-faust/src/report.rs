//! Fit reports.
//!
//! A [`FitReport`] records what a fit job did: the records it used, the
//! parameters it found, the loss after each stage and what it wrote. It is
//! printed to the terminal and can be saved as JSON.

use dspfit::{MergeMode, ParamSet, StageReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one fit job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub job: String,
    pub class_name: String,
    /// Seconds since the Unix epoch.
    pub timestamp: String,
    pub git_commit: Option<String>,
    pub monitor: Option<String>,
    pub sample_rate: u32,
    /// Record names, in fit order.
    pub records: Vec<String>,
    /// Fitted values, in the units the fit saw (offsets for additive merge).
    pub parameters: ParamSet,
    pub fixed: Vec<String>,
    pub stages: Vec<StageReport>,
    pub final_loss: Option<f64>,
    pub merge: MergeMode,
    /// Defaults file written, if any.
    pub defaults_updated: Option<PathBuf>,
    pub plots: Vec<PathBuf>,
}

impl FitReport {
    /// Save report to JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Print human-readable summary to terminal.
    pub fn print_summary(&self) {
        use colored::Colorize;

        println!("\n{}", "═".repeat(60).bold());
        println!("{}", format!(" FIT {} ({}) ", self.job, self.class_name).bold().on_blue());
        println!("{}", "═".repeat(60).bold());

        if let Some(ref commit) = self.git_commit {
            println!("Git commit: {}", commit.dimmed());
        }
        println!("Timestamp:  {}", self.timestamp.dimmed());
        println!("Rate:       {}Hz", self.sample_rate);
        if let Some(ref monitor) = self.monitor {
            println!("Monitor:    {}", monitor.yellow());
        }
        println!("Records:    {}", self.records.join(", ").dimmed());
        println!();

        for (i, stage) in self.stages.iter().enumerate() {
            let noise = if stage.perturbation > 0.0 {
                format!(" | noise σ {:.3}", stage.perturbation)
            } else {
                String::new()
            };
            println!(
                "  {} stage {} {:<16} loss {:+.4e} | {} evals{}",
                "▶".cyan(),
                i + 1,
                stage.method.to_string().bold(),
                stage.loss,
                stage.evaluations,
                noise.dimmed()
            );
        }
        println!();

        for (name, value) in &self.parameters {
            let marker = if self.fixed.contains(name) {
                "fixed".dimmed()
            } else {
                "".normal()
            };
            println!("  {:<28} {:+.6e} {}", name, value, marker);
        }

        println!("{}", "─".repeat(60));
        match &self.defaults_updated {
            Some(path) => println!("{} defaults written to {}", "✓".green(), path.display()),
            None => println!("{} defaults not updated", "⚠".yellow()),
        }
        for plot in &self.plots {
            println!("  {}", plot.display().to_string().dimmed());
        }
        println!("{}\n", "═".repeat(60).bold());
    }
}

/// Current time as seconds since the Unix epoch.
pub fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}

/// Try to get the current git commit hash.
pub fn git_commit() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout).ok().map(|s| s.trim().to_string())
            } else {
                None
            }
        })
}
