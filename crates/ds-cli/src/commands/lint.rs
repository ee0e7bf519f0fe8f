//! The lint command: exit 0 iff every report passes.

use crate::cli::LintArgs;
use anyhow::{bail, Context, Result};
use ds_report::lint::lint_snapshot;
use ds_report::registry::ReportRegistry;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn execute(args: &LintArgs) -> Result<i32> {
    let reports_dir = args.root.join("reports");
    if !reports_dir.is_dir() {
        bail!("no reports/ directory under {}", args.root.display());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("static spinner template is valid"),
    );
    spinner.set_message("parsing reports...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let registry = ReportRegistry::open(&reports_dir)
        .with_context(|| format!("scanning {}", reports_dir.display()))?;
    let snapshot = registry.snapshot();
    spinner.set_message(format!("linting {} report(s)...", snapshot.len()));

    let findings = lint_snapshot(&snapshot);
    spinner.finish_and_clear();

    if findings.is_empty() {
        println!(
            "ducksearch lint passed for {} ({} report(s))",
            args.root.display(),
            snapshot.len()
        );
        return Ok(0);
    }

    for finding in &findings {
        eprintln!("{finding}");
    }
    eprintln!("{} lint finding(s)", findings.len());
    Ok(1)
}
