//! The serve command: lint the root, then run the HTTP server.

use crate::cli::ServeArgs;
use anyhow::{Context, Result};
use ds_report::lint::lint_snapshot;
use ds_server::{serve, Service};

pub fn execute(args: &ServeArgs) -> Result<i32> {
    let service = Service::open(&args.root, args.dev)
        .with_context(|| format!("opening root {}", args.root.display()))?;

    // a root that fails lint never serves
    let findings = lint_snapshot(&service.state.dispatcher.registry().snapshot());
    if !findings.is_empty() {
        for finding in &findings {
            eprintln!("{finding}");
        }
        eprintln!("refusing to serve: {} lint finding(s)", findings.len());
        return Ok(1);
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if args.workers > 0 {
        builder.worker_threads(args.workers);
    }
    let runtime = builder.build().context("building the tokio runtime")?;

    log::info!(
        "ducksearch serve ready on {}:{} with root {} (workers={}, dev={})",
        args.host,
        args.port,
        args.root.display(),
        args.workers,
        args.dev
    );
    runtime
        .block_on(serve(service, &args.host, args.port))
        .context("HTTP server error")?;
    Ok(0)
}
