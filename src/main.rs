//! upload - stream files to an uploadd server
//!
//! Files are sent one after another over a single TLS connection; by
//! default the run stops at the first failure.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use upload::cli::ClientOpts;
use upload::client;
use upload::logger::{Logger, TextLogger};

fn main() -> ExitCode {
    let opts = ClientOpts::parse();
    let logger: Arc<dyn Logger> = match opts.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("cannot open log file {}: {}", p.display(), e);
                return ExitCode::from(1);
            }
        },
        None => Arc::new(TextLogger::stderr()),
    };

    match run(&opts, Arc::clone(&logger)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            logger.error("upload", &format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

/// Ok(false) when best-effort mode finished with failures.
fn run(opts: &ClientOpts, logger: Arc<dyn Logger>) -> Result<bool> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let settings = opts.settings();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    // Per-file failures were already logged by the driver
    let report = rt.block_on(client::run(&settings, logger))?;
    Ok(report.is_success())
}
