use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use upload::cli::ServerOpts;
use upload::logger::{Logger, TextLogger};
use upload::server::Server;

fn main() -> ExitCode {
    let opts = ServerOpts::parse();
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
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error("startup", &format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

fn run(opts: &ServerOpts, logger: Arc<dyn Logger>) -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Shutting down uploadd (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let settings = opts.settings();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let server = Server::bind(&settings, logger).await?;
        server.run().await
    })
}
