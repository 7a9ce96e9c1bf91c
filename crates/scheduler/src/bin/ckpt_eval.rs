//! ckpt-eval binary entry point
//!
//! Usage:
//!   ckpt-eval --eval-all [OPTIONS] -- <evaluator command...>
//!   ckpt-eval --ckpt <path> [OPTIONS] -- <evaluator command...>
//!
//! Exit status is 0 on normal termination, 1 on a fatal error and 130 when
//! interrupted.

use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use tracing::{error, info};

use eval_core::EvalConfig;
use scheduler::app::{self, Outcome};
use scheduler::cli::Cli;
use scheduler::layout::OutputLayout;
use scheduler::telemetry;

const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_default_config {
        return match EvalConfig::default_toml() {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("ckpt-eval: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let (config, mode) = match cli.resolve_config().and_then(|c| Ok((c, cli.mode()?))) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("ckpt-eval: {e}");
            return ExitCode::FAILURE;
        }
    };

    let is_coordinator = config.distributed.is_coordinator();
    let log_dir = app::log_dir(&config, &mode);
    let log_file = if is_coordinator {
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => Some(log_dir.join(OutputLayout::log_file_name(Local::now()))),
            Err(e) => {
                eprintln!("ckpt-eval: cannot create {}: {e}", log_dir.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };
    let _guard = telemetry::init_tracing(is_coordinator, log_file.as_deref());

    info!(args = ?std::env::args().collect::<Vec<_>>(), "Starting ckpt-eval");
    info!(
        rank = config.distributed.rank,
        world_size = config.distributed.world_size,
        ?mode,
        "Run context"
    );
    info!(config = ?config, "Effective configuration");

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler; run until done
            std::future::pending::<()>().await;
        }
    };

    match app::run(&config, &mode, shutdown).await {
        Ok(Outcome::Completed) => {
            info!("Evaluation finished");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!(error = %e, "Evaluation aborted");
            eprintln!("ckpt-eval: {e}");
            ExitCode::FAILURE
        }
    }
}
