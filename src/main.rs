use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use checkout_engine::Checkout;
use checkout_engine::clock::SystemClock;
use checkout_engine::config::Config;
use checkout_engine::csv::{read_commands, write_report};
use checkout_engine::script::ScriptRunner;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        error!("usage: checkout-engine <script.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let commands = match read_commands(path.clone()) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let checkout = Arc::new(Checkout::demo(&config, Arc::new(SystemClock)));
    let mut runner = ScriptRunner::new(checkout);
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(cmd) => {
                    if cmd_sender.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    runner.run(ReceiverStream::new(cmd_receiver)).await;

    if let Err(e) = write_report(runner.report()) {
        error!("failed to write report: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
