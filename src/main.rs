#![windows_subsystem = "windows"]
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;

use clap::Parser;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use runrun_core::config::Settings;
use runrun_core::protocol;

#[tokio::main]
async fn main() -> ExitCode {
    // .env é opcional
    let _ = dotenvy::dotenv();

    // stdout é do protocolo; logs vão para stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let settings = Settings::parse();
    if let Err(e) = settings.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!(base_url = %settings.base_url, "runrun-core ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                error!("failed to read stdin: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let result = AssertUnwindSafe(protocol::handle(&settings, &line))
            .catch_unwind()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(_) => serde_json::json!({
                "status": "error",
                "message": "internal core error"
            })
            .to_string(),
        };

        if stdout.write_all(format!("{response}\n").as_bytes()).await.is_err() {
            break;
        }

        let _ = stdout.flush().await;
    }

    ExitCode::SUCCESS
}
