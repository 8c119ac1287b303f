mod broadcast;
mod cache;
mod capture;
mod cli;
mod control;
mod protocol;
mod room;
mod server;
mod settings;

use anyhow::{Context, Result};

use cli::Cli;
use server::{Server, ServerContext};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glimpse=info".into()),
        )
        .init();

    let cli = Cli::parse_args();

    let settings = Settings {
        fps: cli.fps,
        width: cli.width,
        height: cli.height,
        quality: cli.quality,
        monitor: cli.monitor,
    };
    settings.validate().context("invalid capture settings")?;

    let ctx = ServerContext::new(settings, cli.test_pattern);
    let server = Server::new(format!("{}:{}", cli.host, cli.port), ctx.clone());

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            ctx.capture.stop_async().await;
        }
    }

    Ok(())
}
