use clap::Parser;
use todo_sync::config::Config;
use todo_sync::daemon;
use todo_sync::error::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "todo-syncd")]
#[command(about = "Todo list daemon with calendar feed import")]
struct Cli {
    /// JSON config file.
    #[arg(long, env = "TODO_SYNC_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "TODO_SYNC_HOST")]
    host: Option<String>,

    #[arg(long, env = "TODO_SYNC_PORT")]
    port: Option<u16>,

    #[arg(long, env = "TODO_SYNC_DB")]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,todo_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_overrides(cli.host, cli.port, cli.db);

    daemon::run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await
}
