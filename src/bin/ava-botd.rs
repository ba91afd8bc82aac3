use std::path::PathBuf;

use ava_bot::config::Config;
use ava_bot::daemon;
use ava_bot::error::Result;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ava-botd")]
#[command(about = "Ava HTTP daemon: auth, chat and payment webhooks")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7878)]
    port: u16,

    #[arg(long, env = "AVA_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides users.sqlite_path from the config.
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    ava_bot::logging::init_tracing("ava_botd");
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.users.get_or_insert_with(Default::default).sqlite_path = Some(db);
    }

    daemon::run_with_shutdown(&cli.host, cli.port, config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
}
