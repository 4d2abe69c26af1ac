//! EmberKV server binary: load configuration, install tracing, and serve
//! until interrupted.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ember_common::Config;
use ember_server::Server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            Config::from_toml_str(&text).context("parsing config file")?
        }
        None => Config::default(),
    };

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let io_workers = config.effective_io_threads(cores);
    info!(io_workers, "starting emberkv");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(io_workers)
        .enable_all()
        .build()
        .context("building runtime")?;

    runtime.block_on(async {
        let handle = Server::new(config).start().await?;
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        handle.shutdown().await;
        Ok(())
    })
}
