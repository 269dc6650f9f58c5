//! Sidecar Bot

mod config;
mod publish;
mod sidecar;

use anyhow::{Context, Result}; // alias std::result::Result with dynamic error type
use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::stream::StreamExt;
use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tide::listener::Listener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sidecar_prometheus::debug::DEBUG;
use sidecar_prometheus::error::debug_error_enabled;
use sidecar_prometheus::scrape::{RetryPolicy, ScrapeTarget};

use crate::config::Config;
use crate::publish::Published;
use crate::sidecar::Sidecar;

/// The program's main entry point.
fn main() -> Result<()> {
    init_logging()?;
    let config = Config::load()?;

    let (send_shutdown, recv_shutdown) = oneshot::channel::<()>();

    // When we receive a SIGINT (or SIGTERM) signal, begin exiting.
    let signal_once = Cell::new(Some(send_shutdown));
    ctrlc::set_handler(move || {
        // The first time we receive the signal, shutdown gracefully
        if let Some(sender) = signal_once.take() {
            sender.send(()).ok();
        }
        // The second time we receive the signal, shutdown immediately
        else {
            std::process::exit(1);
        }
    })?;

    // Start the main event loop
    async_std::task::block_on(run(config, recv_shutdown))
}

/// Logs to stderr, filtered by `RUST_LOG` or else `LOG_LEVEL` (default "info")
fn init_logging() -> Result<()> {
    let level = dotenv::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .context("invalid LOG_LEVEL")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(anyhow::Error::msg)
}

/// The main thread's event loop
async fn run(config: Config, shutdown: oneshot::Receiver<()>) -> Result<()> {
    debug_error_enabled(config.debug);

    // Serve the published text; it is empty until the first scrape completes
    let published = Arc::new(Published::new());
    let addr = format!("0.0.0.0:{}", config.listen_port);
    let mut listener = publish::app(Arc::clone(&published), &config.publish_path)
        .bind(addr.clone())
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("publishing on http://{}{}", addr, config.publish_path);
    let server = async_std::task::spawn(async move {
        listener.accept().await.context("serving published metrics")?;
        Err::<(), _>(anyhow::format_err!("publish server stopped"))
    });

    // Every debug interval, log debug information
    let debug_interval = match config.debug_interval {
        Some(duration) => Some(async_std::task::spawn(async move {
            let mut interval = async_std::stream::interval(duration);
            while let Some(_) = interval.next().await {
                DEBUG.publish();
            }
        })),
        None => None,
    };

    let target = config.scrape_target();
    let interval = config.interval();
    info!(
        rules = config.rules.len(),
        "scraping {} every {:?}", target.url, interval
    );
    let sidecar = Sidecar::new(config.rules, config.query_interval);
    let poll = Box::pin(poll(
        target,
        config.scrape_retry,
        interval,
        sidecar,
        published,
    ));

    let result = until_stopped(poll, server, shutdown).await;
    if let Some(debug_interval) = debug_interval {
        debug_interval.cancel().await;
    }

    result
}

/// Runs until the process is killed, scraping fails for good, or the publish server stops
async fn until_stopped<P, S>(poll: P, server: S, shutdown: oneshot::Receiver<()>) -> Result<()>
where
    P: Future<Output = Result<()>> + Unpin,
    S: Future<Output = Result<()>> + Unpin,
{
    match future::select(future::select(poll, server), shutdown).await {
        Either::Left((Either::Left((result, _)), _))
        | Either::Left((Either::Right((result, _)), _)) => result,
        Either::Right(_) => {
            info!("shutting down");
            Ok(())
        }
    }
}

/// Every QUERY_INTERVAL (at most), scrape the target, derive metrics and publish them
async fn poll(
    target: ScrapeTarget,
    retry: RetryPolicy,
    interval: Duration,
    mut sidecar: Sidecar,
    published: Arc<Published>,
) -> Result<()> {
    loop {
        let start = Instant::now();

        let body = target
            .scrape_with_retry(retry)
            .await
            .with_context(|| format!("scraping {} failed after {} retries", target.url, retry.retries))?;
        let text = sidecar.tick(&body).context("parsing scraped metrics")?;
        published.store(text);

        // Sleep until the next query interval
        if let Some(delay) = interval.checked_sub(start.elapsed()) {
            async_std::task::sleep(delay).await;
        }
    }
}
