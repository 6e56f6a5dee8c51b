use std::{future::Future, path::Path, time::Duration};

use config::Config;
use consumer::Consumer;
use context::Context;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod config;
pub mod consumer;
pub mod context;
pub mod enrichment;
pub mod error;
pub mod gate;
pub mod publisher;
pub mod record;
pub mod registry;
pub mod retry;
pub mod store;
pub mod transport;

/// Rotated log files kept next to the active one.
pub const LOG_FILES_KEPT: usize = 5;

/// How long the runtime waits for blocking work once the worker has returned.
pub const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn log_format_is_json(format: Option<&str>) -> bool {
    match format {
        Some("json") => true,
        Some("text") | Some("pretty") => false,
        _ => !cfg!(debug_assertions),
    }
}

/// Opens a daily-rotated log file at `path`, keeping [`LOG_FILES_KEPT`] files.
///
/// Writes go through a background thread. Dropping the guard flushes it.
pub fn log_file_writer(path: &Path) -> eyre::Result<(NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| eyre::eyre!("log file path {} has no file name", path.display()))?;

    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global tracing subscriber.
///
/// The filter is read from `ENRICH_LOG`. Output is pretty-printed in debug
/// builds and JSON in release builds unless `ENRICH_LOG_FORMAT` says otherwise.
/// When `ENRICH_LOG_FILE` is set, the same events are also written to a rotated
/// file there; keep the returned guard alive until exit.
pub fn init_tracing() -> eyre::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_env_var("ENRICH_LOG")
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    let json = log_format_is_json(std::env::var("ENRICH_LOG_FORMAT").ok().as_deref());

    let console = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    };

    let (file, guard) = match std::env::var_os("ENRICH_LOG_FILE") {
        Some(path) => {
            let (writer, guard) = log_file_writer(Path::new(&path))?;
            let layer = if json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(guard)
}

/// Drives `fut` to completion on a fresh multi-threaded runtime.
///
/// Blocking tasks still running afterwards, such as enrichments abandoned by a
/// timed-out drain, get at most `grace` before the runtime is torn down.
pub fn execute<F: Future>(fut: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);

    Ok(output)
}

/// Resolves once SIGINT or SIGTERM is received.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Returns a builder for the worker process.
///
/// Without an explicit `config` it is loaded from the environment. Without an
/// explicit `shutdown` token the worker stops on SIGINT/SIGTERM.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Option<Config>, shutdown: Option<CancellationToken>) -> eyre::Result<()> {
    let config = match config {
        Some(config) => config,
        None => Config::load()?,
    };

    let context = Context::connect(&config).await?;

    let consumer = Consumer::builder()
        .context(context)
        .concurrency(config.concurrency)
        .max_retries(config.max_retries)
        .retry_delay(config.retry_delay())
        .drain_timeout(config.drain_timeout())
        .build();

    let shutdown = match shutdown {
        Some(token) => token,
        None => {
            let token = CancellationToken::new();
            tokio::spawn({
                let token = token.clone();
                async move {
                    shutdown_signal().await;
                    token.cancel();
                }
            });
            token
        }
    };

    let report = consumer.run(shutdown).await;

    if report.abandoned > 0 {
        tracing::warn!(
            abandoned = report.abandoned,
            "stopped with unfinished messages"
        );
    } else {
        tracing::info!("shutdown complete");
    }

    Ok(())
}
