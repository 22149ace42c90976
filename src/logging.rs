use anyhow::{Context, Result};
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

// Log targets, one per subsystem. Each can be tuned on its own through the
// filter directive, e.g. `info,file_upload=debug,queue_tasks=debug`.
pub const FILE_UPLOAD: &str = "file_upload";
pub const ASSETS_INFO_AGGREGATION: &str = "assets_info_aggregation";
pub const QUEUE_TASKS: &str = "queue_tasks";

/// Target of the per-request span that carries `request_id`.
pub const HTTP_REQUEST: &str = "http_request";

/// Subsystems that get their own file, `<target>.log`.
pub const FILE_TARGETS: [&str; 3] = [FILE_UPLOAD, ASSETS_INFO_AGGREGATION, QUEUE_TASKS];

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Console output follows `RUST_LOG` or `default_directive`. With a log
/// directory, each subsystem target is also written at DEBUG level to its
/// own file. The returned guards flush the files and must live until exit.
pub fn init_tracing(default_directive: &str, log_dir: Option<&Path>) -> Result<Vec<WorkerGuard>> {
    let (files, guards) = match log_dir {
        Some(dir) => file_layers(dir)?,
        None => (Vec::new(), Vec::new()),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(files)
        .with(fmt::layer().with_filter(filter))
        .try_init()
        .context("Failed to install the tracing subscriber")?;
    Ok(guards)
}

pub fn file_layers(dir: &Path) -> Result<(Vec<BoxedLayer>, Vec<WorkerGuard>)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let mut layers = Vec::with_capacity(FILE_TARGETS.len());
    let mut guards = Vec::with_capacity(FILE_TARGETS.len());
    for target in FILE_TARGETS {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(format!("{}.log", target))
            .build(dir)
            .with_context(|| format!("Failed to open the {} log file", target))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        // The request span is let through so its request_id shows on each line
        let targets = Targets::new()
            .with_target(target, LevelFilter::DEBUG)
            .with_target(HTTP_REQUEST, LevelFilter::INFO);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(targets)
                .boxed(),
        );
        guards.push(guard);
    }
    Ok((layers, guards))
}
