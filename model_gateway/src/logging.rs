use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "assistant-gateway.log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Keeps the file writer flushing; drop it only at process exit.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the filter. `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = parse_level(level).to_string().to_lowercase();
        EnvFilter::new(format!(
            "{level},assistant_gateway={level},data_connector={level},hyper=warn,reqwest=warn,h2=warn"
        ))
    })
}

/// Install the global subscriber: stdout always, plus a daily-rotated file
/// when `log_dir` is set.
pub fn init_logging(config: &LoggingConfig) -> LogGuard {
    let _ = LogTracer::init();

    let stdout_layer = if config.json {
        fmt::layer()
            .json()
            .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
            .with_current_span(false)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
            .with_target(true)
            .boxed()
    };

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    LogGuard {
        _file_guard: file_guard,
    }
}
