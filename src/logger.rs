use std::path::Path;
use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Clone, Copy)]
struct CustomTimer;

impl FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%m%dT%H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber: stdout always, plus a plain-text file when
/// `log_path` is given. `level` is an `EnvFilter` directive such as
/// `"info,auction=debug"`.
///
/// Keep the returned guard alive for the whole run, dropping it flushes the
/// file writer.
pub fn init(log_path: Option<&Path>, level: &str) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(CustomTimer)
        .with_writer(std::io::stdout)
        .with_filter(tracing_subscriber::EnvFilter::try_new(level)?);

    let (file_layer, guard) = match log_path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = std::fs::File::create(path)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(CustomTimer)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::EnvFilter::try_new(level)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
