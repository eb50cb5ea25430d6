use crate::domain::settings::{LogFormat, LogRotation, LogSettings};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Flushes buffered file output when dropped. Hold it until exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = settings.console.then(|| {
        formatted(
            &settings.format,
            std::io::stderr,
            settings.format.ansi_colors,
        )
    });

    let mut file_guard = None;
    let file_layer = settings.file.as_ref().map(|file| {
        let appender =
            RollingFileAppender::new(rotation(file.rotation), &file.directory, &file.prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        formatted(&settings.format, writer, false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        "Logging initialized, file output {}",
        if settings.file.is_some() { "on" } else { "off" }
    );

    Ok(LoggingGuard { _file: file_guard })
}

fn formatted<S, W>(
    format: &LogFormat,
    writer: W,
    ansi: bool,
) -> fmt::Layer<S, DefaultFields, Format, W>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(format.show_target)
        .with_file(format.show_file_line)
        .with_line_number(format.show_file_line)
        .with_thread_ids(format.show_thread_ids)
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}
