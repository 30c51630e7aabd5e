use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::Span;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Debug and trace output spans the library crates and their worker
    /// threads, so it names both.
    fn is_diagnostic(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

/// Install the stderr subscriber. Library crates only emit events; this is
/// the one place that decides where they go.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(level.is_diagnostic())
        .with_thread_names(level.is_diagnostic());

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().with_current_span(true).try_init();
        }
    }
}

/// Span carried by every CLI log line about one endpoint.
///
/// Endpoint handlers run on the endpoint's worker threads, so handlers that
/// log clone this span and enter it themselves.
pub fn endpoint_span(kind: &'static str, id: &str) -> Span {
    tracing::info_span!("endpoint", kind, id = %id)
}
