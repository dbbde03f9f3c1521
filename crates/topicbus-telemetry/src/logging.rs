//! Logging configuration and setup.
//!
//! Two sinks run side by side: a console sink that is always installed and a
//! rotating file sink that is on by default. Each sink filters with its own
//! level, so a process can keep the terminal quiet while the log files
//! capture debug output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{TelemetryError, TelemetryResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// File rotation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// Start a new file every day.
    Daily,
    /// Start a new file every hour (default).
    #[default]
    Hourly,
    /// Start a new file every minute.
    Minutely,
    /// Write a single file.
    Never,
}

impl FileRotation {
    fn as_rotation(self) -> Rotation {
        match self {
            Self::Daily => Rotation::DAILY,
            Self::Hourly => Rotation::HOURLY,
            Self::Minutely => Rotation::MINUTELY,
            Self::Never => Rotation::NEVER,
        }
    }
}

/// Line format of a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON, one object per line.
    Json,
    /// Single line with every field (default).
    #[default]
    Full,
}

/// Terminal stream the console sink writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    /// Standard output.
    Stdout,
    /// Standard error (default).
    #[default]
    Stderr,
}

/// Console sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLogConfig {
    /// Level filter for terminal output (e.g. "info", "topicbus=trace").
    #[serde(default = "default_level")]
    pub level: String,
    /// Stream to write to.
    #[serde(default)]
    pub stream: ConsoleStream,
    /// Line format.
    #[serde(default)]
    pub format: LogFormat,
    /// Colorize output.
    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            stream: ConsoleStream::default(),
            format: LogFormat::default(),
            ansi: true,
        }
    }
}

/// Rotating file sink. Files are never colorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Level filter for file output.
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory holding the log files. Created on setup.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// File name prefix (e.g. "app" produces "app.2024-01-15-09.log").
    #[serde(default = "default_file_prefix")]
    pub prefix: String,
    /// Rotation strategy.
    #[serde(default)]
    pub rotation: FileRotation,
    /// Rotated files to keep (0 = unlimited).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Line format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: default_directory(),
            prefix: default_file_prefix(),
            rotation: FileRotation::default(),
            max_files: default_max_files(),
            format: LogFormat::default(),
        }
    }
}

/// Logging configuration for both sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Terminal sink.
    #[serde(default)]
    pub console: ConsoleLogConfig,
    /// File sink; `None` disables file output.
    #[serde(default = "default_file_sink")]
    pub file: Option<FileLogConfig>,
    /// Prefix lines with a timestamp.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Include source file and line.
    #[serde(default)]
    pub source_location: bool,
    /// Extra directives added to both sinks (e.g. `hyper=warn`).
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("./log")
}

fn default_file_prefix() -> String {
    "app".to_string()
}

fn default_max_files() -> usize {
    24
}

#[allow(clippy::unnecessary_wraps)]
fn default_file_sink() -> Option<FileLogConfig> {
    Some(FileLogConfig::default())
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: ConsoleLogConfig::default(),
            file: default_file_sink(),
            timestamps: true,
            source_location: false,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Both sinks at `level`, file output in `./log`.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        let level = level.into();
        let mut config = Self::default();
        if let Some(file) = config.file.as_mut() {
            file.level.clone_from(&level);
        }
        config.console.level = level;
        config
    }

    /// Console only.
    #[must_use]
    pub fn console_only(level: impl Into<String>) -> Self {
        Self::new(level).without_file()
    }

    /// Set the console level.
    #[must_use]
    pub fn with_console_level(mut self, level: impl Into<String>) -> Self {
        self.console.level = level.into();
        self
    }

    /// Set the file level. Turns file output on with defaults if it was off.
    #[must_use]
    pub fn with_file_level(mut self, level: impl Into<String>) -> Self {
        self.file.get_or_insert_with(FileLogConfig::default).level = level.into();
        self
    }

    /// Write the console sink to `stream`.
    #[must_use]
    pub fn with_console_stream(mut self, stream: ConsoleStream) -> Self {
        self.console.stream = stream;
        self
    }

    /// Set the format of both sinks.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.console.format = format;
        if let Some(file) = self.file.as_mut() {
            file.format = format;
        }
        self
    }

    /// Write rotating files named `prefix` into `directory`.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotation: FileRotation,
    ) -> Self {
        let file = self.file.get_or_insert_with(FileLogConfig::default);
        file.directory = directory.into();
        file.prefix = prefix.into();
        file.rotation = rotation;
        self
    }

    /// Keep at most `max_files` rotated files (0 = unlimited).
    #[must_use]
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.file.get_or_insert_with(FileLogConfig::default).max_files = max_files;
        self
    }

    /// Turn file output off.
    #[must_use]
    pub fn without_file(mut self) -> Self {
        self.file = None;
        self
    }

    /// Add a directive to both sinks.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Drop timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include source file and line.
    #[must_use]
    pub fn with_source_location(mut self) -> Self {
        self.source_location = true;
        self
    }

    /// Turn console colors off.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.console.ansi = false;
        self
    }

    fn filter(&self, level: &str) -> TelemetryResult<EnvFilter> {
        self.directives.iter().try_fold(
            EnvFilter::try_new(level).map_err(|e| TelemetryError::ConfigError(e.to_string()))?,
            |filter, directive| {
                directive
                    .parse()
                    .map(|d| filter.add_directive(d))
                    .map_err(|e: tracing_subscriber::filter::ParseError| {
                        TelemetryError::ConfigError(format!("{directive}: {e}"))
                    })
            },
        )
    }

    fn fmt_layer<W>(&self, writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_file(self.source_location)
            .with_line_number(self.source_location);

        match (format, self.timestamps) {
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
            (LogFormat::Full, true) => layer.boxed(),
            (LogFormat::Full, false) => layer.without_time().boxed(),
        }
    }

    /// Build one filtered layer per enabled sink.
    fn layers(&self) -> TelemetryResult<Vec<BoxedLayer>> {
        let console = &self.console;
        let console_layer = match console.stream {
            ConsoleStream::Stdout => self.fmt_layer(std::io::stdout, console.format, console.ansi),
            ConsoleStream::Stderr => self.fmt_layer(std::io::stderr, console.format, console.ansi),
        };
        let mut layers = vec![console_layer.with_filter(self.filter(&console.level)?).boxed()];

        if let Some(file) = &self.file {
            let layer = self.fmt_layer(file_appender(file)?, file.format, false);
            layers.push(layer.with_filter(self.filter(&file.level)?).boxed());
        }

        Ok(layers)
    }
}

/// Create the rolling file appender for a file sink, creating its directory
/// if needed.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the appender
/// cannot be initialized.
pub fn file_appender(file: &FileLogConfig) -> TelemetryResult<RollingFileAppender> {
    std::fs::create_dir_all(&file.directory)?;

    let mut builder = RollingFileAppender::builder()
        .rotation(file.rotation.as_rotation())
        .filename_prefix(&file.prefix)
        .filename_suffix("log");
    if file.max_files > 0 {
        builder = builder.max_log_files(file.max_files);
    }

    builder
        .build(&file.directory)
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Only the first call in a process succeeds.
///
/// # Errors
///
/// Returns an error if a level or directive does not parse, the log
/// directory cannot be created, or a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    tracing_subscriber::registry()
        .with(config.layers()?)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))?;

    tracing::debug!(
        console_level = %config.console.level,
        file_level = config.file.as_ref().map(|f| f.level.as_str()),
        log_dir = config.file.as_ref().map(|f| f.directory.display().to_string()),
        "Logging initialized"
    );
    Ok(())
}

/// Install the default subscriber: info to stderr and to hourly files in
/// `./log`.
///
/// # Errors
///
/// Returns an error if logging cannot be initialized.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}
