use super::{compilation::CompilationLogLevel, GlobalConfig};
use core::fmt::Display;
use hashbrown::HashSet;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

/// Configuration for logging in tilecl, parameterized by a log level type.
///
/// Note that you can use multiple loggers at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional crate-level logging configuration (e.g., info, debug, trace).
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this logger, determining verbosity.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Binary log level for enabling or disabling logging.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryLogLevel {
    /// Logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Logging is fully enabled.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for BinaryLogLevel {}

/// Writes compilation messages to every output enabled in the [global config](GlobalConfig).
#[derive(Debug)]
pub struct Logger {
    loggers: Vec<LoggerKind>,

    /// Global configuration for logging settings.
    pub config: Arc<GlobalConfig>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a new `Logger` instance based on the global configuration.
    ///
    /// Note that creating a logger opens the log file, if any.
    pub fn new() -> Self {
        Self::from_config(GlobalConfig::get())
    }

    /// Creates a logger for the given configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let mut loggers = Vec::new();
        let settings = &config.compilation.logger;

        if settings.level != CompilationLogLevel::Disabled {
            #[derive(Hash, PartialEq, Eq)]
            enum LoggerId {
                File(PathBuf),
                Stdout,
                Stderr,
                LogCrate(LogCrateLevel),
            }
            let mut registered = HashSet::<LoggerId>::new();

            if let Some(file) = &settings.file {
                if registered.insert(LoggerId::File(file.clone())) {
                    match FileLogger::new(file, settings.append) {
                        Ok(logger) => loggers.push(LoggerKind::File(logger)),
                        Err(err) => {
                            log::warn!("Can't open log file {}: {err}", file.display())
                        }
                    }
                }
            }
            if settings.stdout && registered.insert(LoggerId::Stdout) {
                loggers.push(LoggerKind::Stdout);
            }
            if settings.stderr && registered.insert(LoggerId::Stderr) {
                loggers.push(LoggerKind::Stderr);
            }
            if let Some(level) = settings.log {
                if registered.insert(LoggerId::LogCrate(level)) {
                    loggers.push(LoggerKind::Log(level));
                }
            }
        }

        Self { loggers, config }
    }

    /// Logs a message for compilation, directing it to all configured compilation loggers.
    pub fn log_compilation<S: Display>(&mut self, msg: &S) {
        match self.loggers.len() {
            0 => {}
            1 => self.loggers[0].log(msg),
            _ => {
                let msg = msg.to_string();
                for logger in self.loggers.iter_mut() {
                    logger.log(&msg);
                }
            }
        }
    }

    /// Returns the current compilation log level from the global configuration.
    pub fn log_level_compilation(&self) -> CompilationLogLevel {
        self.config.compilation.logger.level
    }
}

/// Represents different types of loggers.
#[derive(Debug)]
enum LoggerKind {
    /// Logs to a file.
    File(FileLogger),

    /// Logs to standard output.
    Stdout,

    /// Logs to standard error.
    Stderr,

    /// Logs using the `log` crate with a specified level.
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

/// Logger that writes messages to a file.
#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    fn new(path: &PathBuf, append: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    // Logs a message to the file, flushing the buffer to ensure immediate write.
    fn log<S: Display>(&mut self, msg: &S) {
        let result = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
        if let Err(err) = result {
            log::warn!("Can't write to the compilation log file: {err}");
        }
    }
}
