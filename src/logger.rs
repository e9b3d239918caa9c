use crate::errors::ProviderError;
use crate::session::SESSION_LOG_TARGET;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: usize = 7;

pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, ProviderError> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)
        .map_err(|e| ProviderError::Logging(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Builds the file logging config: everything to `app.log`, session lifecycle events
/// additionally to `sessions.log`.
///
/// # Errors
/// Returns an error if `dir` cannot be created or an appender cannot open its file.
pub fn file_config(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<Config, ProviderError> {
    let base = match dir {
        Some(d) => PathBuf::from(d),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(DEFAULT_RETENTION)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);

    let app = rolling(&base, "app", keep)?;
    let sessions = rolling(&base, "sessions", keep)?;
    Config::builder()
        .appender(Appender::builder().build("app", Box::new(app)))
        .appender(Appender::builder().build("sessions", Box::new(sessions)))
        .logger(Logger::builder().appender("sessions").build(SESSION_LOG_TARGET, lvl))
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| ProviderError::Logging(e.to_string()))
}

/// Configure file logging globally for the process.
/// - dir: base directory for logs; if None, current directory.
/// - level: error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
///
/// # Errors
/// Returns [`ProviderError::Logging`] if a logger is already installed.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<(), ProviderError> {
    let config = file_config(dir, level, retention)?;
    log4rs::init_config(config).map_err(|e| ProviderError::Logging(e.to_string()))?;
    Ok(())
}

/// Logs to stderr only.
///
/// # Errors
/// Returns [`ProviderError::Logging`] if a logger is already installed.
pub fn configure_console(level: Option<&str>) -> Result<(), ProviderError> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(parse_level(level)))
        .map_err(|e| ProviderError::Logging(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| ProviderError::Logging(e.to_string()))?;
    Ok(())
}

/// Configure logging from environment variables:
/// - SEARCH_PROVIDER_LOG_DIR (console logging when unset)
/// - SEARCH_PROVIDER_LOG_LEVEL
/// - SEARCH_PROVIDER_LOG_RETENTION
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), ProviderError> {
    let dir = std::env::var("SEARCH_PROVIDER_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("SEARCH_PROVIDER_LOG_LEVEL").ok();
    let retention =
        std::env::var("SEARCH_PROVIDER_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    match dir {
        Some(d) => configure_logging(Some(&d), level.as_deref(), retention),
        None => configure_console(level.as_deref()),
    }
}
