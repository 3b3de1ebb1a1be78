use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

// [2024-01-01 12:00:00.000][INFO] message
const LOG_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)}][{l}] {m}{n}";

// Sends every record at `level` or above to both stdout and the log file at `path`.
// The file and its parent directories are created if needed.
pub fn configure_logger_with_level(
    path: &str,
    level: LevelFilter,
) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(path)?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("file")
                .build(level),
        )?;

    let handle = log4rs::init_config(config)?;
    Ok(handle)
}

pub fn configure_logger(path: &str) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    configure_logger_with_level(path, LevelFilter::Info)
}
