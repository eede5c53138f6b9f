use log::{LevelFilter, SetLoggerError};
use simple_logger::SimpleLogger;

/// Installs the process wide logger. Every line carries a timestamp, node
/// prefixes come from the call sites.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    SimpleLogger::new().with_level(level).init()
}

/// Like [`init`], but a logger installed earlier (e.g. by another test) is
/// kept.
pub fn try_init(level: LevelFilter) {
    let _ = init(level);
}
