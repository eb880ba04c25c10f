//! Minimal logger for the testbench driver.
//!
//! Execution-trace records print bare, so `--trace` output is exactly the
//! simulator's per-instruction line format; everything else gets a level
//! prefix.

use log::{Level, LevelFilter, Metadata, Record};

struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Trace {
            println!("{}", record.args());
        } else {
            println!("[{}] {}", level_display(record.level()), record.args());
        }
    }

    fn flush(&self) {}
}

fn level_display(level: Level) -> &'static str {
    match level {
        Level::Error => "Error",
        Level::Warn => "Warn",
        Level::Info => "Info",
        Level::Debug => "Debug",
        Level::Trace => "Trace",
    }
}

/// Installs the logger with the given filter. Must be called at most once.
pub fn init(level: LevelFilter) {
    static LOGGER: Logger = Logger {};
    log::set_logger(&LOGGER).expect("logger is installed only once");
    log::set_max_level(level);
}
