//! `log` crate backend (ambient stack): routes every `log::info!`/`warn!`/
//! etc. call to the COM1 serial port [`crate::arch::x86_64::serial`] is
//! already writing `println!` output to, tagged with level and target.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let level_tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::serial_println!("[{level_tag}] {}: {}", record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Install the serial-backed logger as the global `log` sink. Must run once,
/// before the first log call, after the serial port is usable (any point
/// after [`crate::arch::x86_64::init`]).
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .expect("logger installed twice");
}
