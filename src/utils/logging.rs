//! Setup for the Log4rs logging backend.
//!
//! Besides the main console + file logging this wires two dedicated,
//! non additive loggers:
//! - `traffic`: the packet tap, receiving per-packet dumps when the
//!   traffic dump is enabled in the configuration
//! - `audit`: account security records such as duplicate login events

use crate::config::{Config, TrafficDumpConfig};
use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    init_config,
};

/// The pattern to use when logging
const LOGGING_PATTERN: &str = "[{d} {h({l})} {M}] {m}{n}";

/// Log file name
pub const LOG_FILE_NAME: &str = "data/server.log";

/// Target used by the packet tap
pub const TRAFFIC_TARGET: &str = "traffic";

/// Target used by account security records
pub const AUDIT_TARGET: &str = "audit";

/// Setup function for setting up the Log4rs logging, configuring it
/// for all the different modules and setting up file and stdout logging
pub fn setup(config: &Config) {
    let logging_level = config.logging;
    if logging_level == LevelFilter::Off {
        // Don't initialize logger at all if logging is disabled
        return;
    }

    // Create logging appenders
    let pattern = Box::new(PatternEncoder::new(LOGGING_PATTERN));
    let console = Box::new(ConsoleAppender::builder().encoder(pattern.clone()).build());
    let file = Box::new(
        FileAppender::builder()
            .encoder(pattern.clone())
            .build(LOG_FILE_NAME)
            .expect("Unable to create logging file appender"),
    );

    const APPENDERS: [&str; 2] = ["stdout", "file"];

    let mut builder = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", console))
        .appender(Appender::builder().build("file", file))
        .logger(
            Logger::builder()
                .appenders(APPENDERS)
                .additive(false)
                .build("realm_auth", logging_level),
        );

    // Packet tap: only routed to its own file when enabled, otherwise
    // the traffic logger is muted entirely
    let TrafficDumpConfig { enable, ref file } = config.traffic_dump;
    if enable {
        let traffic = Box::new(
            FileAppender::builder()
                .encoder(pattern.clone())
                .build(file)
                .expect("Unable to create traffic dump appender"),
        );
        builder = builder
            .appender(Appender::builder().build("traffic-file", traffic))
            .logger(
                Logger::builder()
                    .appenders(["traffic-file"])
                    .additive(false)
                    .build(TRAFFIC_TARGET, LevelFilter::Debug),
            );
    } else {
        builder = builder.logger(
            Logger::builder()
                .additive(false)
                .build(TRAFFIC_TARGET, LevelFilter::Off),
        );
    }

    // Account security records go to their own file alongside stdout
    let audit = Box::new(
        FileAppender::builder()
            .encoder(pattern)
            .build(&config.audit.file)
            .expect("Unable to create audit appender"),
    );
    builder = builder
        .appender(Appender::builder().build("audit-file", audit))
        .logger(
            Logger::builder()
                .appenders(["audit-file", "stdout"])
                .additive(false)
                .build(AUDIT_TARGET, LevelFilter::Info),
        );

    let config = builder
        .build(
            Root::builder()
                .appenders(APPENDERS)
                .build(LevelFilter::Warn),
        )
        .expect("Failed to create logging config");

    init_config(config).expect("Unable to initialize logger");

    // Include panics in logging
    log_panics::init();
}
