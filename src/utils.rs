use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};

/// Opt-in terminal logger for hosts and examples that want the engine's
/// `info!`/`debug!` trace. Safe to call more than once; later calls are
/// no-ops.
pub fn init_terminal_logger(level: LevelFilter) {
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

/// Parse a log-level string the way hosting environments usually pass it.
pub fn level_from_str(level: &str) -> LevelFilter {
    match level {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing_defaults_to_info() {
        assert_eq!(level_from_str("debug"), LevelFilter::Debug);
        assert_eq!(level_from_str("garbage"), LevelFilter::Info);
    }

    #[test]
    fn test_double_init_is_harmless() {
        init_terminal_logger(LevelFilter::Warn);
        init_terminal_logger(LevelFilter::Warn);
    }
}
