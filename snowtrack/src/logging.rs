//! Logging macros.
//!
//! With the `defmt` feature these forward to `defmt` (RTT on the target).
//! Without it they forward to the `log` facade on a host, so the library logs
//! through whatever logger a host binary or test installs. A bare-metal build
//! without `defmt` logs nothing. Format strings must stay valid for both back
//! ends: use `{}` and `{:?}` only.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
        ::log::trace!($($arg)*);
        #[cfg(all(not(feature = "defmt"), target_os = "none"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
        ::log::debug!($($arg)*);
        #[cfg(all(not(feature = "defmt"), target_os = "none"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
        ::log::info!($($arg)*);
        #[cfg(all(not(feature = "defmt"), target_os = "none"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
        ::log::warn!($($arg)*);
        #[cfg(all(not(feature = "defmt"), target_os = "none"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(all(not(feature = "defmt"), not(target_os = "none")))]
        ::log::error!($($arg)*);
        #[cfg(all(not(feature = "defmt"), target_os = "none"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

#[cfg(all(test, not(feature = "defmt")))]
mod tests {
    use std::sync::Mutex;

    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct Capture;

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Ok(mut lines) = LINES.lock() {
                lines.push(format!("{} {}", record.level(), record.args()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    #[test]
    fn host_builds_log_through_the_facade() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Trace);

        warn!("hub soft reset {} of {} failed", 2, 5);
        trace!("hub packet len {}", 21);

        let lines = LINES.lock().unwrap();
        assert!(lines.contains(&"WARN hub soft reset 2 of 5 failed".to_string()));
        assert!(lines.contains(&"TRACE hub packet len 21".to_string()));
    }
}
