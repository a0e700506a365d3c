/// Log an unrecoverable runtime fault and abort the process.
///
/// Used where continuing would mean running on an undefined stack or
/// machine context, so unwinding is not an option.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!("fatal: {}", message);
        eprintln!("spindle fatal: {}", message);
        std::process::abort()
    }};
}
