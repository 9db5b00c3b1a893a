use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

/// Initialize a stdout subscriber at TRACE level, for tests and examples.
/// Ignores the "already set" error so it can be called from every test.
pub fn init_test_log() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize process-wide tracing. When `log_dir` is set, logs are
/// written to a daily-rolling file instead of stdout; the returned guard
/// must be kept alive for the lifetime of the process or buffered lines
/// are dropped on exit.
pub fn init_log(debug: bool, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "opentick.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(non_blocking)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    }
}
