use std::process::Output;
use tracing_subscriber::{EnvFilter, fmt};

/// Test subscriber honoring `AGENTLAB_LOG`, with the binary crate at debug.
pub fn init_test_logging() {
    let filter = std::env::var("AGENTLAB_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
        .add_directive("agentlab=debug".parse().unwrap());
    let _ = fmt().with_test_writer().with_env_filter(filter).try_init();
}

/// Log one finished CLI run so failures show what the binary printed.
pub fn log_run(args: &[&str], output: &Output) {
    crate::test_log!(
        "RUN: agentlab {} -> {:?}\nstdout: {}\nstderr: {}",
        args.join(" "),
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
