use tracing_subscriber::EnvFilter;

/// Crates whose debug output drowns the hub's own.
const QUIET_CRATES: [&str; 3] = ["sled", "tokio_tungstenite", "tungstenite"];

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };

    let mut directive = level.to_string();
    for krate in QUIET_CRATES {
        directive.push_str(&format!(",{krate}=warn"));
    }
    directive
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    // try_init: the hub tests and the binary may both call this
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
