use crate::Result;

/// Initialize tracing for the process.
///
/// Filter comes from `RUST_LOG`; otherwise info for the workspace crates and
/// warn for everything else. Safe to call more than once.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,telepoll=info,telepoll_core=info,telepoll_telegram=info,{service_name}=info"
        ))
    });

    // A second init only fails because a global subscriber is already set.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
