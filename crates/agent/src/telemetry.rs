//! Opt-in tracing setup for binaries embedding the agent

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use voice_loop_config::ObservabilityConfig;

/// Install a global subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns false if a
/// subscriber was already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        format!("voice_loop={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).try_init().is_ok()
}
