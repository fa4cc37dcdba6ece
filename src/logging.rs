//! Tracing subscriber setup for binaries and front ends

use crate::config::{Environment, LoggingConfig};
use tracing_subscriber::EnvFilter;

pub type InitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Directive used when neither `RUST_LOG` nor the config supplies one
pub fn default_directive(environment: Environment) -> &'static str {
    match environment {
        Environment::Local | Environment::Dev => "spinledger=debug",
        Environment::Prod => "spinledger=info",
    }
}

/// Install the global subscriber: text output locally, JSON in dev and prod.
/// Fails if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> InitResult {
    let directive = config
        .filter
        .clone()
        .unwrap_or_else(|| default_directive(config.environment).to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directive.into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match config.environment {
        Environment::Local => builder.try_init(),
        Environment::Dev | Environment::Prod => builder.json().try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directive(Environment::Local), "spinledger=debug");
        assert_eq!(default_directive(Environment::Prod), "spinledger=info");
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
