use std::env;
use tracing::warn;

/// Default STUN server used when STUN_URLS is not provided.
/// Matches the configuration shipped with the web client.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub signaling_url: String,
    pub api_base_url: String,
    pub stun_urls: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            signaling_url: env::var("SIGNALING_URL")
                .unwrap_or_else(|_| {
                    warn!("SIGNALING_URL not set, using empty value");
                    String::new()
                }),
            api_base_url: env::var("EXPERTEASE_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("EXPERTEASE_API_BASE_URL not set, using empty value");
                    String::new()
                }),
            stun_urls: env::var("STUN_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| {
                    warn!("STUN_URLS not set, using default");
                    vec![DEFAULT_STUN_URL.to_string()]
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.signaling_url.is_empty() && !self.api_base_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_when_urls_missing() {
        let config = AppConfig {
            signaling_url: String::new(),
            api_base_url: "http://localhost:3000".to_string(),
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
        };
        assert!(!config.is_configured());
    }

    #[test]
    fn test_configured_with_urls() {
        let config = AppConfig {
            signaling_url: "ws://localhost:9000/ws".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            stun_urls: vec![DEFAULT_STUN_URL.to_string()],
        };
        assert!(config.is_configured());
    }
}
