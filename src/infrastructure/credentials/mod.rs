//! Per-platform credentials from the environment.
//!
//! Each configured platform reads two variables:
//! `ADBANDIT_<NAME>_API_KEY` (poller and bid updates) and
//! `ADBANDIT_<NAME>_WEBHOOK_SECRET` (signature verification). A platform
//! with no API key is skipped by the poller; a platform with no webhook
//! secret rejects all webhook posts. Missing credentials never crash the
//! engine.

use std::env;

/// Resolved credentials for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
}

impl PlatformCredentials {
    /// Read credentials for a platform name from the environment.
    pub fn from_env(platform: &str) -> Self {
        let prefix = platform.to_uppercase().replace('-', "_");
        Self {
            api_key: read_var(&format!("ADBANDIT_{prefix}_API_KEY")),
            webhook_secret: read_var(&format!("ADBANDIT_{prefix}_WEBHOOK_SECRET")),
        }
    }

    /// Whether the poller can run for this platform.
    pub fn can_poll(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether webhook posts can be verified for this platform.
    pub fn can_verify_webhooks(&self) -> bool {
        self.webhook_secret.is_some()
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_disable_capabilities() {
        let creds = PlatformCredentials {
            api_key: None,
            webhook_secret: None,
        };
        assert!(!creds.can_poll());
        assert!(!creds.can_verify_webhooks());
    }

    #[test]
    fn test_env_name_normalization() {
        // Hyphenated platform names map onto underscore env vars.
        std::env::set_var("ADBANDIT_META_ADS_API_KEY", "k");
        let creds = PlatformCredentials::from_env("meta-ads");
        assert_eq!(creds.api_key.as_deref(), Some("k"));
        std::env::remove_var("ADBANDIT_META_ADS_API_KEY");
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        std::env::set_var("ADBANDIT_BLANKTEST_API_KEY", "  ");
        let creds = PlatformCredentials::from_env("blanktest");
        assert!(creds.api_key.is_none());
        std::env::remove_var("ADBANDIT_BLANKTEST_API_KEY");
    }
}
