// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment (Cloud Run
//! secret bindings), fetched once at startup and cached in memory.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL for CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Payment transfer gateway base URL
    pub payment_gateway_url: String,
    /// Push notification gateway base URL
    pub push_gateway_url: String,
    /// UTC offset (hours) of the platform reference timezone used for all
    /// calendar-day decisions (daily limits, streaks, dedup keys)
    pub platform_utc_offset_hours: i32,
    /// Quiet hours window (local hours, start inclusive / end exclusive);
    /// non-critical notifications are suppressed inside it
    pub quiet_hours_start: u32,
    pub quiet_hours_end: u32,
    /// Whether an academy's custom per-check-in rate still respects the
    /// plan-level min/max clamps (policy knob, default false)
    pub custom_rate_respects_clamps: bool,

    // --- Secrets (injected via env) ---
    /// JWT signing key for session token verification (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Shared token for internal operator endpoints
    pub internal_api_token: String,
    /// Unguessable path segment for the payment gateway webhook
    pub webhook_path_uuid: String,
    /// Payment gateway API key
    pub payment_api_key: String,
    /// Push gateway API key
    pub push_api_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            // Non-sensitive config from env
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL")
                .map_err(|_| ConfigError::Missing("PAYMENT_GATEWAY_URL"))?,
            push_gateway_url: env::var("PUSH_GATEWAY_URL")
                .map_err(|_| ConfigError::Missing("PUSH_GATEWAY_URL"))?,
            platform_utc_offset_hours: env::var("PLATFORM_UTC_OFFSET_HOURS")
                .unwrap_or_else(|_| "-3".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("PLATFORM_UTC_OFFSET_HOURS"))?,
            quiet_hours_start: env::var("QUIET_HOURS_START")
                .unwrap_or_else(|_| "22".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("QUIET_HOURS_START"))?,
            quiet_hours_end: env::var("QUIET_HOURS_END")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("QUIET_HOURS_END"))?,
            custom_rate_respects_clamps: env::var("CUSTOM_RATE_RESPECTS_CLAMPS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            // Secrets - injected as env vars by the deployment
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            internal_api_token: env::var("INTERNAL_API_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("INTERNAL_API_TOKEN"))?,
            webhook_path_uuid: env::var("WEBHOOK_PATH_UUID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_PATH_UUID"))?,
            payment_api_key: env::var("PAYMENT_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("PAYMENT_API_KEY"))?,
            push_api_key: env::var("PUSH_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("PUSH_API_KEY"))?,
        })
    }

    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            payment_gateway_url: "http://localhost:9090".to_string(),
            push_gateway_url: "http://localhost:9091".to_string(),
            platform_utc_offset_hours: -3,
            quiet_hours_start: 22,
            quiet_hours_end: 8,
            custom_rate_respects_clamps: false,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            internal_api_token: "test_internal_token".to_string(),
            webhook_path_uuid: "test-webhook-uuid".to_string(),
            payment_api_key: "test_payment_key".to_string(),
            push_api_key: "test_push_key".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("PAYMENT_GATEWAY_URL", "http://localhost:9090");
        env::set_var("PUSH_GATEWAY_URL", "http://localhost:9091");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("INTERNAL_API_TOKEN", "internal");
        env::set_var("WEBHOOK_PATH_UUID", "uuid");
        env::set_var("PAYMENT_API_KEY", "pay_key");
        env::set_var("PUSH_API_KEY", "push_key");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.payment_gateway_url, "http://localhost:9090");
        assert_eq!(config.internal_api_token, "internal");
        assert_eq!(config.port, 8080);
        assert_eq!(config.platform_utc_offset_hours, -3);
        assert!(!config.custom_rate_respects_clamps);
    }
}
