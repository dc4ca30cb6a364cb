//! Server configuration loaded from the environment.

/// Top-level server configuration.
///
/// Component-specific tuning (poll intervals, channel capacities) lives with
/// the components; this only covers what the process needs at boot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Request body size limit in bytes
    pub body_limit: usize,
    /// SQLite database URL
    pub database_url: String,
    /// Directory for log files
    pub log_dir: String,
    /// HMAC secret for validating dashboard JWTs (minting is external)
    pub jwt_secret: Option<String>,
    /// Base64 32-byte key for sealing secret system settings
    pub settings_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12650,
            enable_cors: true,
            body_limit: 4 * 1024 * 1024, // 4MB; command payloads are bounded
            database_url: "sqlite:manlab.db?mode=rwc".to_string(),
            log_dir: "logs".to_string(),
            jwt_secret: None,
            settings_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `MANLAB_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `MANLAB_PORT` (e.g. "8080")
    /// - `DATABASE_URL`
    /// - `LOG_DIR`
    /// - `MANLAB_JWT_SECRET`
    /// - `MANLAB_SETTINGS_KEY` (base64, 32 bytes)
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("MANLAB_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("MANLAB_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        if let Ok(url) = std::env::var("DATABASE_URL")
            && !url.trim().is_empty()
        {
            config.database_url = url;
        }

        if let Ok(dir) = std::env::var("LOG_DIR")
            && !dir.trim().is_empty()
        {
            config.log_dir = dir;
        }

        if let Ok(secret) = std::env::var("MANLAB_JWT_SECRET")
            && !secret.trim().is_empty()
        {
            config.jwt_secret = Some(secret);
        }

        if let Ok(key) = std::env::var("MANLAB_SETTINGS_KEY")
            && !key.trim().is_empty()
        {
            config.settings_key = Some(key);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 12650);
        assert!(config.enable_cors);
        assert!(config.jwt_secret.is_none());
    }
}
