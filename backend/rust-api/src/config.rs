use serde::Deserialize;
use std::{env, path::PathBuf, str::FromStr};

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Browser origin allowed by CORS ("*" allows any origin)
    pub client_origin: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Redis is optional; rate limiting and login lockout are skipped without it
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub uploads: UploadConfig,
    pub jobs: JobsConfig,
    /// "username:password" expected on the /metrics endpoint
    pub metrics_auth: String,
    pub superuser_seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    pub payment_check_interval_secs: u64,
    pub notification_sweep_interval_secs: u64,
    pub section_sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            client_origin: "http://localhost:3000".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "schoolhub".to_string(),
            redis_uri: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_token_ttl_seconds: 3600,
            refresh_token_ttl_seconds: 2_592_000,
            uploads: UploadConfig {
                dir: PathBuf::from("uploads"),
                max_bytes: 20 * 1024 * 1024,
            },
            jobs: JobsConfig {
                enabled: true,
                payment_check_interval_secs: 3600,
                notification_sweep_interval_secs: 60,
                section_sweep_interval_secs: 60,
            },
            metrics_auth: "admin:changeme".to_string(),
            superuser_seed_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ::config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml first, APP__SECTION__KEY overrides on top
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(::config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    fn from_settings(
        settings: &::config::Config,
        app_env: &str,
    ) -> Result<Self, ::config::ConfigError> {
        let defaults = Config::default();

        let jwt_secret = match lookup(settings, "auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(::config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            None => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret
            }
        };

        let uploads = UploadConfig {
            dir: lookup(settings, "uploads.dir", "UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads.dir),
            max_bytes: lookup_parsed(settings, "uploads.max_bytes", "UPLOAD_MAX_BYTES")?
                .unwrap_or(defaults.uploads.max_bytes),
        };

        let jobs = JobsConfig {
            enabled: lookup_parsed(settings, "jobs.enabled", "JOBS_ENABLED")?
                .unwrap_or(defaults.jobs.enabled),
            payment_check_interval_secs: lookup_parsed(
                settings,
                "jobs.payment_check_interval_secs",
                "PAYMENT_CHECK_INTERVAL_SECS",
            )?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.jobs.payment_check_interval_secs),
            notification_sweep_interval_secs: lookup_parsed(
                settings,
                "jobs.notification_sweep_interval_secs",
                "NOTIFICATION_SWEEP_INTERVAL_SECS",
            )?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.jobs.notification_sweep_interval_secs),
            section_sweep_interval_secs: lookup_parsed(
                settings,
                "jobs.section_sweep_interval_secs",
                "SECTION_SWEEP_INTERVAL_SECS",
            )?
            .filter(|v| *v > 0)
            .unwrap_or(defaults.jobs.section_sweep_interval_secs),
        };

        Ok(Config {
            host: lookup(settings, "server.host", "HOST").unwrap_or(defaults.host),
            port: lookup_parsed(settings, "server.port", "PORT")?.unwrap_or(defaults.port),
            client_origin: lookup(settings, "server.client_origin", "CLIENT_ORIGIN")
                .unwrap_or(defaults.client_origin),
            mongo_uri: lookup(settings, "database.mongo_uri", "MONGO_URI")
                .unwrap_or(defaults.mongo_uri),
            mongo_database: lookup(settings, "database.mongo_database", "MONGO_DATABASE")
                .unwrap_or(defaults.mongo_database),
            redis_uri: lookup(settings, "redis.uri", "REDIS_URI"),
            jwt_secret,
            access_token_ttl_seconds: lookup_parsed(
                settings,
                "auth.access_token_ttl_seconds",
                "JWT_ACCESS_TOKEN_TTL_SECONDS",
            )?
            .unwrap_or(defaults.access_token_ttl_seconds),
            refresh_token_ttl_seconds: lookup_parsed(
                settings,
                "auth.refresh_token_ttl_seconds",
                "JWT_REFRESH_TOKEN_TTL_SECONDS",
            )?
            .unwrap_or(defaults.refresh_token_ttl_seconds),
            uploads,
            jobs,
            metrics_auth: lookup(settings, "metrics.auth", "METRICS_AUTH")
                .unwrap_or(defaults.metrics_auth),
            superuser_seed_file: lookup(settings, "superuser.seed_file", "SUPERUSER_SEED_FILE"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn lookup(settings: &::config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .filter(|value| !value.trim().is_empty())
}

fn lookup_parsed<T: FromStr>(
    settings: &::config::Config,
    key: &str,
    env_key: &str,
) -> Result<Option<T>, ::config::ConfigError> {
    match lookup(settings, key, env_key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ::config::ConfigError::Message(format!("Invalid value for {}: {}", env_key, raw))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn empty_settings() -> ::config::Config {
        ::config::Config::builder().build().unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults_apply_without_environment() {
        env::remove_var("PORT");
        env::remove_var("JWT_SECRET");
        let config = Config::from_settings(&empty_settings(), "dev").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert!(config.redis_uri.is_none());
        assert!(config.jobs.enabled);
    }

    #[test]
    #[serial]
    fn test_env_overrides_port_and_origin() {
        env::set_var("PORT", "8088");
        env::set_var("CLIENT_ORIGIN", "https://school.example");
        let config = Config::from_settings(&empty_settings(), "dev").unwrap();
        env::remove_var("PORT");
        env::remove_var("CLIENT_ORIGIN");

        assert_eq!(config.port, 8088);
        assert_eq!(config.client_origin, "https://school.example");
        assert_eq!(config.listen_addr(), "0.0.0.0:8088");
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_rejected() {
        env::set_var("PORT", "not-a-port");
        let result = Config::from_settings(&empty_settings(), "dev");
        env::remove_var("PORT");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_prod_requires_jwt_secret() {
        env::remove_var("JWT_SECRET");
        let result = Config::from_settings(&empty_settings(), "prod");
        assert!(result.is_err());
    }
}
