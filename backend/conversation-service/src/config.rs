use crypto_core::SessionTokens;
use db_pool::DbConfig;
use dotenvy::dotenv;
use std::env;
use std::fmt;

use crate::error::{AppError, AppResult};

pub const SERVICE_NAME: &str = "conversation-service";

/// Which relational store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local tables, lost on restart
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "CONVERSATION_STORE must be 'postgres' or 'memory', got '{other}'"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    /// Present whenever `store` is Postgres
    pub db: Option<DbConfig>,
    pub jwt_secret: String,
    pub jwt_audience: Option<String>,
    pub run_migrations: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store", &self.store)
            .field("db", &self.db)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_audience", &self.jwt_audience)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("PORT is not a valid port: {raw}")))?,
            Err(_) => 8080,
        };

        let store = match env::var("CONVERSATION_STORE") {
            Ok(raw) => StoreBackend::parse(&raw)?,
            Err(_) => StoreBackend::Postgres,
        };

        let db = match store {
            StoreBackend::Postgres => Some(DbConfig::from_env(SERVICE_NAME).map_err(AppError::Config)?),
            StoreBackend::Memory => None,
        };

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        let jwt_audience = env::var("JWT_AUDIENCE")
            .ok()
            .filter(|aud| !aud.trim().is_empty());

        let run_migrations = env::var("RUN_MIGRATIONS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        Ok(Self {
            host,
            port,
            store,
            db,
            jwt_secret,
            jwt_audience,
            run_migrations,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Token verifier for the auth middleware
    pub fn session_tokens(&self) -> AppResult<SessionTokens> {
        let tokens = SessionTokens::from_secret(&self.jwt_secret)
            .map_err(|e| AppError::Config(format!("JWT_SECRET: {e}")))?;
        Ok(match &self.jwt_audience {
            Some(aud) => tokens.with_audience(aud.clone()),
            None => tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "HOST",
        "PORT",
        "CONVERSATION_STORE",
        "DATABASE_URL",
        "JWT_SECRET",
        "JWT_AUDIENCE",
        "RUN_MIGRATIONS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_memory_store_defaults() {
        clear_env();
        env::set_var("CONVERSATION_STORE", "memory");
        env::set_var("JWT_SECRET", "test-secret-with-enough-bytes");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.db.is_none());
        assert!(config.run_migrations);
        assert!(config.session_tokens().is_ok());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_postgres_requires_database_url() {
        clear_env();
        env::set_var("JWT_SECRET", "test-secret-with-enough-bytes");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        env::set_var("DATABASE_URL", "postgres://localhost/conversations");
        env::set_var("RUN_MIGRATIONS", "false");
        let config = Config::from_env().unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
        assert!(!config.run_migrations);
        assert_eq!(config.db.unwrap().service_name, SERVICE_NAME);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_bad_values() {
        clear_env();
        env::set_var("CONVERSATION_STORE", "memory");
        assert!(Config::from_env().is_err(), "JWT_SECRET is required");

        env::set_var("JWT_SECRET", "test-secret-with-enough-bytes");
        env::set_var("PORT", "not-a-port");
        assert!(Config::from_env().is_err());

        env::set_var("PORT", "9000");
        env::set_var("CONVERSATION_STORE", "redis");
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_short_secret_and_redacted_debug() {
        clear_env();
        env::set_var("CONVERSATION_STORE", "memory");
        env::set_var("JWT_SECRET", "short");

        let config = Config::from_env().unwrap();
        assert!(config.session_tokens().is_err());
        assert!(!format!("{config:?}").contains("short"));
        clear_env();
    }
}
