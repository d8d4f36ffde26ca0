use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Subscriber settings taken from `RUST_LOG` and `LOG_FORMAT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub json: bool,
}

impl LogSettings {
    /// Load `.env` first so values set there apply to the subscriber too
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let filter = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self { filter, json }
    }
}

/// Install the global subscriber; `LOG_FORMAT=json` switches to JSON lines
pub fn init_tracing() {
    let settings = LogSettings::load();
    let env_filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if settings.json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_settings_pick_up_dotenv_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "LOG_FORMAT=json\nRUST_LOG=debug\n").unwrap();
        env::remove_var("LOG_FORMAT");
        env::remove_var("RUST_LOG");

        let previous = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();
        let settings = LogSettings::load();
        env::set_current_dir(previous).unwrap();
        env::remove_var("LOG_FORMAT");
        env::remove_var("RUST_LOG");

        assert!(settings.json);
        assert_eq!(settings.filter, "debug");
    }

    #[test]
    #[serial]
    fn test_settings_default_filter() {
        env::remove_var("LOG_FORMAT");
        env::remove_var("RUST_LOG");

        let settings = LogSettings::load();
        assert!(!settings.json);
        assert_eq!(settings.filter, DEFAULT_FILTER);
    }
}
