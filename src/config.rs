use std::path::PathBuf;

use tokio::time::Duration;

use crate::credentials::DEFAULT_ORIGIN;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_COOKIES_SOURCE: &str = "/etc/secrets/cookies.txt";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_CATALOG_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub cookies_source: PathBuf,
    pub cookies_scratch: PathBuf,
    pub auth_origin: String,
    pub yt_dlp_bin: String,
    pub yt_dlp_timeout: Duration,
    pub catalog_timeout: Duration,
    pub search_authenticated: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let seconds = |name: &str, default: u64| {
            text(name)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        Self {
            bind_addr: resolve_bind_addr(text("APP_ADDR"), text("PORT")),
            allowed_origins: text("ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            cookies_source: text("COOKIES_SOURCE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_SOURCE)),
            cookies_scratch: text("COOKIES_SCRATCH")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("cookies.txt")),
            auth_origin: text("AUTH_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
            yt_dlp_bin: text("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            yt_dlp_timeout: Duration::from_secs(seconds(
                "YT_DLP_TIMEOUT_SECONDS",
                DEFAULT_YT_DLP_TIMEOUT_SECONDS,
            )),
            catalog_timeout: Duration::from_secs(seconds(
                "CATALOG_TIMEOUT_SECONDS",
                DEFAULT_CATALOG_TIMEOUT_SECONDS,
            )),
            search_authenticated: text("SEARCH_AUTHENTICATED")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = app_addr {
        return configured;
    }

    let port = port
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    format!("0.0.0.0:{port}")
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]);

        assert_eq!(settings.bind_addr, "0.0.0.0:8000");
        assert!(settings.allowed_origins.is_empty());
        assert_eq!(settings.cookies_source, PathBuf::from("/etc/secrets/cookies.txt"));
        assert_eq!(settings.auth_origin, "https://music.youtube.com");
        assert_eq!(settings.yt_dlp_bin, "yt-dlp");
        assert_eq!(settings.yt_dlp_timeout, Duration::from_secs(60));
        assert!(!settings.search_authenticated);
    }

    #[test]
    fn app_addr_wins_over_port() {
        assert_eq!(settings(&[("PORT", "9000")]).bind_addr, "0.0.0.0:9000");
        assert_eq!(
            settings(&[("PORT", "9000"), ("APP_ADDR", "127.0.0.1:7000")]).bind_addr,
            "127.0.0.1:7000"
        );
        assert_eq!(settings(&[("PORT", "not-a-port")]).bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn parses_lists_flags_and_durations() {
        let settings = settings(&[
            ("ALLOWED_ORIGINS", " https://a.example , ,https://b.example"),
            ("SEARCH_AUTHENTICATED", "yes"),
            ("YT_DLP_TIMEOUT_SECONDS", "0"),
            ("CATALOG_TIMEOUT_SECONDS", "30"),
            ("COOKIES_SCRATCH", "/var/tmp/c.txt"),
        ]);

        assert_eq!(
            settings.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(settings.search_authenticated);
        assert_eq!(settings.yt_dlp_timeout, Duration::from_secs(60));
        assert_eq!(settings.catalog_timeout, Duration::from_secs(30));
        assert_eq!(settings.cookies_scratch, PathBuf::from("/var/tmp/c.txt"));
    }
}
