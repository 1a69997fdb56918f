//! Strongly-typed configuration for a verification run.
//!
//! Values come from defaults, from environment variables (after loading a
//! `.env` file if present), or from explicit field updates. Everything that
//! varies between machines lives here; everything that varies between
//! verification tasks lives in the step list.

use std::collections::BTreeMap;
use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::browser::{ColorScheme, Viewport};

/// Default base URL of the application under test (Vite dev server).
pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";

/// Default directory receiving screenshots and the run report.
pub const DEFAULT_OUTPUT_DIR: &str = "verification";

/// Default wall-clock bound for a whole run.
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 120_000;

/// Default bound for a single readiness wait.
pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 10_000;

/// Default readiness polling period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Verbosity level for harness logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Configuration values for one verification run.
#[derive(Debug, Clone, PartialEq, DeriveSerialize, DeriveDeserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    pub base_url: String,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub color_scheme: ColorScheme,
    /// `None` keeps the browser's own default viewport.
    pub viewport: Option<Viewport>,
    pub chrome_executable: Option<PathBuf>,
    pub run_timeout_ms: u64,
    pub readiness_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub preflight: bool,
    /// Written to `localStorage` before any application script runs.
    pub local_storage: BTreeMap<String, String>,
    pub verbose: Verbosity,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            headless: true,
            color_scheme: ColorScheme::default(),
            viewport: None,
            chrome_executable: None,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            readiness_timeout_ms: DEFAULT_READINESS_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            preflight: true,
            local_storage: BTreeMap::new(),
            verbose: Verbosity::default(),
        }
    }
}

impl HarnessConfig {
    /// Construct a configuration by reading `UI_VERIFY_*` environment
    /// variables, after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut config = HarnessConfig::default();

        if let Some(value) = env_var("UI_VERIFY_BASE_URL") {
            config.base_url = value;
        }

        if let Some(value) = env_var("UI_VERIFY_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var("UI_VERIFY_HEADLESS") {
            config.headless = parse_bool("UI_VERIFY_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_COLOR_SCHEME") {
            config.color_scheme = ColorScheme::parse(&value).ok_or_else(|| {
                ConfigError::invalid_enum("UI_VERIFY_COLOR_SCHEME", value.clone())
            })?;
        }

        if let Some(value) = env_var("UI_VERIFY_VIEWPORT") {
            config.viewport = Some(parse_viewport("UI_VERIFY_VIEWPORT", &value)?);
        }

        if let Some(value) = env_var("UI_VERIFY_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("UI_VERIFY_RUN_TIMEOUT_MS") {
            config.run_timeout_ms = parse_u64("UI_VERIFY_RUN_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_READINESS_TIMEOUT_MS") {
            config.readiness_timeout_ms = parse_u64("UI_VERIFY_READINESS_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_u64("UI_VERIFY_POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_PREFLIGHT") {
            config.preflight = parse_bool("UI_VERIFY_PREFLIGHT", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_LOCAL_STORAGE") {
            config.local_storage = parse_string_map("UI_VERIFY_LOCAL_STORAGE", &value)?;
        }

        if let Some(value) = env_var("UI_VERIFY_VERBOSE") {
            let parsed = parse_u8("UI_VERIFY_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                ConfigError::invalid_enum("UI_VERIFY_VERBOSE", parsed.to_string())
            })?;
        }

        Ok(config)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Resolve a route against the base URL. Absolute URLs (any scheme)
    /// are returned unchanged.
    pub fn resolve_url(&self, route: &str) -> String {
        if is_absolute_url(route) {
            return route.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if route.is_empty() {
            return format!("{base}/");
        }
        if route.starts_with('/') {
            format!("{base}{route}")
        } else {
            format!("{base}/{route}")
        }
    }
}

/// Schemes that carry no authority, so are absolute without `//`.
const OPAQUE_SCHEMES: [&str; 4] = ["data", "about", "blob", "javascript"];

pub(crate) fn is_absolute_url(route: &str) -> bool {
    let Some((scheme, rest)) = route.split_once(':') else {
        return false;
    };
    let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid_scheme
        && (rest.starts_with("//")
            || OPAQUE_SCHEMES
                .iter()
                .any(|opaque| scheme.eq_ignore_ascii_case(opaque)))
}

/// Errors that can arise while constructing a [`HarnessConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid viewport '{value}' for {field}; expected WIDTHxHEIGHT")]
    InvalidViewport { field: &'static str, value: String },
    #[error("{field} must be a JSON object of strings")]
    InvalidJsonType { field: &'static str },
    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_viewport(field: &'static str, value: &str) -> Result<Viewport, ConfigError> {
    let invalid = || ConfigError::InvalidViewport {
        field,
        value: value.to_string(),
    };
    let (width, height) = value
        .trim()
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(invalid)?;
    let width = width.parse::<u32>().map_err(|_| invalid())?;
    let height = height.parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(Viewport { width, height })
}

fn parse_string_map(
    field: &'static str,
    value: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let parsed: JsonValue = serde_json::from_str(value)
        .map_err(|source| ConfigError::InvalidJson { field, source })?;
    let JsonValue::Object(map) = parsed else {
        return Err(ConfigError::InvalidJsonType { field });
    };
    map.into_iter()
        .map(|(key, value)| match value {
            JsonValue::String(text) => Ok((key, text)),
            JsonValue::Bool(_) | JsonValue::Number(_) => Ok((key, value.to_string())),
            _ => Err(ConfigError::InvalidJsonType { field }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HarnessConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.headless);
        assert!(config.viewport.is_none());
        assert_eq!(config.color_scheme, ColorScheme::NoPreference);
        assert_eq!(config.readiness_timeout(), Duration::from_secs(10));
        assert!(config.preflight);
    }

    #[test]
    fn resolve_url_joins_routes() {
        let mut config = HarnessConfig::default();
        config.base_url = "http://localhost:3000/".into();
        assert_eq!(config.resolve_url("/"), "http://localhost:3000/");
        assert_eq!(config.resolve_url(""), "http://localhost:3000/");
        assert_eq!(
            config.resolve_url("/#/project/arduino-unity"),
            "http://localhost:3000/#/project/arduino-unity"
        );
        assert_eq!(
            config.resolve_url("about"),
            "http://localhost:3000/about"
        );
        assert_eq!(
            config.resolve_url("https://example.com/x"),
            "https://example.com/x"
        );
        assert_eq!(
            config.resolve_url("data:text/html,<p>hi</p>"),
            "data:text/html,<p>hi</p>"
        );
    }

    #[test]
    fn host_port_routes_are_not_mistaken_for_schemes() {
        let mut config = HarnessConfig::default();
        config.base_url = "http://127.0.0.1:5173".into();
        assert!(!is_absolute_url("localhost:5173/x"));
        assert_eq!(
            config.resolve_url("localhost:5173/x"),
            "http://127.0.0.1:5173/localhost:5173/x"
        );
        assert!(is_absolute_url("about:blank"));
        assert!(is_absolute_url("DATA:text/plain,hi"));
        assert!(is_absolute_url("file:///tmp/index.html"));
        assert!(!is_absolute_url("/#/project/x:y"));
    }

    #[test]
    fn parse_viewport_accepts_width_by_height() {
        assert_eq!(
            parse_viewport("F", "375x667").unwrap(),
            Viewport {
                width: 375,
                height: 667
            }
        );
        assert_eq!(
            parse_viewport("F", " 1280 X 720 ").unwrap(),
            Viewport {
                width: 1280,
                height: 720
            }
        );
        assert!(parse_viewport("F", "375").is_err());
        assert!(parse_viewport("F", "0x10").is_err());
        assert!(parse_viewport("F", "axb").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("F", "yes").unwrap());
        assert!(parse_bool("F", "ON").unwrap());
        assert!(!parse_bool("F", "0").unwrap());
        let err = parse_bool("F", "maybe").unwrap_err();
        assert!(err.to_string().contains("invalid boolean 'maybe' for F"));
    }

    #[test]
    fn parse_string_map_stringifies_scalars() {
        let map = parse_string_map("F", r#"{"darkMode": true, "theme": "dark", "n": 2}"#).unwrap();
        assert_eq!(map.get("darkMode").map(String::as_str), Some("true"));
        assert_eq!(map.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(map.get("n").map(String::as_str), Some("2"));
        assert!(matches!(
            parse_string_map("F", "[1, 2]"),
            Err(ConfigError::InvalidJsonType { .. })
        ));
        assert!(matches!(
            parse_string_map("F", "{not json"),
            Err(ConfigError::InvalidJson { .. })
        ));
    }

    #[test]
    fn config_round_trips_through_serde_with_defaults() {
        let parsed: HarnessConfig =
            serde_json::from_str(r#"{"baseUrl": "http://localhost:3000", "verbose": 2}"#).unwrap();
        assert_eq!(parsed.base_url, "http://localhost:3000");
        assert_eq!(parsed.verbose, Verbosity::Detailed);
        assert_eq!(parsed.run_timeout_ms, DEFAULT_RUN_TIMEOUT_MS);
        assert!(serde_json::from_str::<HarnessConfig>(r#"{"verbose": 7}"#).is_err());
    }
}
