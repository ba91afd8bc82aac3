use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;

use crate::adapters::search::{
    DEFAULT_GOOGLE_DAILY_LIMIT, DEFAULT_GOOGLE_SEARCH_BASE_URL, DEFAULT_TAVILY_BASE_URL,
};
use crate::error::{AvaBotError, Result};

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GROQ_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";
pub const DEFAULT_TOGETHER_BASE_URL: &str = "https://api.together.xyz";
pub const DEFAULT_TOGETHER_MODEL: &str = "black-forest-labs/FLUX.1-schnell-Free";
pub const DEFAULT_GOOGLE_API_BASE: &str = "https://www.googleapis.com";
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com";
pub const DEFAULT_TIMEZONE: &str = "America/Bogota";
pub const DEFAULT_HASH_ROUNDS: u32 = 600_000;
pub const DEFAULT_SEARCH_RESULTS: u32 = 5;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GroqConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub vision_model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TogetherConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WompiEnvironment {
    #[default]
    Sandbox,
    #[serde(alias = "prod")]
    Production,
}

impl WompiEnvironment {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "sandbox" | "test" => Ok(Self::Sandbox),
            "prod" | "production" => Ok(Self::Production),
            other => Err(AvaBotError::Config(format!(
                "unsupported WOMPI_ENV value: {other}"
            ))),
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.wompi.co/v1",
            Self::Production => "https://production.wompi.co/v1",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WompiConfig {
    pub env: Option<WompiEnvironment>,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub event_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GoogleConfig {
    pub api_base: Option<String>,
    pub gmail_base: Option<String>,
    pub token_files: Option<Vec<String>>,
    pub timezone: Option<String>,
    /// Only files under this directory may be uploaded to Drive. Defaults
    /// to the output directory.
    pub drive_upload_root: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchConfig {
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: Option<String>,
    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    pub google_base_url: Option<String>,
    pub google_daily_limit: Option<u32>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UsersConfig {
    pub sqlite_path: Option<String>,
    pub hash_rounds: Option<u32>,
    pub session_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeoConfig {
    pub enabled: Option<bool>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub working_dir: Option<String>,
    /// Local wall-clock time, `HH:MM`.
    pub run_at: Option<String>,
    pub run_on_start: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub groq: Option<GroqConfig>,
    pub together: Option<TogetherConfig>,
    pub wompi: Option<WompiConfig>,
    pub google: Option<GoogleConfig>,
    pub search: Option<SearchConfig>,
    pub users: Option<UsersConfig>,
    pub seo: Option<SeoConfig>,
    pub output_dir: Option<String>,
    pub system_prompt: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            groq: Some(GroqConfig {
                api_key: None,
                model: Some(DEFAULT_GROQ_MODEL.to_string()),
                vision_model: Some(DEFAULT_GROQ_MODEL.to_string()),
                base_url: Some(DEFAULT_GROQ_BASE_URL.to_string()),
            }),
            together: Some(TogetherConfig {
                api_key: None,
                model: Some(DEFAULT_TOGETHER_MODEL.to_string()),
                base_url: Some(DEFAULT_TOGETHER_BASE_URL.to_string()),
            }),
            wompi: Some(WompiConfig {
                env: Some(WompiEnvironment::Sandbox),
                ..WompiConfig::default()
            }),
            google: Some(GoogleConfig {
                api_base: Some(DEFAULT_GOOGLE_API_BASE.to_string()),
                gmail_base: Some(DEFAULT_GMAIL_API_BASE.to_string()),
                token_files: None,
                timezone: Some(DEFAULT_TIMEZONE.to_string()),
                drive_upload_root: None,
            }),
            search: Some(SearchConfig {
                tavily_base_url: Some(DEFAULT_TAVILY_BASE_URL.to_string()),
                google_base_url: Some(DEFAULT_GOOGLE_SEARCH_BASE_URL.to_string()),
                google_daily_limit: Some(DEFAULT_GOOGLE_DAILY_LIMIT),
                max_results: Some(DEFAULT_SEARCH_RESULTS),
                ..SearchConfig::default()
            }),
            users: Some(UsersConfig {
                sqlite_path: Some(db_path.to_string()),
                hash_rounds: Some(DEFAULT_HASH_ROUNDS),
                session_days: Some(30),
            }),
            seo: Some(SeoConfig {
                enabled: Some(false),
                command: None,
                args: None,
                working_dir: None,
                run_at: Some("01:00".to_string()),
                run_on_start: Some(true),
            }),
            output_dir: None,
            system_prompt: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AvaBotError::Config(format!("failed to read {}: {e}", path.to_string_lossy()))
        })?;
        serde_json::from_str(&raw).map_err(|e| AvaBotError::Config(e.to_string()))
    }

    /// File (when given) layered over the convention defaults, then the
    /// environment fills whatever is still unset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let db_path = crate::runtime_paths::default_db_path();
        let defaults = Self::convention_defaults(&db_path);
        let config = match path {
            Some(path) => Self::from_file(path)?.merge_defaults(defaults),
            None => defaults,
        };
        config.resolve_env_with(|key| std::env::var(key).ok())
    }

    fn merge_defaults(mut self, defaults: Self) -> Self {
        let Self {
            groq,
            together,
            wompi,
            google,
            search,
            users,
            seo,
            output_dir,
            system_prompt,
        } = defaults;

        if let (Some(own), Some(def)) = (&mut self.groq, &groq) {
            own.model = own.model.take().or_else(|| def.model.clone());
            own.vision_model = own.vision_model.take().or_else(|| def.vision_model.clone());
            own.base_url = own.base_url.take().or_else(|| def.base_url.clone());
        }
        if let (Some(own), Some(def)) = (&mut self.together, &together) {
            own.model = own.model.take().or_else(|| def.model.clone());
            own.base_url = own.base_url.take().or_else(|| def.base_url.clone());
        }
        if let (Some(own), Some(def)) = (&mut self.google, &google) {
            own.api_base = own.api_base.take().or_else(|| def.api_base.clone());
            own.gmail_base = own.gmail_base.take().or_else(|| def.gmail_base.clone());
            own.timezone = own.timezone.take().or_else(|| def.timezone.clone());
        }
        if let (Some(own), Some(def)) = (&mut self.search, &search) {
            own.tavily_base_url = own
                .tavily_base_url
                .take()
                .or_else(|| def.tavily_base_url.clone());
            own.google_base_url = own
                .google_base_url
                .take()
                .or_else(|| def.google_base_url.clone());
            own.google_daily_limit = own.google_daily_limit.or(def.google_daily_limit);
            own.max_results = own.max_results.or(def.max_results);
        }
        if let (Some(own), Some(def)) = (&mut self.users, &users) {
            own.sqlite_path = own.sqlite_path.take().or_else(|| def.sqlite_path.clone());
            own.hash_rounds = own.hash_rounds.or(def.hash_rounds);
            own.session_days = own.session_days.or(def.session_days);
        }
        if let (Some(own), Some(def)) = (&mut self.seo, &seo) {
            own.run_at = own.run_at.take().or_else(|| def.run_at.clone());
            own.run_on_start = own.run_on_start.or(def.run_on_start);
        }

        self.groq = self.groq.or(groq);
        self.together = self.together.or(together);
        self.wompi = self.wompi.or(wompi);
        self.google = self.google.or(google);
        self.search = self.search.or(search);
        self.users = self.users.or(users);
        self.seo = self.seo.or(seo);
        self.output_dir = self.output_dir.or(output_dir);
        self.system_prompt = self.system_prompt.or(system_prompt);
        self
    }

    pub fn resolve_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        let groq = self.groq.get_or_insert_with(GroqConfig::default);
        if groq.api_key.is_none() {
            groq.api_key = get("GROQ_API_KEY");
        }

        let together = self.together.get_or_insert_with(TogetherConfig::default);
        if together.api_key.is_none() {
            together.api_key = get("TOGETHER_API_KEY");
        }

        let wompi = self.wompi.get_or_insert_with(WompiConfig::default);
        if let Some(raw) = get("WOMPI_ENV") {
            wompi.env = Some(WompiEnvironment::parse(&raw)?);
        }
        if wompi.private_key.is_none() {
            wompi.private_key = get("WOMPI_PRIVATE_KEY");
        }
        if wompi.public_key.is_none() {
            wompi.public_key = get("WOMPI_PUBLIC_KEY");
        }
        if wompi.event_key.is_none() {
            wompi.event_key = get("WOMPI_EVENT_KEY");
        }

        let search = self.search.get_or_insert_with(SearchConfig::default);
        if search.tavily_api_key.is_none() {
            search.tavily_api_key = get("TAVILY_API_KEY");
        }
        if search.google_api_key.is_none() {
            search.google_api_key = get("GOOGLE_API_KEY");
        }
        if search.google_cx.is_none() {
            search.google_cx = get("GOOGLE_CX_ID");
        }

        if let Some(path) = get("AVA_DB_PATH") {
            self.users.get_or_insert_with(UsersConfig::default).sqlite_path = Some(path);
        }
        if let Some(dir) = get("AVA_OUTPUT_DIR") {
            self.output_dir = Some(dir);
        }
        Ok(self)
    }

    pub fn groq_api_key(&self) -> Option<&str> {
        self.groq.as_ref().and_then(|g| g.api_key.as_deref())
    }

    pub fn together_api_key(&self) -> Option<&str> {
        self.together.as_ref().and_then(|t| t.api_key.as_deref())
    }

    pub fn wompi_base_url(&self) -> String {
        let wompi = self.wompi.clone().unwrap_or_default();
        wompi
            .base_url
            .unwrap_or_else(|| wompi.env.unwrap_or_default().base_url().to_string())
    }

    pub fn users_db_path(&self) -> String {
        self.users
            .as_ref()
            .and_then(|u| u.sqlite_path.clone())
            .unwrap_or_else(crate::runtime_paths::default_db_path)
    }

    pub fn hash_rounds(&self) -> u32 {
        self.users
            .as_ref()
            .and_then(|u| u.hash_rounds)
            .unwrap_or(DEFAULT_HASH_ROUNDS)
    }

    pub fn session_days(&self) -> i64 {
        self.users
            .as_ref()
            .and_then(|u| u.session_days)
            .unwrap_or(30)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(crate::runtime_paths::default_output_dir)
    }

    pub fn drive_upload_root(&self) -> PathBuf {
        self.google
            .as_ref()
            .and_then(|g| g.drive_upload_root.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_dir())
    }

    pub fn timezone(&self) -> String {
        self.google
            .as_ref()
            .and_then(|g| g.timezone.clone())
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
    }

    pub fn seo_run_at(&self) -> Result<NaiveTime> {
        let raw = self
            .seo
            .as_ref()
            .and_then(|s| s.run_at.clone())
            .unwrap_or_else(|| "01:00".to_string());
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|e| AvaBotError::Config(format!("invalid seo.run_at '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn environment_fills_missing_keys() {
        let config = Config::convention_defaults(":memory:")
            .resolve_env_with(lookup(&[
                ("GROQ_API_KEY", "gsk_test"),
                ("WOMPI_ENV", "prod"),
                ("WOMPI_EVENT_KEY", "events"),
                ("AVA_DB_PATH", "/tmp/ava/users.db"),
            ]))
            .unwrap();

        assert_eq!(config.groq_api_key(), Some("gsk_test"));
        assert_eq!(config.together_api_key(), None);
        assert_eq!(config.wompi_base_url(), "https://production.wompi.co/v1");
        assert_eq!(config.users_db_path(), "/tmp/ava/users.db");
        assert_eq!(
            config.wompi.and_then(|w| w.event_key).as_deref(),
            Some("events")
        );
    }

    #[test]
    fn search_keys_come_from_the_environment() {
        let config = Config::convention_defaults(":memory:")
            .resolve_env_with(lookup(&[
                ("TAVILY_API_KEY", "tvly-test"),
                ("GOOGLE_API_KEY", "gkey"),
                ("GOOGLE_CX_ID", "cx1"),
            ]))
            .unwrap();
        let search = config.search.unwrap();
        assert_eq!(search.tavily_api_key.as_deref(), Some("tvly-test"));
        assert_eq!(search.google_api_key.as_deref(), Some("gkey"));
        assert_eq!(search.google_cx.as_deref(), Some("cx1"));
        assert_eq!(search.max_results, Some(DEFAULT_SEARCH_RESULTS));
    }

    #[test]
    fn file_values_win_over_environment() {
        let mut config = Config::convention_defaults(":memory:");
        config.groq.as_mut().unwrap().api_key = Some("from-file".to_string());
        let config = config
            .resolve_env_with(lookup(&[("GROQ_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(config.groq_api_key(), Some("from-file"));
    }

    #[test]
    fn sandbox_is_the_default_wompi_environment() {
        let config = Config::convention_defaults(":memory:")
            .resolve_env_with(lookup(&[]))
            .unwrap();
        assert_eq!(config.wompi_base_url(), "https://sandbox.wompi.co/v1");
        assert!(WompiEnvironment::parse("staging").is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ava.json");
        std::fs::write(
            &path,
            r#"{"groq": {"api_key": "k"}, "seo": {"command": "python3"}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path)
            .unwrap()
            .merge_defaults(Config::convention_defaults(":memory:"));
        let groq = config.groq.clone().unwrap();
        assert_eq!(groq.base_url.as_deref(), Some(DEFAULT_GROQ_BASE_URL));
        assert_eq!(groq.api_key.as_deref(), Some("k"));
        assert_eq!(
            config.seo_run_at().unwrap(),
            NaiveTime::from_hms_opt(1, 0, 0).unwrap()
        );
        assert_eq!(config.users_db_path(), ":memory:");
    }
}
