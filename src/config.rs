// Runtime settings. Everything that depends on the live target (base URLs,
// endpoint paths, query documents, indicator phrases) lives here rather
// than in code, so a rotted endpoint is fixed by editing `settings.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for the store file and logs (default: `<data dir>/monokit`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Provenance tag written into records and store metadata.
    #[serde(default = "default_owner_tag")]
    pub owner_tag: String,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Remote surfaces used by login, token harvesting and the repeat action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Base for the structured (JSON) API.
    pub api_base: String,
    /// Base for human-facing web pages.
    pub web_base: String,
    pub auth_path: String,
    /// Sent as `Authorization: OAuth <client_token>` on the auth call when set.
    pub client_token: Option<String>,
    pub profile_path: String,
    /// Pages replayed with the bearer token to harvest session cookies.
    pub session_pages: Vec<String>,
    /// Pages scanned for a derived token.
    pub token_pages: Vec<String>,
    pub token_pattern: String,
    pub share_path: String,
    /// Extra hosts accepted for resource URLs besides the `web_base` host.
    pub accepted_hosts: Vec<String>,
    pub shield: ShieldEndpoints,
}

/// Surfaces probed and mutated for the shield flag. `{subject}` in a path
/// is replaced with the remote user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldEndpoints {
    pub field_path: String,
    pub field_name: String,
    pub query_path: String,
    pub query_doc: Option<String>,
    pub positive_indicators: Vec<String>,
    pub negative_indicators: Vec<String>,
    pub page_path: String,
    pub on_phrases: Vec<String>,
    pub off_phrases: Vec<String>,
    pub resource_path: String,
    pub mutation_path: String,
    pub mutation_doc: Option<String>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monokit")
}

fn default_owner_tag() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".into())
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("monokit-cli/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:3001".into(),
            web_base: "http://localhost:3001".into(),
            auth_path: "/auth/login".into(),
            client_token: None,
            profile_path: "/me".into(),
            session_pages: vec!["/me/accounts".into(), "/".into()],
            token_pages: vec!["/business_locations".into(), "/adsmanager".into()],
            token_pattern: r"EAA[A-Za-z0-9]{16,}".into(),
            share_path: "/me/feed".into(),
            accepted_hosts: Vec::new(),
            shield: ShieldEndpoints::default(),
        }
    }
}

impl Default for ShieldEndpoints {
    fn default() -> Self {
        Self {
            field_path: "/{subject}".into(),
            field_name: "is_shielded".into(),
            query_path: "/graphql".into(),
            query_doc: None,
            positive_indicators: vec![
                "\"is_shielded\":true".into(),
                "\"shield_enabled\":true".into(),
            ],
            negative_indicators: vec![
                "\"is_shielded\":false".into(),
                "\"shield_enabled\":false".into(),
            ],
            page_path: "/{subject}".into(),
            on_phrases: vec![
                "profile picture guard is on".into(),
                "turn off profile picture guard".into(),
                "profile is locked".into(),
            ],
            off_phrases: vec![
                "turn on profile picture guard".into(),
                "lock your profile".into(),
            ],
            resource_path: "/{subject}/picture/download".into(),
            mutation_path: "/graphql".into(),
            mutation_doc: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            owner_tag: default_owner_tag(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Load from `$MONOKIT_CONFIG` or `<data dir>/settings.json` when the
    /// file exists, then apply `MONOKIT_*` environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// `load` with an explicit variable lookup. The data directory override
    /// is resolved first so it also decides where the settings file lives.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = match var("MONOKIT_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => var("MONOKIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir)
                .join("settings.json"),
        };
        let mut config = Self::from_file(&path)?;
        config.apply_env(&var);
        config.validate()?;
        Ok(config)
    }

    /// Read a settings file; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("MONOKIT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(base) = var("MONOKIT_API_BASE") {
            self.endpoints.api_base = base;
        }
        if let Some(base) = var("MONOKIT_WEB_BASE") {
            self.endpoints.web_base = base;
        }
        if let Some(owner) = var("MONOKIT_OWNER") {
            self.owner_tag = owner;
        }
        if let Some(secs) = var("MONOKIT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        regex::Regex::new(&self.endpoints.token_pattern)
            .context("token_pattern is not a valid regular expression")?;
        url::Url::parse(&self.endpoints.api_base).context("api_base is not a valid URL")?;
        url::Url::parse(&self.endpoints.web_base).context("web_base is not a valid URL")?;
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("cookies-storage").join("cookies.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Join a base URL and a path; absolute URLs in `path` are returned as-is.
pub fn resolve(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}{}", base.trim_end_matches('/'), path)
    }
}

/// Substitute the `{subject}` placeholder in an endpoint path.
pub fn with_subject(path: &str, subject_id: &str) -> String {
    path.replace("{subject}", subject_id)
}
