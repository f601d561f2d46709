use std::{fmt, fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

pub const SETTINGS_FILE: &str = "issue_detail.toml";
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub api_base_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub per_page: u32,
    pub max_pages: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            token: None,
            user_agent: concat!("issue-detail/", env!("CARGO_PKG_VERSION")).into(),
            request_timeout_secs: 30,
            per_page: 100,
            max_pages: 10,
        }
    }
}

impl fmt::Debug for TrackerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerSettings")
            .field("api_base_url", &self.api_base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("per_page", &self.per_page)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

/// Defaults, then `issue_detail.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> TrackerSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> TrackerSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<TrackerSettings>(&raw) {
            Ok(settings) => {
                debug!(path = %path.display(), "config: loaded settings file");
                settings
            }
            Err(err) => {
                warn!(path = %path.display(), "config: ignoring malformed settings file: {err}");
                TrackerSettings::default()
            }
        },
        Err(_) => TrackerSettings::default(),
    };
    apply_env_overrides(&mut settings, env);
    settings
}

pub fn apply_env_overrides(settings: &mut TrackerSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("ISSUE_DETAIL__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("GITHUB_TOKEN") {
        settings.token = Some(v);
    }
    if let Some(v) = env("ISSUE_DETAIL__TOKEN") {
        settings.token = Some(v);
    }

    if let Some(v) = env("ISSUE_DETAIL__USER_AGENT") {
        settings.user_agent = v;
    }

    if let Some(v) = env("ISSUE_DETAIL__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = env("ISSUE_DETAIL__PER_PAGE") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.per_page = parsed;
        }
    }
    if let Some(v) = env("ISSUE_DETAIL__MAX_PAGES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_pages = parsed;
        }
    }
}

/// Parses the API root, falling back to the public GitHub API when blank.
/// The result always ends with `/` so endpoint segments append cleanly.
pub fn normalize_api_base_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() {
        DEFAULT_API_BASE_URL
    } else {
        raw
    };

    let mut url = Url::parse(raw).with_context(|| format!("invalid api base url: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("unsupported api base url scheme: {}", url.scheme());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
