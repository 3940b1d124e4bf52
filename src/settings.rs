use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analytics_client::ClientSettings;
use crate::errors::{DashboardError, DashboardResult};
use crate::types::{default_inception, Profile, ProfileKind};

pub const CONFIG_ENV: &str = "METRICS_DASHBOARD_CONFIG";
pub const LISTEN_ENV: &str = "METRICS_DASHBOARD_LISTEN";
pub const BACKEND_URL_ENV: &str = "METRICS_DASHBOARD_BACKEND_URL";
pub const SECRET_ENV: &str = "METRICS_DASHBOARD_SECRET";

const CONFIG_FILE_NAME: &str = "dashboard.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub listen_addr: String,
    pub backend_url: String,
    pub secret: Option<String>,
    pub secret_header: String,
    pub request_timeout_secs: Option<u64>,
    pub stylesheet_path: PathBuf,
    pub profile: ProfileKind,
    pub page_title: Option<String>,
    pub sidebar_header: Option<String>,
    pub objective: Option<String>,
    pub inception_date: NaiveDate,
    pub cache_ttl_secs: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8501".to_string(),
            backend_url: "http://localhost:8000".to_string(),
            secret: None,
            secret_header: "secret".to_string(),
            request_timeout_secs: None,
            stylesheet_path: PathBuf::from("style.css"),
            profile: ProfileKind::default(),
            page_title: None,
            sidebar_header: None,
            objective: None,
            inception_date: default_inception(),
            cache_ttl_secs: 0,
        }
    }
}

impl DashboardSettings {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.backend_url.clone(),
            secret_header: self.secret_header.clone(),
            secret: self.secret.clone().filter(|s| !s.is_empty()),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Built-in profile with any copy overrides applied.
    pub fn resolved_profile(&self) -> Profile {
        let mut profile = Profile::for_kind(self.profile);
        if let Some(title) = &self.page_title {
            profile.page_title = title.clone();
        }
        if let Some(header) = &self.sidebar_header {
            profile.sidebar_header = header.clone();
        }
        if let Some(objective) = &self.objective {
            profile.objective = objective.clone();
        }
        profile
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Applies overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(LISTEN_ENV).filter(|v| !v.is_empty()) {
            self.listen_addr = listen;
        }
        if let Some(url) = lookup(BACKEND_URL_ENV).filter(|v| !v.is_empty()) {
            self.backend_url = url;
        }
        if let Some(secret) = lookup(SECRET_ENV) {
            self.secret = Some(secret).filter(|s| !s.is_empty());
        }
    }
}

/// First existing config file: `$METRICS_DASHBOARD_CONFIG`, then
/// `./dashboard.yaml`, then the per-user config dir.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("metrics-dashboard").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

pub fn load_settings() -> DashboardResult<DashboardSettings> {
    let mut settings = match config_path() {
        Some(path) => load_settings_from(&path)?,
        None => {
            log::info!("[Settings] No config file found, using defaults");
            DashboardSettings::default()
        }
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> DashboardResult<DashboardSettings> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "[Settings] Config file {} not found, using defaults",
                path.display()
            );
            return Ok(DashboardSettings::default());
        }
        Err(e) => {
            return Err(DashboardError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    if contents.trim().is_empty() {
        return Ok(DashboardSettings::default());
    }

    let settings: DashboardSettings = serde_yaml::from_str(&contents).map_err(|e| {
        DashboardError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    log::info!("[Settings] Loaded {}", path.display());
    Ok(settings)
}

/// Reads the stylesheet injected into every page. Missing is fatal.
pub fn load_stylesheet(path: &Path) -> DashboardResult<String> {
    fs::read_to_string(path).map_err(|e| {
        DashboardError::Stylesheet(format!("Failed to read {}: {}", path.display(), e))
    })
}
