use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use client_core::{HttpImageClassifier, ImageClassifier, LookupImageClassifier, SyncSettings};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlaggedImage {
    pub image: String,
    /// Normalized `[x1, y1, x2, y2]` corners.
    #[serde(default)]
    pub regions: Vec<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub classifier_url: Option<String>,
    pub profile_path: PathBuf,
    pub log_level: String,
    pub poll_interval_ms: u64,
    pub warm_up_cycles: u32,
    pub list_refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub flagged_images: Vec<FlaggedImage>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            classifier_url: None,
            profile_path: PathBuf::from("./data/profile.json"),
            log_level: "info".into(),
            poll_interval_ms: 1_000,
            warm_up_cycles: 3,
            list_refresh_interval_ms: 2_000,
            request_timeout_ms: 10_000,
            flagged_images: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    classifier_url: Option<String>,
    profile_path: Option<PathBuf>,
    log_level: Option<String>,
    poll_interval_ms: Option<u64>,
    warm_up_cycles: Option<u32>,
    list_refresh_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    flagged_images: Vec<FlaggedImage>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            warm_up_cycles: self.warm_up_cycles,
            list_refresh_interval: Duration::from_millis(self.list_refresh_interval_ms.max(1)),
            request_timeout: self.request_timeout(),
        }
    }

    /// The HTTP classifier when a URL is configured, otherwise a lookup
    /// table built from `flagged_images`.
    pub fn classifier(&self) -> anyhow::Result<Arc<dyn ImageClassifier>> {
        if let Some(url) = &self.classifier_url {
            return Ok(Arc::new(HttpImageClassifier::new(url, self.request_timeout())?));
        }
        let mut lookup = LookupImageClassifier::new();
        for entry in &self.flagged_images {
            lookup = lookup.flag_raw(entry.image.clone(), &entry.regions)?;
        }
        Ok(Arc::new(lookup))
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.classifier_url {
            self.classifier_url = Some(v);
        }
        if let Some(v) = file.profile_path {
            self.profile_path = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file.warm_up_cycles {
            self.warm_up_cycles = v;
        }
        if let Some(v) = file.list_refresh_interval_ms {
            self.list_refresh_interval_ms = v;
        }
        if let Some(v) = file.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if !file.flagged_images.is_empty() {
            self.flagged_images = file.flagged_images;
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CHAT_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("APP__CLASSIFIER_URL") {
            self.classifier_url = Some(v).filter(|url| !url.trim().is_empty());
        }
        if let Some(v) = var("APP__PROFILE_PATH") {
            self.profile_path = PathBuf::from(v);
        }
        if let Some(v) = var("APP__LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(parsed) = var("APP__POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poll_interval_ms = parsed;
        }
        if let Some(parsed) = var("APP__WARM_UP_CYCLES").and_then(|v| v.parse().ok()) {
            self.warm_up_cycles = parsed;
        }
        if let Some(parsed) = var("APP__LIST_REFRESH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.list_refresh_interval_ms = parsed;
        }
        if let Some(parsed) = var("APP__REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.request_timeout_ms = parsed;
        }
    }
}

pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    load_settings_from(path, config_path.is_some(), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file at `path`, then the variables `var` yields.
/// A missing file is only an error when `required` is set.
pub fn load_settings_from(
    path: &Path,
    required: bool,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            settings.apply_file(file);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    settings.apply_env(var);
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
