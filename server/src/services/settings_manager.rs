// SettingsManager Service
// Loads settings.json and applies environment overrides

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::models::Settings;

/// Environment variable carrying the stream key
pub const STREAM_KEY_ENV: &str = "YOUTUBE_STREAM_KEY";

/// Manages server settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    cache: RwLock<Option<Settings>>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join("settings.json"),
            cache: RwLock::new(None),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, or return defaults if the file does not exist
    pub fn load(&self) -> Result<Settings, String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;
            serde_json::from_str::<Settings>(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?
        } else {
            Settings::default()
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Load settings, writing a default file on first run
    pub fn load_or_init(&self) -> Result<Settings, String> {
        if !self.settings_path.exists() {
            self.save(&Settings::default())?;
            log::info!("Wrote default settings to {}", self.settings_path.display());
        }
        self.load()
    }

    /// Persist settings to disk
    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;
        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }
}

/// Apply `TESTCARD_*` and stream key overrides from an environment lookup
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(host) = lookup("TESTCARD_HOST") {
        settings.host = host;
    }
    if let Some(port) = lookup("TESTCARD_PORT") {
        match port.parse() {
            Ok(port) => settings.port = port,
            Err(_) => log::warn!("Ignoring invalid TESTCARD_PORT value: {port}"),
        }
    }
    if let Some(path) = lookup("TESTCARD_FFMPEG_PATH") {
        settings.ffmpeg_path = path;
    }
    if let Some(limit) = lookup("TESTCARD_RATE_LIMIT") {
        match limit.parse() {
            Ok(limit) => settings.rate_limit_per_minute = limit,
            Err(_) => log::warn!("Ignoring invalid TESTCARD_RATE_LIMIT value: {limit}"),
        }
    }
    if let Some(origins) = lookup("TESTCARD_CORS_ORIGINS") {
        settings.cors_origins = origins;
    }
    if let Some(key) = lookup(STREAM_KEY_ENV) {
        // Security: do not log the key or the variable contents
        log::debug!("Using stream key from environment");
        settings.stream_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let manager = SettingsManager::new(temp.path().to_path_buf());

        let settings = manager.load().unwrap();
        assert_eq!(settings.port, 8008);
        assert_eq!(settings.ffmpeg_path, "ffmpeg");
        assert!(settings.stream_key().is_none());
        assert!(!manager.settings_path().exists());
    }

    #[test]
    fn test_partial_file_merges_defaults() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("settings.json"),
            r#"{"port": 9100, "streamKey": "from-file", "profile": {"maxDurationSecs": 60}}"#,
        )
        .unwrap();

        let settings = SettingsManager::new(temp.path().to_path_buf()).load().unwrap();
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.stream_key(), Some("from-file"));
        assert_eq!(settings.profile.max_duration_secs, 60);
        assert_eq!(settings.profile.width, 1280);
        assert_eq!(settings.ingest_base_url, "rtmp://a.rtmp.youtube.com/live2");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("settings.json"), "{ not json").unwrap();

        let err = SettingsManager::new(temp.path().to_path_buf()).load().unwrap_err();
        assert!(err.contains("parse"));
    }

    #[test]
    fn test_load_or_init_writes_file() {
        let temp = tempdir().unwrap();
        let manager = SettingsManager::new(temp.path().join("nested"));

        manager.load_or_init().unwrap();
        let content = std::fs::read_to_string(manager.settings_path()).unwrap();
        assert!(content.contains("\"ingestBaseUrl\""));
        assert!(content.contains("\"streamKey\": \"\""));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TESTCARD_PORT", "9200"),
            ("TESTCARD_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("TESTCARD_RATE_LIMIT", "not-a-number"),
            ("YOUTUBE_STREAM_KEY", " abcd-efgh-ijkl "),
            ("TESTCARD_HOST", "   "),
        ]);

        let mut settings = Settings::default();
        apply_env_overrides(&mut settings, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.port, 9200);
        assert_eq!(settings.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(settings.rate_limit_per_minute, 300);
        assert_eq!(settings.stream_key(), Some("abcd-efgh-ijkl"));
        assert_eq!(settings.host, "127.0.0.1");
    }
}
