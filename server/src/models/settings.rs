// Settings Model
// Server configuration

use serde::{Deserialize, Serialize};

use super::{validate_ingest_base, EncodingProfile};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8008
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ingest_base_url() -> String {
    "rtmp://a.rtmp.youtube.com/live2".to_string()
}

fn default_log_retention_days() -> u32 {
    30
}

fn default_log_buffer_lines() -> usize {
    200
}

fn default_retained_streams() -> usize {
    64
}

fn default_rate_limit_per_minute() -> u32 {
    300
}

fn default_cors_origins() -> String {
    "http://localhost:*,http://127.0.0.1:*".to_string()
}

/// Server settings, stored as `settings.json` in the data directory
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // HTTP server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,

    // FFmpeg
    /// Absolute path, or a bare binary name resolved on PATH
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default)]
    pub profile: EncodingProfile,

    // Ingest
    #[serde(default = "default_ingest_base_url")]
    pub ingest_base_url: String,
    /// Stream key; overridden by YOUTUBE_STREAM_KEY. Empty means unconfigured.
    #[serde(default)]
    pub stream_key: String,

    // Diagnostics
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
    /// Lines of FFmpeg output kept per stream
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
    /// Finished stream records kept for status queries
    #[serde(default = "default_retained_streams")]
    pub retained_streams: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            cors_origins: default_cors_origins(),
            ffmpeg_path: default_ffmpeg_path(),
            profile: EncodingProfile::default(),
            ingest_base_url: default_ingest_base_url(),
            stream_key: String::new(),
            log_retention_days: default_log_retention_days(),
            log_buffer_lines: default_log_buffer_lines(),
            retained_streams: default_retained_streams(),
        }
    }
}

impl Settings {
    /// Configured stream key, if any
    pub fn stream_key(&self) -> Option<&str> {
        let key = self.stream_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Validate everything that would otherwise fail at stream launch
    pub fn validate(&self) -> Result<(), String> {
        self.profile.validate()?;

        validate_ingest_base(self.ingest_base_url.trim()).map_err(|e| format!("ingestBaseUrl: {e}"))?;
        if self.ffmpeg_path.trim().is_empty() {
            return Err("ffmpegPath must not be empty".to_string());
        }
        if self.log_buffer_lines == 0 {
            return Err("logBufferLines must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("ingest_base_url", &self.ingest_base_url)
            .field("stream_key", &self.stream_key().map(|_| "***"))
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}
