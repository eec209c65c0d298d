// EncodingProfile Model
// Fixed test-pattern encoding settings passed to FFmpeg

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Encoding settings for the synthetic test pattern stream.
///
/// Every field has a default matching the stock 720p30 YouTube profile, so a
/// settings file only needs to carry the values it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncodingProfile {
    /// Test source width in pixels
    pub width: u32,
    /// Test source height in pixels
    pub height: u32,
    pub frame_rate: u32,

    /// Sine tone frequency in Hz
    pub tone_frequency: u32,
    pub sample_rate: u32,

    pub video_codec: String,
    pub preset: String,
    pub video_bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
    pub pixel_format: String,
    /// Keyframe interval in frames
    pub gop_size: u32,

    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,

    /// Output container format (flv for RTMP)
    pub container: String,

    /// Hard cap on stream length, enforced by FFmpeg `-t` and by the supervisor timeout
    pub max_duration_secs: u64,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            tone_frequency: 1000,
            sample_rate: 48000,
            video_codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            video_bitrate_kbps: 1500,
            maxrate_kbps: 1500,
            bufsize_kbps: 3000,
            pixel_format: "yuv420p".to_string(),
            gop_size: 30,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            container: "flv".to_string(),
            max_duration_secs: 240,
        }
    }
}

impl EncodingProfile {
    /// Longest stream the server will supervise (24 hours)
    pub const MAX_DURATION_CEILING_SECS: u64 = 86_400;

    /// Check that the profile produces a sane FFmpeg invocation
    pub fn validate(&self) -> Result<(), String> {
        let numeric = [
            ("width", self.width),
            ("height", self.height),
            ("frameRate", self.frame_rate),
            ("toneFrequency", self.tone_frequency),
            ("sampleRate", self.sample_rate),
            ("videoBitrateKbps", self.video_bitrate_kbps),
            ("maxrateKbps", self.maxrate_kbps),
            ("bufsizeKbps", self.bufsize_kbps),
            ("gopSize", self.gop_size),
            ("audioBitrateKbps", self.audio_bitrate_kbps),
        ];
        for (name, value) in numeric {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }

        // yuv420p chroma subsampling needs even dimensions
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "Resolution {}x{} must have even dimensions",
                self.width, self.height
            ));
        }

        if self.maxrate_kbps < self.video_bitrate_kbps {
            return Err(format!(
                "maxrateKbps ({}) must be at least videoBitrateKbps ({})",
                self.maxrate_kbps, self.video_bitrate_kbps
            ));
        }

        if self.max_duration_secs == 0 {
            return Err("maxDurationSecs must be greater than zero".to_string());
        }
        if self.max_duration_secs > Self::MAX_DURATION_CEILING_SECS {
            return Err(format!(
                "maxDurationSecs ({}) exceeds the ceiling of {} seconds",
                self.max_duration_secs,
                Self::MAX_DURATION_CEILING_SECS
            ));
        }

        let text = [
            ("videoCodec", &self.video_codec),
            ("preset", &self.preset),
            ("pixelFormat", &self.pixel_format),
            ("audioCodec", &self.audio_codec),
            ("container", &self.container),
        ];
        for (name, value) in text {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(format!("{name} must be a single non-empty token"));
            }
        }

        Ok(())
    }

    /// Wall-clock limit for the supervisor timeout
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Human-readable duration, e.g. "4 minutes" or "90 seconds"
    pub fn duration_label(&self) -> String {
        let secs = self.max_duration_secs;
        match (secs % 60, secs / 60) {
            (0, 1) => "1 minute".to_string(),
            (0, minutes) => format!("{minutes} minutes"),
            _ if secs == 1 => "1 second".to_string(),
            _ => format!("{secs} seconds"),
        }
    }

    /// Build the FFmpeg argument list pushing the test pattern to `ingest_url`
    pub fn build_args(&self, ingest_url: &str) -> Vec<String> {
        vec![
            "-f".to_string(), "lavfi".to_string(),
            "-i".to_string(),
            format!("testsrc=size={}x{}:rate={}", self.width, self.height, self.frame_rate),
            "-f".to_string(), "lavfi".to_string(),
            "-i".to_string(),
            format!("sine=frequency={}:sample_rate={}", self.tone_frequency, self.sample_rate),
            "-c:v".to_string(), self.video_codec.clone(),
            "-preset".to_string(), self.preset.clone(),
            "-b:v".to_string(), format!("{}k", self.video_bitrate_kbps),
            "-maxrate".to_string(), format!("{}k", self.maxrate_kbps),
            "-bufsize".to_string(), format!("{}k", self.bufsize_kbps),
            "-pix_fmt".to_string(), self.pixel_format.clone(),
            "-g".to_string(), self.gop_size.to_string(),
            "-c:a".to_string(), self.audio_codec.clone(),
            "-b:a".to_string(), format!("{}k", self.audio_bitrate_kbps),
            "-ar".to_string(), self.sample_rate.to_string(),
            "-f".to_string(), self.container.clone(),
            "-t".to_string(), self.max_duration_secs.to_string(),
            ingest_url.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args_match_stock_profile() {
        let args = EncodingProfile::default().build_args("rtmp://a.rtmp.youtube.com/live2/key");
        let expected = [
            "-f", "lavfi",
            "-i", "testsrc=size=1280x720:rate=30",
            "-f", "lavfi",
            "-i", "sine=frequency=1000:sample_rate=48000",
            "-c:v", "libx264",
            "-preset", "ultrafast",
            "-b:v", "1500k",
            "-maxrate", "1500k",
            "-bufsize", "3000k",
            "-pix_fmt", "yuv420p",
            "-g", "30",
            "-c:a", "aac",
            "-b:a", "128k",
            "-ar", "48000",
            "-f", "flv",
            "-t", "240",
            "rtmp://a.rtmp.youtube.com/live2/key",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_default_profile_is_valid() {
        assert!(EncodingProfile::default().validate().is_ok());
        assert_eq!(EncodingProfile::default().max_duration(), Duration::from_secs(240));
    }

    #[test]
    fn test_rejects_odd_resolution() {
        let profile = EncodingProfile { width: 1279, ..Default::default() };
        assert!(profile.validate().unwrap_err().contains("even"));
    }

    #[test]
    fn test_rejects_maxrate_below_bitrate() {
        let profile = EncodingProfile { maxrate_kbps: 1000, ..Default::default() };
        assert!(profile.validate().unwrap_err().contains("maxrateKbps"));
    }

    #[test]
    fn test_rejects_duration_out_of_range() {
        let zero = EncodingProfile { max_duration_secs: 0, ..Default::default() };
        assert!(zero.validate().is_err());

        let huge = EncodingProfile { max_duration_secs: 90_000, ..Default::default() };
        assert!(huge.validate().unwrap_err().contains("ceiling"));
    }

    #[test]
    fn test_rejects_codec_with_whitespace() {
        let profile = EncodingProfile { video_codec: "libx264 -y".to_string(), ..Default::default() };
        assert!(profile.validate().unwrap_err().contains("videoCodec"));
    }

    #[test]
    fn test_duration_label() {
        let label = |secs| EncodingProfile { max_duration_secs: secs, ..Default::default() }.duration_label();
        assert_eq!(label(240), "4 minutes");
        assert_eq!(label(60), "1 minute");
        assert_eq!(label(90), "90 seconds");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let profile: EncodingProfile =
            serde_json::from_str(r#"{"width": 1920, "height": 1080, "maxDurationSecs": 60}"#).unwrap();
        assert_eq!(profile.width, 1920);
        assert_eq!(profile.frame_rate, 30);
        assert_eq!(profile.max_duration_secs, 60);
    }
}
