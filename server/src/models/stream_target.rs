// StreamTarget Model
// RTMP ingest destination and stream key redaction

/// Ingest destination built from a base RTMP URL and a stream key
#[derive(Clone, PartialEq, Eq)]
pub struct StreamTarget {
    url: String,
}

impl StreamTarget {
    /// Build a target as `{base_url}/{stream_key}`
    pub fn new(base_url: &str, stream_key: &str) -> Result<Self, String> {
        let base = base_url.trim().trim_end_matches('/');
        validate_ingest_base(base)?;

        let key = stream_key.trim();
        if key.is_empty() {
            return Err("Stream key is empty".to_string());
        }
        if key.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err("Stream key contains invalid characters".to_string());
        }

        Ok(Self {
            url: format!("{base}/{key}"),
        })
    }

    /// Full ingest URL, including the stream key
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ingest URL with the stream key masked, safe for logs
    pub fn redacted(&self) -> String {
        redact_url(&self.url)
    }
}

/// Check that a base ingest URL is RTMP(S) with a host
pub fn validate_ingest_base(base_url: &str) -> Result<(), String> {
    let rest = base_url
        .strip_prefix("rtmp://")
        .or_else(|| base_url.strip_prefix("rtmps://"))
        .ok_or_else(|| "Ingest URL must start with rtmp:// or rtmps://".to_string())?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err("Ingest URL has no host".to_string());
    }
    Ok(())
}

// Keep the key out of debug output
impl std::fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTarget")
            .field("url", &self.redacted())
            .finish()
    }
}

/// Mask everything after the app path of an RTMP(S) URL.
/// A URL with a single path segment has that segment masked.
pub fn redact_url(url: &str) -> String {
    if !(url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
        return url.to_string();
    }

    let (scheme, rest) = match url.split_once("://") {
        Some(parts) => parts,
        None => return url.to_string(),
    };

    let (host, path) = match rest.split_once('/') {
        Some(parts) => parts,
        None => return url.to_string(),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => url.to_string(),
        [_] => format!("{scheme}://{host}/***"),
        [app, ..] => format!("{scheme}://{host}/{app}/***"),
    }
}

/// Redact every RTMP(S) URL appearing in a free-form line (FFmpeg output, errors)
pub fn redact_line(line: &str) -> String {
    if !(line.contains("rtmp://") || line.contains("rtmps://")) {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let next = match (rest.find("rtmp://"), rest.find("rtmps://")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(start) = next else {
            out.push_str(rest);
            break;
        };

        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '\'' || c == '"')
            .unwrap_or(tail.len());
        out.push_str(&redact_url(&tail[..end]));
        rest = &tail[end..];
    }

    out
}
