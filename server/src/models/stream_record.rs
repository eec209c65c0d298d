// StreamRecord Model
// Lifecycle of a single launched test stream

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::OutputBuffer;

/// Lifecycle state of a launched stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// FFmpeg is running
    Running,
    /// FFmpeg exited on its own
    Exited,
    /// Killed by the duration timeout
    Terminated,
    /// Stopped on request (API or shutdown)
    Stopped,
    /// Waiting on the process failed
    Failed,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Registry entry for one launch
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub id: String,
    /// Redacted ingest URL
    pub stream_url: String,
    pub state: StreamState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: OutputBuffer,
}

impl StreamRecord {
    pub fn running(id: String, stream_url: String, pid: Option<u32>, output: OutputBuffer) -> Self {
        Self {
            id,
            stream_url,
            state: StreamState::Running,
            pid,
            exit_code: None,
            started_at: Utc::now(),
            ended_at: None,
            output,
        }
    }

    /// Move to a terminal state; a record that already finished is left untouched
    pub fn finish(&mut self, state: StreamState, exit_code: Option<i32>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.exit_code = exit_code;
        self.ended_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id.clone(),
            stream_url: self.stream_url.clone(),
            state: self.state,
            pid: self.pid,
            exit_code: self.exit_code,
            started_at: self.started_at,
            ended_at: self.ended_at,
            recent_output: self.output.snapshot(),
        }
    }
}

/// Serializable view of a [`StreamRecord`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub id: String,
    pub stream_url: String,
    pub state: StreamState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub recent_output: Vec<String>,
}
