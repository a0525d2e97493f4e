use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating state reported by the plotter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum DeviceState {
    Idle,
    Running,
    Paused,
    Error,
    Unknown,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Idle => "IDLE",
            DeviceState::Running => "RUNNING",
            DeviceState::Paused => "PAUSED",
            DeviceState::Error => "ERROR",
            DeviceState::Unknown => "UNKNOWN",
        }
    }
}

impl From<&str> for DeviceState {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IDLE" => DeviceState::Idle,
            "RUNNING" => DeviceState::Running,
            "PAUSED" => DeviceState::Paused,
            "ERROR" => DeviceState::Error,
            _ => DeviceState::Unknown,
        }
    }
}

impl From<String> for DeviceState {
    fn from(raw: String) -> Self {
        DeviceState::from(raw.as_str())
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status observation as accepted by the poller.
///
/// `sequence` is assigned locally when the fetch is issued, so it orders
/// observations by when they were requested rather than by when the network
/// happened to deliver them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub progress: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub sequence: u64,
}

impl DeviceStatus {
    /// Placeholder used before the first poll lands and while connectivity is degraded.
    pub fn unknown(sequence: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            state: DeviceState::Unknown,
            progress: None,
            observed_at,
            sequence,
        }
    }

    pub fn with_state(&self, state: DeviceState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn progress_percent(&self) -> Option<u8> {
        self.progress.map(|p| (p * 100.0).round() as u8)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::unknown(0, DateTime::<Utc>::default())
    }
}

/// Wire shape of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: DeviceState,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl StatusPayload {
    pub fn into_status(self, sequence: u64, observed_at: DateTime<Utc>) -> DeviceStatus {
        DeviceStatus {
            state: self.state,
            progress: normalize_progress(self.progress),
            observed_at,
            sequence,
        }
    }
}

fn normalize_progress(raw: Option<f64>) -> Option<f64> {
    raw.filter(|p| p.is_finite()).map(|p| p.clamp(0.0, 1.0))
}
