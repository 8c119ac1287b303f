//! Wire protocol: closed tagged-variant types for everything that crosses a
//! connection. Unknown or malformed payloads fail to parse at the boundary
//! and never reach the handlers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::MonitorInfo;
use crate::room::Participant;
use crate::settings::{Settings, SettingsPatch};

/// Unix timestamp in seconds, millisecond precision. All wire timestamps use
/// this representation.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Everything a client may send. The first message on a connection must be
/// `join`; after that, any of the rest.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Join {
        #[serde(default)]
        name: Option<String>,
    },
    StartSharing,
    StopSharing,
    RequestPresenter,
    SettingsUpdate {
        settings: SettingsPatch,
    },
    ChatMessage {
        message: String,
    },
    // Pull surface: request/response pairs over the same channel.
    GetFrame,
    GetStats,
    GetMonitors,
    GetSettings,
}

/// Participant as seen on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub name: String,
    pub joined_at: f64,
    pub is_presenter: bool,
}

impl ParticipantInfo {
    pub fn new(participant: &Participant, is_presenter: bool) -> Self {
        Self {
            id: participant.id,
            name: participant.name.clone(),
            joined_at: participant.joined_at,
            is_presenter,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsPayload {
    /// Rolling actual fps over the last second, one decimal.
    pub fps: f32,
    pub frame_count: u64,
    pub resolution: (u32, u32),
    pub quality: u8,
    pub monitor: usize,
    /// Seconds since server start.
    pub uptime: f64,
    pub participant_count: usize,
    pub presenter_id: Option<Uuid>,
    pub room_id: String,
}

/// Everything the server may send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Welcome {
        user_id: Uuid,
        room_id: String,
        is_presenter: bool,
        users: Vec<ParticipantInfo>,
    },
    UserJoined {
        user: ParticipantInfo,
        total_users: usize,
    },
    UserLeft {
        user: ParticipantInfo,
        total_users: usize,
    },
    PresenterChanged {
        new_presenter: ParticipantInfo,
        users: Vec<ParticipantInfo>,
    },
    PresentationStarted {
        presenter: ParticipantInfo,
    },
    PresentationStopped {
        presenter: ParticipantInfo,
    },
    ChatMessage {
        user: ParticipantInfo,
        message: String,
        timestamp: f64,
    },
    SettingsUpdated {
        settings: Settings,
    },
    /// Pushed each tick while sharing, and the reply to `get_frame`.
    /// `frame` is base64 JPEG; `null` means no frame has been captured yet.
    Frame {
        frame: Option<String>,
        timestamp: f64,
        stats: StatsPayload,
    },
    Stats {
        #[serde(flatten)]
        stats: StatsPayload,
    },
    Monitors {
        monitors: Vec<MonitorInfo>,
    },
    Settings {
        settings: Settings,
    },
    Error {
        message: String,
    },
}
