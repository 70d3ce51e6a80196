//! Session identities and the client-facing request/notification types.

use std::fmt::{Display, Formatter};
use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::format::MediaFormat;

/// Identity of a connected client process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClientId(pub i64);

/// Client-chosen session identity, unique per client.
///
/// Signed on purpose: a negative id passed to cancel means "all of this
/// client's real-time sessions".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(pub i32);

/// Scheduler-wide session key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionKey {
    pub client: ClientId,
    pub session: SessionId,
}

impl SessionKey {
    pub fn new(client: ClientId, session: SessionId) -> Self {
        Self { client, session }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{client:{}, session:{}}}", self.client.0, self.session.0)
    }
}

/// Platform identity of the application that submitted a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubmitterId(pub u32);

impl SubmitterId {
    /// Sentinel identity for background work with unspecified priority.
    pub const OFFLINE: SubmitterId = SubmitterId(u32::MAX);

    pub fn is_offline(self) -> bool {
        self == Self::OFFLINE
    }
}

impl Display for SubmitterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_offline() {
            f.write_str("(offline)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Requested scheduling class of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    /// Routed to the offline queue regardless of submitter.
    #[default]
    Unspecified,
    /// Competes by submitter foreground priority.
    Realtime,
}

/// A client's transcoding request. Opaque to the scheduler beyond its
/// priority; the pipeline consumes the formats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodingRequest {
    pub source_path: String,
    pub destination_path: String,
    pub priority: Priority,
    pub source_format: Option<MediaFormat>,
    pub destination_format: Option<MediaFormat>,
}

/// Lifecycle state of a scheduled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Paused,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::NotStarted => f.write_str("NOT_STARTED"),
            SessionState::Running => f.write_str("RUNNING"),
            SessionState::Paused => f.write_str("PAUSED"),
        }
    }
}

/// Notification sink back to the submitting client.
///
/// Held weakly by the scheduler; a client that went away simply stops
/// receiving notifications. Invoked with the scheduler lock held, so
/// implementations must not call back into the scheduler.
pub trait ClientCallback: Send + Sync {
    fn on_started(&self, session: SessionId);
    fn on_paused(&self, session: SessionId);
    fn on_resumed(&self, session: SessionId);
    fn on_finished(&self, session: SessionId);
    fn on_failed(&self, session: SessionId, error: TranscodeError);
    fn on_progress_update(&self, session: SessionId, progress: u32);
}

/// Weak handle to a client callback as stored by the scheduler.
pub type ClientCallbackRef = Weak<dyn ClientCallback>;
