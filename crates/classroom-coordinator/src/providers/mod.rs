//! Collaborators the coordinator consumes.
//!
//! Each seam is an object-safe async trait so that production adapters and
//! the in-memory doubles in [`mock`] are interchangeable behind `Arc<dyn _>`.

pub mod mock;
pub mod session_store;

pub use session_store::LocalSessionStore;

use crate::errors::{MediaError, ServiceError};
use crate::observability::TelemetrySink;
use crate::video::{OptimizationMode, StreamType, VideoProfile};
use common::types::{SessionAcronym, TransportId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Directory profile for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    /// Transport-level number the user joins the media channel with.
    pub user_number: Option<TransportId>,
    pub name: String,
}

impl UserProfile {
    #[must_use]
    pub fn new(id: &str, user_number: u32, name: &str) -> Self {
        Self {
            id: UserId::new(id),
            user_number: Some(TransportId(user_number)),
            name: name.to_string(),
        }
    }
}

/// Whether the session is a scheduled class or an ad-hoc meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Class,
    AdHoc,
}

/// Class session details resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub acronym: SessionAcronym,
    pub name: String,
    pub class_id: Option<String>,
    pub kind: SessionKind,
    pub instructor_id: UserId,
    /// Official participant list, excluding the instructor.
    pub participants: Vec<UserId>,
    pub optimization_mode: Option<OptimizationMode>,
}

/// Token used to join the media channel.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinToken(pub String);

impl fmt::Debug for JoinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JoinToken([REDACTED])")
    }
}

/// Microphone / camera chosen by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub microphone_id: Option<String>,
    pub camera_id: Option<String>,
}

/// Result of joining the media channel.
#[derive(Clone)]
pub struct JoinedSession {
    pub transport_id: TransportId,
    pub local_track: Arc<dyn LocalMediaTrack>,
}

/// Per-track transport statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaStats {
    pub bitrate_kbps: u32,
    pub packet_loss_rate: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Connection state reported for a remote user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Connecting,
    Reconnecting,
    Disconnecting,
    Disconnected,
}

/// Local uplink / downlink quality (0 = unknown, 1 = excellent .. 6 = down).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkQuality {
    pub uplink: u8,
    pub downlink: u8,
}

/// Callbacks raised by the media transport.
#[derive(Clone)]
pub enum TransportEvent {
    UserJoined(Arc<dyn RemoteUser>),
    UserLeft(TransportId),
    ConnectionStateChanged {
        user: Arc<dyn RemoteUser>,
        state: ConnectionState,
    },
    NetworkQuality(NetworkQuality),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::UserJoined(user) => write!(f, "UserJoined({})", user.transport_id()),
            TransportEvent::UserLeft(id) => write!(f, "UserLeft({id})"),
            TransportEvent::ConnectionStateChanged { user, state } => {
                write!(f, "ConnectionStateChanged({}, {state:?})", user.transport_id())
            }
            TransportEvent::NetworkQuality(q) => write!(f, "NetworkQuality({q:?})"),
        }
    }
}

/// The real-time media session (channel join, publishing, stream control).
#[async_trait::async_trait]
pub trait MediaSessionProvider: Send + Sync {
    /// Resolve the user's selected microphone and camera.
    async fn selected_devices(&self) -> Result<DeviceSelection, MediaError>;

    /// Subscribe to transport callbacks. Dropping the receiver unsubscribes.
    fn transport_events(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    async fn join(
        &self,
        channel: &SessionAcronym,
        token: &JoinToken,
        user_number: Option<TransportId>,
        devices: &DeviceSelection,
    ) -> Result<JoinedSession, MediaError>;

    async fn enable_dual_stream(&self) -> Result<(), MediaError>;

    async fn leave(&self) -> Result<(), MediaError>;

    async fn create_audio_file_track(
        &self,
        source: &MusicFile,
    ) -> Result<Arc<dyn AudioFileTrack>, MediaError>;

    async fn publish(&self, track: Arc<dyn AudioFileTrack>) -> Result<(), MediaError>;

    async fn set_remote_video_stream_type(
        &self,
        transport_id: TransportId,
        stream_type: StreamType,
    ) -> Result<(), MediaError>;

    async fn set_low_stream_parameter(&self, profile: &VideoProfile) -> Result<(), MediaError>;
}

/// The local microphone + camera track.
#[async_trait::async_trait]
pub trait LocalMediaTrack: Send + Sync {
    /// Current microphone level in 0.0-1.0.
    fn volume_level(&self) -> f64;

    fn stats(&self) -> MediaStats;

    async fn set_volume(&self, volume: u8) -> Result<(), MediaError>;

    async fn set_microphone_muted(&self, muted: bool) -> Result<(), MediaError>;

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    async fn set_video_quality(&self, profile: &VideoProfile) -> Result<(), MediaError>;

    async fn set_optimization_mode(&self, mode: OptimizationMode) -> Result<(), MediaError>;

    async fn stop(&self) -> Result<(), MediaError>;
}

/// A remote user's subscribed tracks.
#[async_trait::async_trait]
pub trait RemoteUser: Send + Sync {
    fn transport_id(&self) -> TransportId;

    /// Current audio level in 0.0-1.0.
    fn audio_level(&self) -> f64;

    fn stats(&self) -> MediaStats;

    /// Mute local playback of this user's audio.
    async fn set_playback_muted(&self, muted: bool) -> Result<(), MediaError>;
}

/// Background music track.
#[async_trait::async_trait]
pub trait AudioFileTrack: Send + Sync {
    async fn set_volume(&self, volume: u8) -> Result<(), MediaError>;

    async fn play(&self, looped: bool) -> Result<(), MediaError>;

    async fn pause(&self) -> Result<(), MediaError>;

    async fn resume(&self) -> Result<(), MediaError>;

    /// Stop and release the track.
    async fn stop(&self) -> Result<(), MediaError>;
}

/// One playable music file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicFile {
    pub title: String,
    pub url: String,
}

/// User directory lookups.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_number(
        &self,
        user_number: TransportId,
    ) -> Result<Option<UserProfile>, ServiceError>;

    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserProfile>, ServiceError>;
}

/// Session and identity lookups.
#[async_trait::async_trait]
pub trait SessionApi: Send + Sync {
    /// The signed-in user.
    async fn current_user(&self) -> Result<UserProfile, ServiceError>;

    async fn session_by_name(&self, name: &str) -> Result<Option<ClassSession>, ServiceError>;

    /// Media join token. Classes and ad-hoc meetings use different issuers.
    async fn join_token(
        &self,
        session: &ClassSession,
        user: &UserProfile,
    ) -> Result<JoinToken, ServiceError>;
}

/// Persists "joined" / "closed" session state.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn set_state(&self, session: &ClassSession, user: &UserId) -> Result<(), ServiceError>;

    async fn close(&self) -> Result<(), ServiceError>;

    fn session_acronym(&self) -> Option<SessionAcronym>;
}

/// Page navigation.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);

    fn reload(&self);
}

/// Background music catalogue.
#[async_trait::async_trait]
pub trait MusicLibrary: Send + Sync {
    async fn music_files(&self) -> Result<Vec<MusicFile>, ServiceError>;
}

/// Everything a coordinator talks to.
#[derive(Clone)]
pub struct Services {
    pub media: Arc<dyn MediaSessionProvider>,
    pub directory: Arc<dyn Directory>,
    pub sessions: Arc<dyn SessionApi>,
    pub store: Arc<dyn SessionStore>,
    pub navigator: Arc<dyn Navigator>,
    pub music_library: Arc<dyn MusicLibrary>,
    pub telemetry: Arc<dyn TelemetrySink>,
}
