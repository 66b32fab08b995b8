//! In-memory collaborators for tests and the loopback demo binary.
//!
//! Every mock records the calls it receives so tests can assert on device
//! state without a real media stack.

use super::{
    AudioFileTrack, ClassSession, DeviceSelection, Directory, JoinToken, JoinedSession,
    LocalMediaTrack, MediaSessionProvider, MediaStats, MusicFile, MusicLibrary, Navigator,
    RemoteUser, SessionApi, SessionStore, TransportEvent, UserProfile,
};
use crate::errors::{MediaError, ServiceError};
use crate::locked;
use crate::observability::{Dimensions, TelemetrySink};
use crate::video::{OptimizationMode, StreamType, VideoProfile};
use common::types::{SessionAcronym, TransportId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Media session
// ============================================================================

/// Mock media session provider.
pub struct MockMediaProvider {
    local_track: Arc<MockLocalTrack>,
    transport_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    joined_channel: Mutex<Option<SessionAcronym>>,
    join_count: AtomicUsize,
    leave_count: AtomicUsize,
    dual_stream_enabled: AtomicBool,
    fail_join: AtomicBool,
    fail_audio_tracks: AtomicBool,
    audio_tracks: Mutex<Vec<Arc<MockAudioFileTrack>>>,
    published: AtomicUsize,
    stream_types: Mutex<Vec<(TransportId, StreamType)>>,
    low_stream: Mutex<Option<VideoProfile>>,
}

impl Default for MockMediaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaProvider {
    /// Create a provider whose joins succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_track: Arc::new(MockLocalTrack::new()),
            transport_tx: Mutex::new(None),
            joined_channel: Mutex::new(None),
            join_count: AtomicUsize::new(0),
            leave_count: AtomicUsize::new(0),
            dual_stream_enabled: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            fail_audio_tracks: AtomicBool::new(false),
            audio_tracks: Mutex::new(Vec::new()),
            published: AtomicUsize::new(0),
            stream_types: Mutex::new(Vec::new()),
            low_stream: Mutex::new(None),
        }
    }

    /// Create a provider whose joins fail.
    #[must_use]
    pub fn failing_join() -> Self {
        let provider = Self::new();
        provider.fail_join.store(true, Ordering::SeqCst);
        provider
    }

    #[must_use]
    pub fn local_track(&self) -> Arc<MockLocalTrack> {
        Arc::clone(&self.local_track)
    }

    /// Raise a transport callback. Returns `false` if nobody is subscribed.
    pub fn emit(&self, event: TransportEvent) -> bool {
        locked(&self.transport_tx)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Whether a live subscriber holds the transport receiver.
    #[must_use]
    pub fn has_transport_subscriber(&self) -> bool {
        locked(&self.transport_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn fail_audio_tracks(&self, fail: bool) {
        self.fail_audio_tracks.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn joined_channel(&self) -> Option<SessionAcronym> {
        locked(&self.joined_channel).clone()
    }

    #[must_use]
    pub fn join_count(&self) -> usize {
        self.join_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leave_count(&self) -> usize {
        self.leave_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dual_stream_enabled(&self) -> bool {
        self.dual_stream_enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn audio_tracks_created(&self) -> usize {
        locked(&self.audio_tracks).len()
    }

    #[must_use]
    pub fn last_audio_track(&self) -> Option<Arc<MockAudioFileTrack>> {
        locked(&self.audio_tracks).last().cloned()
    }

    #[must_use]
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stream_types(&self) -> Vec<(TransportId, StreamType)> {
        locked(&self.stream_types).clone()
    }

    #[must_use]
    pub fn low_stream_profile(&self) -> Option<VideoProfile> {
        *locked(&self.low_stream)
    }
}

#[async_trait::async_trait]
impl MediaSessionProvider for MockMediaProvider {
    async fn selected_devices(&self) -> Result<DeviceSelection, MediaError> {
        Ok(DeviceSelection {
            microphone_id: Some("default-mic".to_string()),
            camera_id: Some("default-camera".to_string()),
        })
    }

    fn transport_events(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *locked(&self.transport_tx) = Some(tx);
        rx
    }

    async fn join(
        &self,
        channel: &SessionAcronym,
        _token: &JoinToken,
        user_number: Option<TransportId>,
        _devices: &DeviceSelection,
    ) -> Result<JoinedSession, MediaError> {
        self.join_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(MediaError::JoinFailed("mock join failure".to_string()));
        }
        *locked(&self.joined_channel) = Some(channel.clone());
        Ok(JoinedSession {
            transport_id: user_number.unwrap_or(TransportId(0)),
            local_track: self.local_track.clone(),
        })
    }

    async fn enable_dual_stream(&self) -> Result<(), MediaError> {
        self.dual_stream_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn leave(&self) -> Result<(), MediaError> {
        self.leave_count.fetch_add(1, Ordering::SeqCst);
        *locked(&self.joined_channel) = None;
        Ok(())
    }

    async fn create_audio_file_track(
        &self,
        _source: &MusicFile,
    ) -> Result<Arc<dyn AudioFileTrack>, MediaError> {
        if self.fail_audio_tracks.load(Ordering::SeqCst) {
            return Err(MediaError::Track("mock audio track failure".to_string()));
        }
        let track = Arc::new(MockAudioFileTrack::new());
        locked(&self.audio_tracks).push(Arc::clone(&track));
        Ok(track)
    }

    async fn publish(&self, _track: Arc<dyn AudioFileTrack>) -> Result<(), MediaError> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_remote_video_stream_type(
        &self,
        transport_id: TransportId,
        stream_type: StreamType,
    ) -> Result<(), MediaError> {
        locked(&self.stream_types).push((transport_id, stream_type));
        Ok(())
    }

    async fn set_low_stream_parameter(&self, profile: &VideoProfile) -> Result<(), MediaError> {
        *locked(&self.low_stream) = Some(*profile);
        Ok(())
    }
}

// ============================================================================
// Tracks
// ============================================================================

/// Mock local microphone + camera track.
pub struct MockLocalTrack {
    level: Mutex<f64>,
    mic_muted: AtomicBool,
    camera_enabled: AtomicBool,
    volume: AtomicU8,
    quality: Mutex<Option<VideoProfile>>,
    optimization: Mutex<Option<OptimizationMode>>,
    stopped: AtomicBool,
}

impl Default for MockLocalTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLocalTrack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: Mutex::new(0.0),
            mic_muted: AtomicBool::new(false),
            camera_enabled: AtomicBool::new(true),
            volume: AtomicU8::new(100),
            quality: Mutex::new(None),
            optimization: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, level: f64) {
        *locked(&self.level) = level;
    }

    #[must_use]
    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_camera_enabled(&self) -> bool {
        self.camera_enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn quality(&self) -> Option<VideoProfile> {
        *locked(&self.quality)
    }

    #[must_use]
    pub fn optimization_mode(&self) -> Option<OptimizationMode> {
        *locked(&self.optimization)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LocalMediaTrack for MockLocalTrack {
    fn volume_level(&self) -> f64 {
        *locked(&self.level)
    }

    fn stats(&self) -> MediaStats {
        let quality = self.quality().unwrap_or(crate::video::DEFAULT_PROFILE);
        MediaStats {
            bitrate_kbps: quality.bitrate_kbps,
            packet_loss_rate: 0.0,
            frame_width: quality.width,
            frame_height: quality.height,
        }
    }

    async fn set_volume(&self, volume: u8) -> Result<(), MediaError> {
        self.volume.store(volume, Ordering::SeqCst);
        Ok(())
    }

    async fn set_microphone_muted(&self, muted: bool) -> Result<(), MediaError> {
        self.mic_muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), MediaError> {
        self.camera_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn set_video_quality(&self, profile: &VideoProfile) -> Result<(), MediaError> {
        *locked(&self.quality) = Some(*profile);
        Ok(())
    }

    async fn set_optimization_mode(&self, mode: OptimizationMode) -> Result<(), MediaError> {
        *locked(&self.optimization) = Some(mode);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock remote user.
pub struct MockRemoteUser {
    id: TransportId,
    level: Mutex<f64>,
    playback_muted: AtomicBool,
}

impl MockRemoteUser {
    #[must_use]
    pub fn new(transport_id: u32) -> Self {
        Self {
            id: TransportId(transport_id),
            level: Mutex::new(0.0),
            playback_muted: AtomicBool::new(false),
        }
    }

    pub fn set_level(&self, level: f64) {
        *locked(&self.level) = level;
    }

    #[must_use]
    pub fn is_playback_muted(&self) -> bool {
        self.playback_muted.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteUser for MockRemoteUser {
    fn transport_id(&self) -> TransportId {
        self.id
    }

    fn audio_level(&self) -> f64 {
        *locked(&self.level)
    }

    fn stats(&self) -> MediaStats {
        MediaStats::default()
    }

    async fn set_playback_muted(&self, muted: bool) -> Result<(), MediaError> {
        self.playback_muted.store(muted, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock background music track.
pub struct MockAudioFileTrack {
    volume: AtomicU8,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    stopped: AtomicBool,
}

impl Default for MockAudioFileTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAudioFileTrack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            volume: AtomicU8::new(0),
            plays: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AudioFileTrack for MockAudioFileTrack {
    async fn set_volume(&self, volume: u8) -> Result<(), MediaError> {
        self.volume.store(volume, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&self, _looped: bool) -> Result<(), MediaError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> Result<(), MediaError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), MediaError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MediaError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Directory / sessions / navigation
// ============================================================================

/// Mock directory backed by a profile list.
pub struct MockDirectory {
    profiles: Mutex<Vec<UserProfile>>,
    delays: Mutex<HashMap<TransportId, Duration>>,
    lookups: AtomicUsize,
    return_error: AtomicBool,
}

impl MockDirectory {
    #[must_use]
    pub fn with_profiles(profiles: Vec<UserProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles),
            delays: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            return_error: AtomicBool::new(false),
        }
    }

    /// Create a directory whose lookups fail.
    #[must_use]
    pub fn failing() -> Self {
        let directory = Self::with_profiles(Vec::new());
        directory.return_error.store(true, Ordering::SeqCst);
        directory
    }

    /// Slow down lookups for one transport id.
    pub fn delay_lookup(&self, user_number: TransportId, delay: Duration) {
        locked(&self.delays).insert(user_number, delay);
    }

    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Directory for MockDirectory {
    async fn user_by_number(
        &self,
        user_number: TransportId,
    ) -> Result<Option<UserProfile>, ServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = locked(&self.delays).get(&user_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.return_error.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("mock directory error".to_string()));
        }
        Ok(locked(&self.profiles)
            .iter()
            .find(|p| p.user_number == Some(user_number))
            .cloned())
    }

    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserProfile>, ServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.return_error.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("mock directory error".to_string()));
        }
        Ok(locked(&self.profiles).iter().find(|p| &p.id == id).cloned())
    }
}

/// Mock session API for one signed-in user.
pub struct MockSessionApi {
    user: UserProfile,
    sessions: Mutex<Vec<ClassSession>>,
    tokens_issued: AtomicUsize,
}

impl MockSessionApi {
    #[must_use]
    pub fn new(user: UserProfile, sessions: Vec<ClassSession>) -> Self {
        Self {
            user,
            sessions: Mutex::new(sessions),
            tokens_issued: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn tokens_issued(&self) -> usize {
        self.tokens_issued.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionApi for MockSessionApi {
    async fn current_user(&self) -> Result<UserProfile, ServiceError> {
        Ok(self.user.clone())
    }

    async fn session_by_name(&self, name: &str) -> Result<Option<ClassSession>, ServiceError> {
        Ok(locked(&self.sessions)
            .iter()
            .find(|s| s.name == name || s.acronym.as_str() == name)
            .cloned())
    }

    async fn join_token(
        &self,
        session: &ClassSession,
        user: &UserProfile,
    ) -> Result<JoinToken, ServiceError> {
        self.tokens_issued.fetch_add(1, Ordering::SeqCst);
        Ok(JoinToken(format!("{}:{}", session.acronym, user.id)))
    }
}

/// Session store that counts calls and can refuse to persist.
#[derive(Default)]
pub struct MockSessionStore {
    current: Mutex<Option<SessionAcronym>>,
    fail_set_state: AtomicBool,
    set_count: AtomicUsize,
    close_count: AtomicUsize,
}

impl MockSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose `set_state` fails.
    #[must_use]
    pub fn failing() -> Self {
        let store = Self::new();
        store.fail_set_state.store(true, Ordering::SeqCst);
        store
    }

    #[must_use]
    pub fn set_count(&self) -> usize {
        self.set_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionStore for MockSessionStore {
    async fn set_state(&self, session: &ClassSession, _user: &UserId) -> Result<(), ServiceError> {
        self.set_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_set_state.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("mock session store error".to_string()));
        }
        *locked(&self.current) = Some(session.acronym.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.current).take();
        Ok(())
    }

    fn session_acronym(&self) -> Option<SessionAcronym> {
        locked(&self.current).clone()
    }
}

/// Records navigation requests.
#[derive(Default)]
pub struct MockNavigator {
    paths: Mutex<Vec<String>>,
    reloads: AtomicUsize,
}

impl MockNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        locked(&self.paths).clone()
    }

    #[must_use]
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Navigator for MockNavigator {
    fn navigate(&self, path: &str) {
        locked(&self.paths).push(path.to_string());
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fixed music catalogue.
pub struct MockMusicLibrary {
    files: Vec<MusicFile>,
}

impl MockMusicLibrary {
    #[must_use]
    pub fn new(titles: &[&str]) -> Self {
        Self {
            files: titles
                .iter()
                .map(|t| MusicFile {
                    title: (*t).to_string(),
                    url: format!("memory://music/{}", t.replace(' ', "_")),
                })
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl MusicLibrary for MockMusicLibrary {
    async fn music_files(&self) -> Result<Vec<MusicFile>, ServiceError> {
        Ok(self.files.clone())
    }
}

/// One recorded telemetry call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: String,
    pub value: f64,
    pub percentage: f64,
    pub dimensions: Dimensions,
}

/// Telemetry sink that keeps every call in memory.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        locked(&self.events).clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        locked(&self.events).iter().map(|e| e.event.clone()).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &str, value: f64, percentage: f64, dimensions: &Dimensions) {
        locked(&self.events).push(RecordedEvent {
            event: event.to_string(),
            value,
            percentage: crate::observability::clamp_percentage(percentage),
            dimensions: dimensions.clone(),
        });
    }
}
