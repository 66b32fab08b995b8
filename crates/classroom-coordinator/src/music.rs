//! Background music mixer.
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused --play--> Playing
//!    ^                 |                  |
//!    +------stop-------+------stop--------+
//! ```
//!
//! A toggle guard rejects overlapping UI toggles while a transition is in
//! flight. Only the toggle that claimed it releases it; commands from other
//! sources never touch it. Play from Stopped creates
//! and publishes a single audio-file track. Stop disposes the track, so the
//! next Play creates a fresh one.

use crate::errors::MediaError;
use crate::observability::metrics;
use crate::providers::{AudioFileTrack, MediaSessionProvider, MusicFile};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Step applied by volume up / down commands.
const VOLUME_STEP: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicState {
    Stopped,
    Paused,
    Playing,
}

impl MusicState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MusicState::Stopped => "stopped",
            MusicState::Paused => "paused",
            MusicState::Playing => "playing",
        }
    }
}

struct MixerInner {
    track: Option<Arc<dyn AudioFileTrack>>,
    selected: Option<MusicFile>,
    volume: u8,
}

pub struct MusicMixer {
    media: Arc<dyn MediaSessionProvider>,
    toggle_in_flight: AtomicBool,
    inner: Mutex<MixerInner>,
    state_tx: watch::Sender<MusicState>,
    ready_tx: watch::Sender<bool>,
}

impl MusicMixer {
    #[must_use]
    pub fn new(media: Arc<dyn MediaSessionProvider>, volume: u8) -> Self {
        let (state_tx, _) = watch::channel(MusicState::Stopped);
        let (ready_tx, _) = watch::channel(false);
        Self {
            media,
            toggle_in_flight: AtomicBool::new(false),
            inner: Mutex::new(MixerInner {
                track: None,
                selected: None,
                volume,
            }),
            state_tx,
            ready_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> MusicState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<MusicState> {
        self.state_tx.subscribe()
    }

    /// Claim the toggle guard. Returns `false` if a toggle is already in flight.
    pub fn try_begin_toggle(&self) -> bool {
        self.toggle_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_toggle_in_flight(&self) -> bool {
        self.toggle_in_flight.load(Ordering::Acquire)
    }

    /// Release the toggle guard. Called by the toggle that claimed it, once
    /// its command has been handled or it gave up.
    pub fn release_toggle(&self) {
        self.toggle_in_flight.store(false, Ordering::Release);
    }

    fn set_state(&self, state: MusicState) {
        self.state_tx.send_replace(state);
        metrics::record_music_transition(state.as_str());
    }

    /// Whether a song is selected and playback can start.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Wait until the library has loaded and a song is selected.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // Only fails if the sender is dropped, which outlives `self`.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Select the song played by the next Play from Stopped.
    pub async fn select(&self, file: MusicFile) {
        debug!(target: "classroom.music", title = %file.title, "Song selected");
        self.inner.lock().await.selected = Some(file);
        self.ready_tx.send_replace(true);
    }

    /// Select `default_song` from `files`, falling back to the first file.
    pub async fn load_library(&self, files: Vec<MusicFile>, default_song: &str) {
        let chosen = files
            .iter()
            .find(|f| f.title == default_song)
            .or_else(|| files.first())
            .cloned();
        match chosen {
            Some(file) => self.select(file).await,
            None => warn!(target: "classroom.music", "Music library is empty"),
        }
    }

    pub async fn selected(&self) -> Option<MusicFile> {
        self.inner.lock().await.selected.clone()
    }

    pub async fn volume(&self) -> u8 {
        self.inner.lock().await.volume
    }

    /// Start or resume playback.
    ///
    /// # Errors
    ///
    /// Returns the media error if the track cannot be created, published or
    /// started. State is left unchanged in that case.
    pub async fn play(&self) -> Result<(), MediaError> {
        let mut inner = self.inner.lock().await;
        match self.state() {
            MusicState::Playing => Ok(()),
            MusicState::Paused => {
                if let Some(track) = &inner.track {
                    track.resume().await?;
                }
                self.set_state(MusicState::Playing);
                Ok(())
            }
            MusicState::Stopped => {
                let Some(file) = inner.selected.clone() else {
                    debug!(target: "classroom.music", "Play ignored, no song selected");
                    return Ok(());
                };
                let track = self.media.create_audio_file_track(&file).await?;
                track.set_volume(inner.volume).await?;
                self.media.publish(Arc::clone(&track)).await?;
                track.play(true).await?;
                inner.track = Some(track);
                self.set_state(MusicState::Playing);
                info!(target: "classroom.music", title = %file.title, "Music started");
                Ok(())
            }
        }
    }

    /// Pause playback. A no-op unless playing.
    ///
    /// # Errors
    ///
    /// Returns the media error if the track refuses to pause.
    pub async fn pause(&self) -> Result<(), MediaError> {
        let inner = self.inner.lock().await;
        if self.state() != MusicState::Playing {
            return Ok(());
        }
        if let Some(track) = &inner.track {
            track.pause().await?;
        }
        self.set_state(MusicState::Paused);
        Ok(())
    }

    /// Stop playback and dispose the track.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(track) = inner.track.take() {
            if let Err(e) = track.stop().await {
                warn!(target: "classroom.music", error = %e, "Failed to stop music track");
            }
        }
        if self.state() != MusicState::Stopped {
            self.set_state(MusicState::Stopped);
        }
    }

    /// Set the music volume (0-100).
    pub async fn set_volume(&self, volume: u8) {
        let volume = volume.min(100);
        let mut inner = self.inner.lock().await;
        inner.volume = volume;
        if let Some(track) = &inner.track {
            if let Err(e) = track.set_volume(volume).await {
                warn!(target: "classroom.music", error = %e, "Failed to set music volume");
            }
        }
    }

    pub async fn volume_up(&self) {
        let current = self.volume().await;
        self.set_volume(current.saturating_add(VOLUME_STEP)).await;
    }

    pub async fn volume_down(&self) {
        let current = self.volume().await;
        self.set_volume(current.saturating_sub(VOLUME_STEP)).await;
    }
}
