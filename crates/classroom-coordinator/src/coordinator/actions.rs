//! User-intent entry points called by UI bindings.
//!
//! Almost every action becomes a Command on the bus; the coordinators that
//! are addressed (this one included) act on it when it is delivered.

use super::{Inner, MeetingCoordinator};
use crate::errors::CoordinatorError;
use crate::events::{on_off, EventKind, MusicCommand, RecordState, ANY_SUBJECT, SERVER};
use crate::locked;
use crate::music::MusicState;
use crate::observability::{timestamp_bucket, Dimensions};
use crate::policy::EndOfClassDialog;
use crate::providers::MusicFile;
use crate::video::{OptimizationMode, StreamType, View};
use common::types::UserId;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long a music toggle waits for the library before giving up.
const MUSIC_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Answer to the end-of-class dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndClassChoice {
    Cancel,
    Leave,
    /// End the class for everyone. Treated as `Leave` where the role cannot
    /// end the class.
    End,
}

impl Inner {
    /// Fire-and-forget UI analytics.
    fn track(&self, event: &str, value: f64, percentage: f64) {
        let dimensions = Dimensions {
            class_id: self.session.class_id.clone(),
            class_name: self.session.name.clone(),
            class_acronym: self.session.acronym.to_string(),
            instructor_id: self.session.instructor_id.to_string(),
            is_instructor: self.local_user.id == self.session.instructor_id,
            participant_id: self.local_user.id.to_string(),
            session_remote_user_id: locked(&self.state).local_transport_id.map(|t| t.0),
            user_name: self.local_user.name.clone(),
            ts: timestamp_bucket(chrono::Utc::now()),
        };
        self.services
            .telemetry
            .record(event, value, percentage, &dimensions);
    }

    /// Release the music toggle guard once the toggle's own command is
    /// among the `done` handled events.
    pub(super) fn finish_music_toggle(&self, done: u64) {
        let pending = self.music_toggle_seq.load(Ordering::SeqCst);
        if pending != 0
            && done >= pending
            && self
                .music_toggle_seq
                .compare_exchange(pending, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.music.release_toggle();
        }
    }

    fn require_moderator(&self, action: &'static str) -> Result<(), CoordinatorError> {
        if self.policy.show_remote_controls() {
            Ok(())
        } else {
            debug!(target: "classroom.coordinator", action, "Moderation action refused");
            Err(CoordinatorError::NotPermitted(action))
        }
    }

    /// Moderators change everyone's view; others only their own.
    fn publish_view(&self, view: &View) {
        if self.policy.show_remote_controls() {
            self.publish_command(EventKind::ChangeViewAll, ANY_SUBJECT, view.to_target());
        } else {
            self.publish_command(
                EventKind::ChangeView,
                self.local_user.id.as_str(),
                view.to_target(),
            );
        }
    }
}

impl MeetingCoordinator {
    fn local_flags(&self) -> (bool, bool) {
        self.inner
            .snapshot_tx
            .borrow()
            .records
            .iter()
            .find(|r| r.is_local_preview)
            .map_or((true, true), |r| (r.is_mic_on, r.is_camera_on))
    }

    pub fn do_toggle_mic_click(&self) {
        let (mic_on, _) = self.local_flags();
        let kind = if mic_on {
            EventKind::MicOff
        } else {
            EventKind::MicOn
        };
        self.inner
            .publish_command(kind, self.inner.local_user.id.as_str(), "");
        self.inner.track("toggle_mic", if mic_on { 0.0 } else { 1.0 }, 0.0);
    }

    pub fn do_toggle_camera_click(&self) {
        let (_, camera_on) = self.local_flags();
        let kind = if camera_on {
            EventKind::CameraOff
        } else {
            EventKind::CameraOn
        };
        self.inner
            .publish_command(kind, self.inner.local_user.id.as_str(), "");
        self.inner
            .track("toggle_camera", if camera_on { 0.0 } else { 1.0 }, 0.0);
    }

    /// Spotlight `user`, or return to group view if they already are.
    /// Moderators also promote the user's remote stream to the high layer.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::ParticipantNotFound`] if `user` has no
    /// roster record.
    #[instrument(skip_all, fields(user_id = %user))]
    pub async fn do_spotlight_event(&self, user: &UserId) -> Result<(), CoordinatorError> {
        let remote_joined = self
            .inner
            .snapshot_tx
            .borrow()
            .find(user)
            .map(|r| r.is_joined && !r.is_local_preview)
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(user.clone()))?;
        if self.current_view() == View::Spotlight(user.clone()) {
            self.do_group_view_click();
            return Ok(());
        }
        self.inner.publish_view(&View::Spotlight(user.clone()));
        if remote_joined && self.inner.policy.can_adjust_remote_streams() {
            self.set_remote_video_stream_type(user, StreamType::High)
                .await?;
        }
        self.inner.track("spotlight", 1.0, 100.0);
        Ok(())
    }

    pub fn do_group_view_click(&self) {
        self.inner.publish_view(&View::Group);
        self.inner.track("group_view", 1.0, 100.0);
    }

    /// Switch to the instructor-only view.
    pub fn do_spotlight_view_click(&self) {
        self.inner.publish_view(&View::Instructor);
        self.inner.track("instructor_view", 1.0, 100.0);
    }

    pub fn do_ask_for_help_click(&self) {
        let wanted = !self.asked_for_help();
        self.inner.publish_command(
            EventKind::HelpWanted,
            self.inner.local_user.id.as_str(),
            on_off(wanted),
        );
        self.inner
            .track("ask_for_help", if wanted { 1.0 } else { 0.0 }, 0.0);
    }

    /// Clear `user`'s help request.
    pub fn do_clear_help(&self, user: &UserId) {
        self.inner
            .publish_command(EventKind::ClearHelp, user.as_str(), "");
        self.inner.track("clear_help", 0.0, 0.0);
    }

    /// Mute every participant's microphone.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants.
    pub fn do_mute_all_click(&self) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("mute_all")?;
        self.inner
            .publish_command(EventKind::MuteMicAll, ANY_SUBJECT, "");
        self.inner.track("mute_all", 0.0, 0.0);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants.
    pub fn do_unmute_all_click(&self) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("unmute_all")?;
        self.inner
            .publish_command(EventKind::UnmuteMicAll, ANY_SUBJECT, "");
        self.inner.track("unmute_all", 1.0, 0.0);
        Ok(())
    }

    /// Start or pause background music for the room. Participants are muted
    /// first so the music is audible. Returns `false` if a toggle is
    /// already in flight or the library never became ready.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] if the role has no music.
    #[instrument(skip_all)]
    pub async fn do_toggle_music_click(&self) -> Result<bool, CoordinatorError> {
        if !self.inner.policy.loads_music() {
            return Err(CoordinatorError::NotPermitted("music"));
        }
        let music = &self.inner.music;
        if !music.try_begin_toggle() {
            debug!(target: "classroom.music", "Music toggle already in flight");
            return Ok(false);
        }

        self.do_mute_all_click()?;
        if tokio::time::timeout(MUSIC_READY_TIMEOUT, music.wait_ready())
            .await
            .is_err()
        {
            warn!(target: "classroom.music", "Music library not ready, toggle abandoned");
            music.release_toggle();
            return Ok(false);
        }

        let command = if music.state() == MusicState::Playing {
            MusicCommand::Pause
        } else {
            MusicCommand::Play
        };
        self.inner
            .publish_command(EventKind::Music, ANY_SUBJECT, command.as_str());
        // Delivery is synchronous, so the command is already counted.
        let seq = self.inner.received.load(Ordering::SeqCst);
        self.inner.music_toggle_seq.store(seq, Ordering::SeqCst);
        let done = *self.inner.processed_tx.borrow();
        self.inner.finish_music_toggle(done);
        self.inner.track("toggle_music", 1.0, 0.0);
        Ok(true)
    }

    /// Stop the music everywhere, then select `file` for the next play.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] if the role has no music.
    pub async fn do_music_selected(&self, file: MusicFile) -> Result<(), CoordinatorError> {
        if !self.inner.policy.loads_music() {
            return Err(CoordinatorError::NotPermitted("music"));
        }
        self.inner
            .publish_command(EventKind::Music, ANY_SUBJECT, MusicCommand::Stop.as_str());
        self.inner.music.select(file).await;
        self.inner.track("music_selected", 1.0, 0.0);
        Ok(())
    }

    /// Ask the backend to start or pause recording.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants.
    pub fn toggle_recording(&self) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("recording")?;
        let state = if self.is_recording() {
            RecordState::Pause
        } else {
            RecordState::On
        };
        self.inner
            .publish_command(EventKind::Record, SERVER, state.as_str());
        self.inner.track("toggle_recording", 1.0, 0.0);
        Ok(())
    }

    /// Toggle a participant's microphone.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants and
    /// [`CoordinatorError::ParticipantNotFound`] for unknown users.
    pub fn do_participant_microphone_event(&self, user: &UserId) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("participant_microphone")?;
        let mic_on = self.remote_flag(user, |r| r.is_mic_on)?;
        let kind = if mic_on {
            EventKind::MicOff
        } else {
            EventKind::MicOn
        };
        self.inner.publish_command(kind, user.as_str(), "");
        self.inner.track("participant_microphone", 1.0, 0.0);
        Ok(())
    }

    /// Toggle a participant's camera.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants and
    /// [`CoordinatorError::ParticipantNotFound`] for unknown users.
    pub fn do_participant_video_event(&self, user: &UserId) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("participant_video")?;
        let camera_on = self.remote_flag(user, |r| r.is_camera_on)?;
        let kind = if camera_on {
            EventKind::CameraOff
        } else {
            EventKind::CameraOn
        };
        self.inner.publish_command(kind, user.as_str(), "");
        self.inner.track("participant_video", 1.0, 0.0);
        Ok(())
    }

    /// Force a participant's page to reload.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants.
    pub fn do_participant_start_over(&self, user: &UserId) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("participant_start_over")?;
        self.inner
            .publish_command(EventKind::StartOver, user.as_str(), "");
        self.inner.track("participant_start_over", 1.0, 0.0);
        Ok(())
    }

    /// Set the camera encoder hint for the whole room.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] for participants.
    pub fn do_video_optimization_mode_selected(
        &self,
        mode: OptimizationMode,
    ) -> Result<(), CoordinatorError> {
        self.inner.require_moderator("video_optimization_mode")?;
        self.inner
            .publish_command(EventKind::VideoOptimizationMode, ANY_SUBJECT, mode.as_str());
        self.inner.track("video_optimization_mode", 1.0, 0.0);
        Ok(())
    }

    #[must_use]
    pub fn end_class_dialog(&self) -> EndOfClassDialog {
        self.inner.policy.end_of_class_dialog()
    }

    /// Act on the end-of-class dialog. Leaving navigates to the leave page;
    /// ending also tells every participant to go there when the role allows.
    pub fn end_class(&self, choice: EndClassChoice) {
        let leave_url = self.inner.leave_url();
        match choice {
            EndClassChoice::Cancel => return,
            EndClassChoice::Leave => {}
            EndClassChoice::End => {
                if let Some(broadcast) = self
                    .inner
                    .policy
                    .end_class_broadcast(&leave_url, self.inner.acronym())
                {
                    info!(target: "classroom.coordinator", session = %self.inner.acronym(), "Ending class for everyone");
                    self.inner.bus.publish(&broadcast);
                }
            }
        }
        self.inner.track("end_class", 1.0, 100.0);
        self.inner.services.navigator.navigate(&leave_url);
    }

    /// Pick the simulcast layer for `user`. Choosing `High` demotes every
    /// other joined remote user to `Low`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotPermitted`] if the role may not pick
    /// remote layers, [`CoordinatorError::ParticipantNotFound`] if `user`
    /// has not joined, or the media error from the provider.
    pub async fn set_remote_video_stream_type(
        &self,
        user: &UserId,
        stream_type: StreamType,
    ) -> Result<(), CoordinatorError> {
        if !self.inner.policy.can_adjust_remote_streams() {
            return Err(CoordinatorError::NotPermitted("remote_stream_type"));
        }
        let (target, others) = {
            let snapshot = self.inner.snapshot_tx.borrow();
            let target = snapshot
                .find(user)
                .and_then(|r| r.meeting_user_id.filter(|_| r.is_joined))
                .ok_or_else(|| CoordinatorError::ParticipantNotFound(user.clone()))?;
            let others: Vec<_> = snapshot
                .records
                .iter()
                .filter(|r| r.is_joined && !r.is_local_preview && &r.user_id != user)
                .filter_map(|r| r.meeting_user_id)
                .collect();
            (target, others)
        };

        let media = &self.inner.services.media;
        media.set_remote_video_stream_type(target, stream_type).await?;
        if stream_type == StreamType::High {
            for other in others {
                media
                    .set_remote_video_stream_type(other, StreamType::Low)
                    .await?;
            }
        }
        Ok(())
    }

    fn remote_flag(
        &self,
        user: &UserId,
        flag: impl Fn(&crate::roster::MeetingUserInfo) -> bool,
    ) -> Result<bool, CoordinatorError> {
        self.inner
            .snapshot_tx
            .borrow()
            .find(user)
            .map(flag)
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(user.clone()))
    }
}
