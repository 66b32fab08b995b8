//! Bus event handling.
//!
//! Notifies about other users update their roster records. Commands
//! addressed to the local user (directly or through `*`) act on local
//! devices and state, then announce the result with a Notify.

use super::{log_media_error, Inner};
use crate::errors::CoordinatorError;
use crate::events::{on_off, EventKind, EventTarget, GlobalEvent, MusicCommand, RecordState};
use crate::locked;
use crate::observability::metrics;
use crate::roster::{MeetingUser, MuteChange};
use crate::video::View;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

impl Inner {
    /// Entry point for every bus event.
    #[instrument(skip_all, fields(event = %event.event, subject = %event.subject))]
    pub(super) async fn handle_global_event(self: &Arc<Self>, event: &GlobalEvent) {
        if self.is_closing() {
            return;
        }
        if !event.in_session(self.acronym()) {
            trace!(target: "classroom.coordinator", session = %event.session_id, "Event for another session ignored");
            return;
        }
        if !self.policy.accepts(event) {
            trace!(target: "classroom.coordinator", "Event filtered by role policy");
            return;
        }

        let about_me = event.is_about(&self.local_user.id);
        let result = if event.is_notify() && (!about_me || is_server_activity(event.event)) {
            self.on_notify(event).await
        } else if event.is_command() && event.is_addressed_to(&self.local_user.id) {
            self.on_command(event).await
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {}
            Err(CoordinatorError::Payload(e)) => {
                metrics::record_payload_rejected(event.event.code());
                debug!(target: "classroom.coordinator", event = %event, error = %e, "Malformed event payload dropped");
            }
            Err(e) => {
                warn!(
                    target: "classroom.coordinator",
                    event = %event,
                    error = %e,
                    error_code = e.error_code(),
                    "Event handling failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Notify
    // ------------------------------------------------------------------

    async fn on_notify(&self, event: &GlobalEvent) -> Result<(), CoordinatorError> {
        let kind = event.event;
        match kind {
            EventKind::Record => {
                if let EventTarget::Record(state) = event.decode_target()? {
                    locked(&self.state).is_recording = state == RecordState::On;
                    debug!(target: "classroom.coordinator", state = state.as_str(), "Recording state changed");
                }
                Ok(())
            }
            EventKind::HelpWanted => {
                if let EventTarget::Toggle(wanted) = event.decode_target()? {
                    self.update_remote(event, |record| {
                        record.help_wanted = wanted;
                        None
                    })
                    .await;
                }
                Ok(())
            }
            EventKind::ClearHelp => {
                self.update_remote(event, |record| {
                    record.help_wanted = false;
                    None
                })
                .await;
                Ok(())
            }
            _ if kind.is_media() => self.on_remote_media(event).await,
            _ => {
                trace!(target: "classroom.coordinator", "Notify ignored");
                Ok(())
            }
        }
    }

    /// Apply a media Notify to the subject's record.
    async fn on_remote_media(&self, event: &GlobalEvent) -> Result<(), CoordinatorError> {
        // Decode before taking the lock; a bad payload changes nothing.
        let target = event.decode_target()?;
        match event.event {
            EventKind::MicOn | EventKind::UnmuteMicAll | EventKind::AudioUnmuted => {
                self.update_remote(event, |r| r.set_mic_on(true)).await;
            }
            EventKind::MicOff | EventKind::MuteMicAll | EventKind::AudioMuted => {
                self.update_remote(event, |r| r.set_mic_on(false)).await;
            }
            EventKind::CameraOn | EventKind::UnmuteVideoAll => {
                self.update_remote(event, |r| {
                    r.is_camera_on = true;
                    None
                })
                .await;
            }
            EventKind::CameraOff | EventKind::MuteVideoAll => {
                self.update_remote(event, |r| {
                    r.is_camera_on = false;
                    None
                })
                .await;
            }
            EventKind::QosAlert => {
                if let EventTarget::Toggle(alert) = target {
                    self.update_remote(event, |r| {
                        r.qos = alert;
                        None
                    })
                    .await;
                }
            }
            EventKind::SessionActive if event.is_about(&self.local_user.id) => {
                // Local devices are already the source of truth.
                self.update_remote(event, |r| {
                    r.is_session_inactive = false;
                    None
                })
                .await;
            }
            EventKind::SessionActive => {
                if let EventTarget::MediaState(media) = target {
                    self.update_remote(event, |r| {
                        r.is_session_inactive = false;
                        r.is_camera_on = media.is_enabled_video;
                        r.set_mic_on(media.is_enabled_audio)
                    })
                    .await;
                }
            }
            EventKind::SessionInactive => {
                self.update_remote(event, |r| {
                    r.is_session_inactive = true;
                    None
                })
                .await;
            }
            EventKind::SessionJoined => {
                self.update_remote(event, |r| {
                    r.is_session_inactive = false;
                    None
                })
                .await;
            }
            EventKind::SessionLeft => {
                // Normalize to on so the next join starts from a clean slate.
                self.update_remote(event, |r| {
                    r.is_camera_on = true;
                    r.is_speaking = false;
                    r.set_mic_on(true)
                })
                .await;
            }
            _ => trace!(target: "classroom.coordinator", "Media notify ignored"),
        }
        Ok(())
    }

    /// Mutate the record whose user id is the event subject. Subjects not
    /// in the roster are ignored and no snapshot is published.
    async fn update_remote<F>(&self, event: &GlobalEvent, update: F)
    where
        F: FnOnce(&mut crate::roster::MeetingUserInfo) -> Option<MuteChange>,
    {
        let change = {
            let mut roster = self.roster.lock().await;
            let Some(record) = roster
                .records_mut()
                .find(|r| r.user_id.as_str() == event.subject)
            else {
                trace!(target: "classroom.roster", subject = %event.subject, "Notify subject not in roster");
                return;
            };
            let change = update(record);
            self.publish_snapshot(&roster);
            change
        };
        if let Some(change) = change {
            log_media_error("apply_mute", change.apply().await);
        }
    }

    // ------------------------------------------------------------------
    // Command
    // ------------------------------------------------------------------

    async fn on_command(self: &Arc<Self>, event: &GlobalEvent) -> Result<(), CoordinatorError> {
        let target = event.decode_target()?;
        debug!(target: "classroom.coordinator", event = %event, "Command received");

        match (event.event, target) {
            (EventKind::MicOn, _) => self.set_local_mic(true).await,
            (EventKind::MicOff, _) => self.set_local_mic(false).await,
            (EventKind::CameraOn | EventKind::UnmuteVideoAll, _) => {
                self.set_local_camera(true).await;
            }
            (EventKind::CameraOff | EventKind::MuteVideoAll, _) => {
                self.set_local_camera(false).await;
            }
            (EventKind::MuteMicAll, _) => self.force_local_mic(false).await,
            (EventKind::UnmuteMicAll, _) => self.force_local_mic(true).await,
            (EventKind::Navigate | EventKind::NavigateAll, EventTarget::Path(path)) => {
                debug!(target: "classroom.coordinator", path = %path, "Navigating");
                self.services.navigator.navigate(&path);
            }
            (EventKind::ChangeView | EventKind::ChangeViewAll, EventTarget::View(view)) => {
                self.change_view(view).await;
            }
            (EventKind::LeaveInstructor, _) => self.change_view(View::Group).await,
            (EventKind::MediaStatus | EventKind::MediaStatusAll, _) => {
                self.send_media_status().await;
            }
            (EventKind::Music, EventTarget::Music(command)) => self.on_music(command).await,
            (EventKind::MusicVolume, EventTarget::Volume(volume)) => {
                self.music.set_volume(volume).await;
            }
            (EventKind::HelpWanted, EventTarget::Toggle(wanted)) => self.set_asked_for_help(wanted).await,
            (EventKind::ClearHelp, _) => self.set_asked_for_help(false).await,
            (EventKind::SetHelpMessage, EventTarget::Text(message)) => {
                locked(&self.state).help_message = message;
            }
            (EventKind::StartOver, _) => self.services.navigator.reload(),
            (EventKind::VideoOptimizationMode, EventTarget::Optimization(mode)) => {
                if let Some(track) = self.local_track() {
                    log_media_error("set_optimization_mode", track.set_optimization_mode(mode).await);
                }
            }
            (kind, _) => {
                trace!(target: "classroom.coordinator", kind = %kind, "Command not handled locally");
            }
        }
        Ok(())
    }

    async fn on_music(&self, command: MusicCommand) {
        let result = match command {
            MusicCommand::Play => self.music.play().await,
            MusicCommand::Pause => self.music.pause().await,
            MusicCommand::Stop => {
                self.music.stop().await;
                Ok(())
            }
            MusicCommand::VolumeUp => {
                self.music.volume_up().await;
                Ok(())
            }
            MusicCommand::VolumeDown => {
                self.music.volume_down().await;
                Ok(())
            }
            MusicCommand::Loading | MusicCommand::Ready => Ok(()),
        };
        log_media_error("music", result);
    }

    pub(super) fn local_track(&self) -> Option<Arc<dyn crate::providers::LocalMediaTrack>> {
        locked(&self.state).local_track.clone()
    }

    /// Set the local microphone to `on` and announce it.
    pub(super) async fn set_local_mic(&self, on: bool) {
        let change = {
            let mut roster = self.roster.lock().await;
            let change = roster.local_mut().and_then(|r| r.set_mic_on(on));
            self.publish_snapshot(&roster);
            change
        };
        if let Some(change) = change {
            log_media_error("set_microphone_muted", change.apply().await);
        }
        self.publish_notify(if on { EventKind::MicOn } else { EventKind::MicOff }, "");
    }

    /// Set the local camera to `on` and announce it.
    pub(super) async fn set_local_camera(&self, on: bool) {
        let handle = {
            let mut roster = self.roster.lock().await;
            let handle = roster.local_mut().and_then(|r| {
                r.is_camera_on = on;
                r.meeting_user.clone()
            });
            self.publish_snapshot(&roster);
            handle
        };
        if let Some(MeetingUser::Local(track)) = handle {
            log_media_error("set_camera_enabled", track.set_camera_enabled(on).await);
        }
        self.publish_notify(
            if on {
                EventKind::CameraOn
            } else {
                EventKind::CameraOff
            },
            "",
        );
    }

    /// Mute-all / unmute-all: also drive the microphone volume.
    async fn force_local_mic(&self, on: bool) {
        if let Some(track) = self.local_track() {
            let volume = if on { self.config.default_volume } else { 0 };
            log_media_error("set_volume", track.set_volume(volume).await);
        }
        self.publish_notify(
            if on {
                EventKind::UnmuteMicAll
            } else {
                EventKind::MuteMicAll
            },
            "",
        );
        self.set_local_mic(on).await;
    }

    async fn set_asked_for_help(&self, wanted: bool) {
        locked(&self.state).asked_for_help = wanted;
        {
            let mut roster = self.roster.lock().await;
            if let Some(local) = roster.local_mut() {
                local.help_wanted = wanted;
            }
            self.publish_snapshot(&roster);
        }
        self.publish_notify(EventKind::HelpWanted, on_off(wanted));
    }

    /// Announce the local mic, camera and help state.
    pub(super) async fn send_media_status(&self) {
        let (mic_on, camera_on) = {
            let roster = self.roster.lock().await;
            roster
                .local()
                .map_or((true, true), |r| (r.is_mic_on, r.is_camera_on))
        };
        let asked_for_help = locked(&self.state).asked_for_help;

        self.publish_notify(if mic_on { EventKind::MicOn } else { EventKind::MicOff }, "");
        self.publish_notify(
            if camera_on {
                EventKind::CameraOn
            } else {
                EventKind::CameraOff
            },
            "",
        );
        self.publish_notify(EventKind::HelpWanted, on_off(asked_for_help));
    }
}

/// Activity reports the server sends about every user, the local one
/// included.
fn is_server_activity(kind: EventKind) -> bool {
    matches!(kind, EventKind::SessionActive | EventKind::SessionInactive)
}
