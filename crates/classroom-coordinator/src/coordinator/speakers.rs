//! Active-speaker polling for the roster.

use super::{log_media_error, Inner};
use crate::locked;
use crate::observability::metrics;
use crate::roster::MeetingUser;
use crate::speaker::{self, SpeakerSample};
use std::sync::Arc;
use tracing::trace;

impl Inner {
    /// Replace the running poller with a fresh one. Called at startup and on
    /// every view switch.
    pub(super) fn restart_speaker_poller(self: &Arc<Self>) {
        let token = self.cancel.child_token();
        let previous = locked(&self.state).poller.replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        if self.is_closing() {
            token.cancel();
            return;
        }

        let coordinator = Arc::downgrade(self);
        let task = speaker::spawn_poller(
            self.config.active_speaker.sample_interval,
            token,
            move || {
                let coordinator = coordinator.clone();
                async move {
                    if let Some(inner) = coordinator.upgrade() {
                        inner.speaker_tick().await;
                    }
                }
            },
        );
        self.track_task(task);
    }

    pub(super) fn stop_speaker_poller(&self) {
        if let Some(token) = locked(&self.state).poller.take() {
            token.cancel();
        }
    }

    /// One poll: sample levels, rank, then apply echo-cancellation changes
    /// after the roster lock is released.
    pub(super) async fn speaker_tick(&self) {
        if self.is_closing() {
            return;
        }
        let settings = &self.config.active_speaker;
        let enabled = self
            .policy
            .enable_active_speaker_detection(self.current_view().is_spotlighting());

        let changes = {
            let mut roster = self.roster.lock().await;
            let mut changes = Vec::new();

            if enabled {
                let mut samples = Vec::new();
                for record in roster.records_mut() {
                    let level = record
                        .meeting_user
                        .as_ref()
                        .map_or(0.0, MeetingUser::audio_level);
                    record.audio_level = level;
                    if record.is_local_preview {
                        record.is_speaking = record.is_joined && level > settings.volume_threshold;
                    } else if record.is_joined {
                        samples.push(SpeakerSample {
                            key: record.user_id.clone(),
                            is_instructor: record.is_the_instructor,
                            level,
                        });
                    }
                }

                let decisions = speaker::rank_speakers(
                    samples,
                    settings.max_active,
                    settings.volume_threshold,
                    self.policy.cancels_excess_speakers(),
                );
                let mut speaking = 0;
                for decision in decisions {
                    if let Some(record) = roster.find_mut(&decision.key) {
                        record.is_speaking = decision.speaking;
                        if decision.speaking {
                            speaking += 1;
                        }
                        changes.extend(record.set_audio_cancelled(decision.cancelled));
                    }
                }
                metrics::set_active_speakers(speaking);
            } else {
                for record in roster.records_mut() {
                    record.is_speaking = false;
                    changes.extend(record.set_audio_cancelled(false));
                }
            }

            self.publish_snapshot(&roster);
            changes
        };

        trace!(target: "classroom.speaker", enabled, changes = changes.len(), "Speaker tick");
        for change in changes {
            log_media_error("echo_cancel", change.apply().await);
        }
    }
}
