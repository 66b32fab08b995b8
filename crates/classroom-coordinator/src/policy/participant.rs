use super::{EndOfClassDialog, Role, RolePolicy, Visibility};
use crate::config::{Config, SpeakerAudience, VideoProfileNames};
use crate::events::GlobalEvent;
use crate::roster::MeetingUserInfo;
use crate::video::{VideoProfile, View};
use common::types::{SessionAcronym, UserId};

/// Participants follow the instructor's view and can only leave.
#[derive(Debug, Clone)]
pub struct ParticipantPolicy {
    profiles: VideoProfileNames,
    speakers_enabled: bool,
}

impl ParticipantPolicy {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            profiles: config.participant_video.clone(),
            speakers_enabled: config.active_speaker.enabled_for == SpeakerAudience::All,
        }
    }
}

fn shown_if(shown: bool) -> Visibility {
    if shown {
        Visibility::Shown
    } else {
        Visibility::Hidden
    }
}

impl RolePolicy for ParticipantPolicy {
    fn role(&self) -> Role {
        Role::Participant
    }

    fn low_stream_profile_name(&self) -> &str {
        &self.profiles.low
    }

    fn video_profile(&self, view: &View) -> VideoProfile {
        match view {
            View::Group => self.profiles.low_profile(),
            View::Instructor | View::Spotlight(_) => self.profiles.high_profile(),
        }
    }

    fn is_observer(&self, participants: &[UserId], instructor: &UserId, user: &UserId) -> bool {
        user != instructor && !participants.contains(user)
    }

    fn enable_active_speaker_detection(&self, is_spotlighting: bool) -> bool {
        self.speakers_enabled && !is_spotlighting
    }

    fn override_video_quality(&self, _view: &View, default_quality: VideoProfile) -> VideoProfile {
        default_quality
    }

    fn end_of_class_dialog(&self) -> EndOfClassDialog {
        EndOfClassDialog {
            title: "Please Confirm",
            message: "Do you want to leave class?",
            leave_label: "Leave",
            cancel_label: "Cancel",
            end_label: None,
        }
    }

    fn end_class_broadcast(
        &self,
        _leave_url: &str,
        _session: &SessionAcronym,
    ) -> Option<GlobalEvent> {
        None
    }

    fn spotlight_visibility(&self, record: &MeetingUserInfo, target: &UserId) -> Visibility {
        shown_if(record.is_the_instructor || &record.user_id == target)
    }

    fn instructor_view_visibility(&self, record: &MeetingUserInfo) -> Visibility {
        shown_if(record.is_the_instructor)
    }

    fn accepts(&self, _event: &GlobalEvent) -> bool {
        true
    }

    fn show_remote_controls(&self) -> bool {
        false
    }

    fn cancels_excess_speakers(&self) -> bool {
        true
    }

    fn can_adjust_remote_streams(&self) -> bool {
        false
    }

    fn loads_music(&self) -> bool {
        false
    }
}
