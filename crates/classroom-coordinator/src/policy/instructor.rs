use super::{EndOfClassDialog, Role, RolePolicy, Visibility};
use crate::config::{Config, VideoProfileNames};
use crate::events::{EventKind, GlobalEvent, ANY_SUBJECT};
use crate::roster::MeetingUserInfo;
use crate::video::{VideoProfile, View};
use common::types::{SessionAcronym, UserId};

/// The instructor sees everyone, always tracks speakers and can end the
/// class for the whole room.
#[derive(Debug, Clone)]
pub struct InstructorPolicy {
    profiles: VideoProfileNames,
}

impl InstructorPolicy {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            profiles: config.instructor_video.clone(),
        }
    }
}

impl RolePolicy for InstructorPolicy {
    fn role(&self) -> Role {
        Role::Instructor
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

    fn is_observer(&self, _participants: &[UserId], _instructor: &UserId, _user: &UserId) -> bool {
        false
    }

    fn enable_active_speaker_detection(&self, _is_spotlighting: bool) -> bool {
        true
    }

    // Group view sends many small tiles; drop to the bandwidth-saving profile.
    fn override_video_quality(&self, view: &View, _default_quality: VideoProfile) -> VideoProfile {
        self.video_profile(view)
    }

    fn end_of_class_dialog(&self) -> EndOfClassDialog {
        EndOfClassDialog {
            title: "Please Confirm",
            message: "Do you want to leave, end class?",
            leave_label: "Leave",
            cancel_label: "Cancel",
            end_label: Some("End"),
        }
    }

    fn end_class_broadcast(
        &self,
        leave_url: &str,
        session: &SessionAcronym,
    ) -> Option<GlobalEvent> {
        Some(GlobalEvent::command(
            EventKind::NavigateAll,
            ANY_SUBJECT,
            session,
            leave_url,
        ))
    }

    fn spotlight_visibility(&self, _record: &MeetingUserInfo, _target: &UserId) -> Visibility {
        Visibility::Shown
    }

    fn instructor_view_visibility(&self, _record: &MeetingUserInfo) -> Visibility {
        Visibility::Shown
    }

    fn accepts(&self, event: &GlobalEvent) -> bool {
        !event.event.is_for_all_participants()
    }

    fn show_remote_controls(&self) -> bool {
        true
    }

    fn cancels_excess_speakers(&self) -> bool {
        false
    }

    fn can_adjust_remote_streams(&self) -> bool {
        true
    }

    fn loads_music(&self) -> bool {
        true
    }
}
