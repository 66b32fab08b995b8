//! Role policies.
//!
//! A [`RolePolicy`] is chosen once per coordinator from "is the local user
//! the instructor" and answers every role-dependent question, so the
//! coordinator itself never branches on role.

mod instructor;
mod participant;

pub use instructor::InstructorPolicy;
pub use participant::ParticipantPolicy;

use crate::config::Config;
use crate::events::GlobalEvent;
use crate::roster::MeetingUserInfo;
use crate::video::{VideoProfile, View};
use common::types::{SessionAcronym, UserId};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Instructor,
    Participant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Instructor => "instructor",
            Role::Participant => "participant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a tile is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Shown,
    Hidden,
}

/// Copy for the end-of-class confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfClassDialog {
    pub title: &'static str,
    pub message: &'static str,
    pub leave_label: &'static str,
    pub cancel_label: &'static str,
    /// Only the instructor can end the class for everyone.
    pub end_label: Option<&'static str>,
}

/// Role-specific coordination answers. Implementations hold configuration
/// only and no mutable state.
pub trait RolePolicy: Send + Sync + fmt::Debug {
    fn role(&self) -> Role;

    /// Profile used for the simulcast low stream.
    fn low_stream_profile_name(&self) -> &str;

    /// Camera profile to use while looking at `view`.
    fn video_profile(&self, view: &View) -> VideoProfile;

    /// An observer is present but neither the instructor nor listed.
    fn is_observer(&self, participants: &[UserId], instructor: &UserId, user: &UserId) -> bool;

    fn enable_active_speaker_detection(&self, is_spotlighting: bool) -> bool;

    /// Adjust the camera quality chosen for `view`.
    fn override_video_quality(&self, view: &View, default_quality: VideoProfile) -> VideoProfile;

    fn end_of_class_dialog(&self) -> EndOfClassDialog;

    /// Broadcast to publish when the user confirms ending the class.
    fn end_class_broadcast(&self, leave_url: &str, session: &SessionAcronym)
        -> Option<GlobalEvent>;

    fn spotlight_visibility(&self, record: &MeetingUserInfo, target: &UserId) -> Visibility;

    fn instructor_view_visibility(&self, record: &MeetingUserInfo) -> Visibility;

    /// Entry filter applied before any event reaches the coordinator.
    fn accepts(&self, event: &GlobalEvent) -> bool;

    /// Whether remote tiles get moderation controls.
    fn show_remote_controls(&self) -> bool;

    /// Whether loud speakers beyond the active cap get echo-cancelled.
    fn cancels_excess_speakers(&self) -> bool;

    /// Whether this role may pick remote simulcast layers.
    fn can_adjust_remote_streams(&self) -> bool;

    /// Whether this role owns the background music library.
    fn loads_music(&self) -> bool;
}

/// Pick the policy for the local user.
#[must_use]
pub fn select(is_instructor: bool, config: &Config) -> Arc<dyn RolePolicy> {
    if is_instructor {
        Arc::new(InstructorPolicy::new(config))
    } else {
        Arc::new(ParticipantPolicy::new(config))
    }
}
