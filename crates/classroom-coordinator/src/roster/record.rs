//! Per-participant coordination state.

use crate::errors::MediaError;
use crate::providers::{LocalMediaTrack, MediaStats, RemoteUser, UserProfile};
use common::types::{TransportId, UserId};
use std::fmt;
use std::sync::Arc;

/// Media handle of a joined participant.
#[derive(Clone)]
pub enum MeetingUser {
    Local(Arc<dyn LocalMediaTrack>),
    Remote(Arc<dyn RemoteUser>),
}

impl MeetingUser {
    /// Current audio level in 0.0-1.0.
    #[must_use]
    pub fn audio_level(&self) -> f64 {
        match self {
            MeetingUser::Local(track) => track.volume_level(),
            MeetingUser::Remote(user) => user.audio_level(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> MediaStats {
        match self {
            MeetingUser::Local(track) => track.stats(),
            MeetingUser::Remote(user) => user.stats(),
        }
    }
}

impl fmt::Debug for MeetingUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingUser::Local(_) => f.write_str("Local"),
            MeetingUser::Remote(user) => write!(f, "Remote({})", user.transport_id()),
        }
    }
}

/// A pending change to a device's effective mute state.
///
/// Produced while the roster is locked and applied after it is released.
#[derive(Debug, Clone)]
pub struct MuteChange {
    pub handle: MeetingUser,
    pub muted: bool,
}

impl MuteChange {
    /// Local records mute the microphone; remote records mute playback.
    ///
    /// # Errors
    ///
    /// Returns the device error unchanged.
    pub async fn apply(&self) -> Result<(), MediaError> {
        match &self.handle {
            MeetingUser::Local(track) => track.set_microphone_muted(self.muted).await,
            MeetingUser::Remote(user) => user.set_playback_muted(self.muted).await,
        }
    }
}

/// One roster entry (`MeetingUserInfo`).
#[derive(Debug, Clone)]
pub struct MeetingUserInfo {
    pub user_id: UserId,
    /// Directory profile, when the lookup found one.
    pub profile: Option<UserProfile>,
    /// Transport id, assigned on first join and kept afterwards.
    pub meeting_user_id: Option<TransportId>,
    pub meeting_user: Option<MeetingUser>,

    pub is_the_instructor: bool,
    pub is_local_preview: bool,

    pub is_joined: bool,
    pub is_mic_on: bool,
    pub is_camera_on: bool,
    pub is_audio_cancelled: bool,
    pub is_speaking: bool,
    pub is_hidden: bool,
    pub is_session_inactive: bool,

    pub show_controls: bool,
    pub show_indicators: bool,
    pub is_spotlight: bool,
    pub is_focused: bool,
    pub help_wanted: bool,
    pub qos: bool,

    /// Last sampled audio level.
    pub audio_level: f64,
}

impl MeetingUserInfo {
    /// Placeholder for a user whose media has not connected yet.
    #[must_use]
    pub fn placeholder(user_id: UserId, profile: Option<UserProfile>) -> Self {
        Self {
            user_id,
            profile,
            meeting_user_id: None,
            meeting_user: None,
            is_the_instructor: false,
            is_local_preview: false,
            is_joined: false,
            is_mic_on: true,
            is_camera_on: true,
            is_audio_cancelled: false,
            is_speaking: false,
            is_hidden: false,
            is_session_inactive: false,
            show_controls: false,
            show_indicators: false,
            is_spotlight: false,
            is_focused: false,
            help_wanted: false,
            qos: false,
            audio_level: 0.0,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .map_or(self.user_id.as_str(), |p| p.name.as_str())
    }

    /// Mute state the device should be in.
    #[must_use]
    pub fn effective_mute(&self) -> bool {
        !self.is_mic_on || self.is_audio_cancelled
    }

    pub fn set_mic_on(&mut self, on: bool) -> Option<MuteChange> {
        self.update_mute(|r| r.is_mic_on = on)
    }

    /// Engage or release echo cancellation.
    pub fn set_audio_cancelled(&mut self, cancelled: bool) -> Option<MuteChange> {
        self.update_mute(|r| r.is_audio_cancelled = cancelled)
    }

    /// Apply `f` and report a device change only when the effective mute flips.
    fn update_mute(&mut self, f: impl FnOnce(&mut Self)) -> Option<MuteChange> {
        let before = self.effective_mute();
        f(self);
        let after = self.effective_mute();
        if before == after {
            return None;
        }
        self.meeting_user.clone().map(|handle| MuteChange {
            handle,
            muted: after,
        })
    }

    /// Attach a media handle after a join callback.
    pub fn attach(&mut self, transport_id: TransportId, handle: MeetingUser) {
        self.meeting_user_id = Some(transport_id);
        self.meeting_user = Some(handle);
        self.is_joined = true;
    }

    /// Return to the not-joined defaults. The transport id is kept so a
    /// re-join lands in the same slot.
    pub fn reset_after_leave(&mut self) {
        self.is_joined = false;
        self.meeting_user = None;
        self.show_controls = false;
        self.is_mic_on = true;
        self.is_camera_on = true;
        self.is_speaking = false;
        self.is_audio_cancelled = false;
        self.qos = false;
        self.audio_level = 0.0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::providers::mock::MockRemoteUser;

    fn joined_remote() -> (MeetingUserInfo, Arc<MockRemoteUser>) {
        let remote = Arc::new(MockRemoteUser::new(7));
        let mut record = MeetingUserInfo::placeholder(UserId::new("u7"), None);
        record.attach(TransportId(7), MeetingUser::Remote(remote.clone()));
        (record, remote)
    }

    #[test]
    fn test_placeholder_defaults() {
        let record = MeetingUserInfo::placeholder(UserId::new("u1"), None);
        assert!(record.is_mic_on && record.is_camera_on);
        assert!(!record.is_joined && !record.is_hidden && !record.is_spotlight);
        assert!(record.meeting_user_id.is_none());
        assert_eq!(record.display_name(), "u1");
    }

    #[test]
    fn test_mute_change_only_when_effective_state_flips() {
        let (mut record, _) = joined_remote();

        let change = record.set_audio_cancelled(true).expect("cancel mutes");
        assert!(change.muted);

        // Mic off while already cancelled: still muted, nothing to apply.
        assert!(record.set_mic_on(false).is_none());

        // Uncancel while mic is off: still muted.
        assert!(record.set_audio_cancelled(false).is_none());

        let change = record.set_mic_on(true).expect("mic on unmutes");
        assert!(!change.muted);
    }

    #[test]
    fn test_no_change_without_media_handle() {
        let mut record = MeetingUserInfo::placeholder(UserId::new("u1"), None);
        assert!(record.set_audio_cancelled(true).is_none());
        assert!(record.is_audio_cancelled);
    }

    #[tokio::test]
    async fn test_apply_mutes_remote_playback() {
        let (mut record, remote) = joined_remote();
        let change = record.set_audio_cancelled(true).unwrap();
        change.apply().await.unwrap();
        assert!(remote.is_playback_muted());
    }

    #[test]
    fn test_reset_after_leave_keeps_transport_id() {
        let (mut record, _) = joined_remote();
        record.is_mic_on = false;
        record.is_speaking = true;
        record.qos = true;
        record.show_controls = true;

        record.reset_after_leave();

        assert!(!record.is_joined);
        assert!(record.meeting_user.is_none());
        assert!(record.is_mic_on && record.is_camera_on);
        assert!(!record.is_speaking && !record.qos && !record.show_controls);
        assert_eq!(record.meeting_user_id, Some(TransportId(7)));
    }
}
