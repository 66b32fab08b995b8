//! View switching (group / instructor / spotlight).

use super::{log_media_error, Inner};
use crate::locked;
use crate::observability::metrics;
use crate::policy::Visibility;
use crate::video::View;
use std::sync::Arc;
use tracing::{debug, instrument};

fn view_label(view: &View) -> &'static str {
    match view {
        View::Group => "group",
        View::Instructor => "instructor",
        View::Spotlight(_) => "spotlight",
    }
}

impl Inner {
    /// Handle a view-change command: switch, follow with the camera
    /// profile for the new view, then re-announce media status.
    pub(super) async fn change_view(self: &Arc<Self>, view: View) {
        let profile = self.policy.video_profile(&view);
        self.switch_view(view).await;
        if let Some(track) = self.local_track() {
            log_media_error("set_video_quality", track.set_video_quality(&profile).await);
        }
        self.send_media_status().await;
    }

    /// Update every record's spotlight / hidden flags for `view` under the
    /// roster lock, restart the speaker poller, then request a layout pass
    /// once the lock is released.
    #[instrument(skip_all, fields(view = %view))]
    pub(super) async fn switch_view(self: &Arc<Self>, view: View) {
        {
            let mut roster = self.roster.lock().await;
            for record in roster.records_mut() {
                let visibility = match &view {
                    View::Group => {
                        record.is_spotlight = false;
                        record.is_focused = false;
                        Visibility::Shown
                    }
                    View::Spotlight(target) => {
                        record.is_spotlight = record.is_the_instructor || &record.user_id == target;
                        record.is_focused = &record.user_id == target;
                        self.policy.spotlight_visibility(record, target)
                    }
                    View::Instructor => {
                        record.is_spotlight = record.is_the_instructor;
                        record.is_focused = record.is_the_instructor;
                        self.policy.instructor_view_visibility(record)
                    }
                };
                record.is_hidden = visibility == Visibility::Hidden;
            }
            locked(&self.state).view = view.clone();
            // Speaker eligibility depends on the view.
            self.restart_speaker_poller();
            self.publish_snapshot(&roster);
        }

        self.layout.request_resize();
        metrics::record_view_switch(view_label(&view));
        debug!(target: "classroom.coordinator", view = %view, "View switched");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::UserId;

    #[test]
    fn test_view_labels_are_bounded() {
        assert_eq!(view_label(&View::Group), "group");
        assert_eq!(view_label(&View::Instructor), "instructor");
        assert_eq!(view_label(&View::Spotlight(UserId::new("u1"))), "spotlight");
    }
}
