//! Session join, transport callbacks and roster membership.

use super::{log_media_error, Inner};
use crate::errors::CoordinatorError;
use crate::locked;
use crate::observability::metrics;
use crate::providers::{
    ConnectionState, LocalMediaTrack, RemoteUser, TransportEvent, UserProfile,
};
use crate::roster::{placeholder_order, MeetingUser, MuteChange, Roster};
use crate::video::{VideoProfile, View};
use common::types::{TransportId, UserId};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

impl Inner {
    /// Startup step 4. Holds the roster lock from placeholder construction
    /// until the media channel is joined.
    #[instrument(skip_all, fields(session = %self.session.acronym, user_id = %self.local_user.id))]
    pub(super) async fn join_session(self: &Arc<Self>) -> Result<(), CoordinatorError> {
        let started = Instant::now();
        let mut roster = self.roster.lock().await;

        let order = placeholder_order(
            &self.session.instructor_id,
            &self.local_user.id,
            &self.session.participants,
            self.is_observer,
        );
        let profiles = self.lookup_profiles(&order).await;
        *roster = Roster::from_placeholders(
            &order,
            &profiles,
            &self.session.instructor_id,
            &self.local_user.id,
        );
        self.publish_snapshot(&roster);
        debug!(target: "classroom.roster", records = roster.len(), "Placeholders built");

        self.services
            .store
            .set_state(&self.session, &self.local_user.id)
            .await?;
        locked(&self.state).session_stored = true;

        let devices = match self.services.media.selected_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(target: "classroom.coordinator", error = %e, "Device selection failed, using defaults");
                crate::providers::DeviceSelection::default()
            }
        };

        let transport_rx = if self.config.disable_av {
            debug!(target: "classroom.coordinator", "Audio/video disabled, not subscribing to transport");
            None
        } else {
            Some(self.services.media.transport_events())
        };

        let token = self
            .services
            .sessions
            .join_token(&self.session, &self.local_user)
            .await?;
        let joined = match self
            .services
            .media
            .join(
                self.acronym(),
                &token,
                self.local_user.user_number,
                &devices,
            )
            .await
        {
            Ok(joined) => {
                metrics::record_join("success", started.elapsed());
                joined
            }
            Err(e) => {
                metrics::record_join("error", started.elapsed());
                return Err(e.into());
            }
        };
        log_media_error("enable_dual_stream", self.services.media.enable_dual_stream().await);
        drop(roster);

        info!(
            target: "classroom.coordinator",
            transport_id = %joined.transport_id,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Joined media session"
        );
        {
            let mut state = locked(&self.state);
            state.local_track = Some(Arc::clone(&joined.local_track));
            state.local_transport_id = Some(joined.transport_id);
        }
        self.added_meeting_user(joined.transport_id, MeetingUser::Local(joined.local_track), None)
            .await;

        if let Some(rx) = transport_rx {
            let task = spawn_transport_loop(Arc::downgrade(self), rx, self.cancel.child_token());
            self.track_task(task);
        }
        Ok(())
    }

    /// Directory profiles for the placeholder order. Missing or failed
    /// lookups leave the record without a profile.
    async fn lookup_profiles(&self, order: &[UserId]) -> HashMap<UserId, UserProfile> {
        let lookups = order.iter().map(|id| async move {
            let started = Instant::now();
            let result = self.services.directory.user_by_id(id).await;
            let outcome = match &result {
                Ok(Some(_)) => "success",
                Ok(None) => "not_found",
                Err(_) => "error",
            };
            metrics::record_directory_lookup(outcome, started.elapsed());
            match result {
                Ok(profile) => profile.map(|p| (id.clone(), p)),
                Err(e) => {
                    warn!(target: "classroom.roster", user_id = %id, error = %e, "Profile lookup failed");
                    None
                }
            }
        });
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn resolve_transport_user(&self, transport_id: TransportId) -> Option<UserProfile> {
        let started = Instant::now();
        match self.services.directory.user_by_number(transport_id).await {
            Ok(Some(profile)) => {
                metrics::record_directory_lookup("success", started.elapsed());
                Some(profile)
            }
            Ok(None) => {
                metrics::record_directory_lookup("not_found", started.elapsed());
                debug!(target: "classroom.roster", transport_id = %transport_id, "Unknown transport user");
                None
            }
            Err(e) => {
                metrics::record_directory_lookup("error", started.elapsed());
                warn!(target: "classroom.roster", transport_id = %transport_id, error = %e, "Transport user lookup failed");
                None
            }
        }
    }

    /// Register a remote join before its directory lookup starts. Any older
    /// join for the same transport id is superseded.
    fn begin_join(&self, transport_id: TransportId) -> u64 {
        let ticket = self.join_tickets.fetch_add(1, Ordering::SeqCst) + 1;
        locked(&self.pending_joins).insert(transport_id, ticket);
        ticket
    }

    /// Consume the pending entry for `ticket`. Returns `false` when the user
    /// left or joined again while the lookup was running.
    fn finish_join(&self, transport_id: TransportId, ticket: u64) -> bool {
        let mut pending = locked(&self.pending_joins);
        if pending.get(&transport_id) == Some(&ticket) {
            pending.remove(&transport_id);
            true
        } else {
            false
        }
    }

    /// A user's media connected. Resolve who they are, attach the handle to
    /// their record, then apply device defaults and announce local status.
    /// Remote joins carry the ticket from [`Self::begin_join`].
    #[instrument(skip_all, fields(transport_id = %transport_id))]
    pub(super) async fn added_meeting_user(
        &self,
        transport_id: TransportId,
        handle: MeetingUser,
        ticket: Option<u64>,
    ) {
        let profile = match &handle {
            MeetingUser::Local(_) => self.local_user.clone(),
            MeetingUser::Remote(_) => match self.resolve_transport_user(transport_id).await {
                Some(profile) => profile,
                None => {
                    if let Some(ticket) = ticket {
                        self.finish_join(transport_id, ticket);
                    }
                    return;
                }
            },
        };
        if self.is_closing() {
            debug!(target: "classroom.roster", "Join ignored after destroy");
            return;
        }

        let attached = {
            let mut roster = self.roster.lock().await;
            // Checked under the roster lock so a leave cannot slip between
            // the check and the attach.
            if let Some(ticket) = ticket {
                if !self.finish_join(transport_id, ticket) {
                    debug!(target: "classroom.roster", user_id = %profile.id, "Join superseded before it resolved");
                    return;
                }
            }
            let show_controls = self.policy.show_remote_controls();
            let Some(record) = roster.find_mut(&profile.id) else {
                debug!(target: "classroom.roster", user_id = %profile.id, "Joined user has no roster record");
                return;
            };
            record.attach(transport_id, handle.clone());
            if matches!(handle, MeetingUser::Local(_)) {
                // Inactive until the server reports the session active.
                record.is_session_inactive = true;
            }
            if record.profile.is_none() {
                record.profile = Some(profile.clone());
            }
            if !record.is_local_preview {
                record.show_controls = show_controls;
            }
            let attached = (record.effective_mute(), record.is_camera_on);
            metrics::set_participants_joined(roster.joined_count());
            self.publish_snapshot(&roster);
            attached
        };
        let (muted, camera_on) = attached;
        debug!(target: "classroom.roster", user_id = %profile.id, "User joined");

        match &handle {
            MeetingUser::Local(track) => self.apply_local_defaults(track, muted, camera_on).await,
            MeetingUser::Remote(_) if muted => {
                log_media_error("apply_mute", MuteChange { handle, muted }.apply().await);
            }
            MeetingUser::Remote(_) => {}
        }
        self.send_media_status().await;
    }

    async fn apply_local_defaults(
        &self,
        track: &Arc<dyn LocalMediaTrack>,
        muted: bool,
        camera_on: bool,
    ) {
        let low_stream = VideoProfile::lookup(self.policy.low_stream_profile_name());
        log_media_error(
            "set_low_stream_parameter",
            self.services.media.set_low_stream_parameter(&low_stream).await,
        );

        let view = self.current_view();
        let default_quality = if view == View::Group {
            self.config.participant_video.low_profile()
        } else {
            self.config.participant_video.high_profile()
        };
        let quality = self.policy.override_video_quality(&view, default_quality);
        log_media_error("set_video_quality", track.set_video_quality(&quality).await);

        if let Some(mode) = self.session.optimization_mode {
            log_media_error("set_optimization_mode", track.set_optimization_mode(mode).await);
        }
        log_media_error("set_microphone_muted", track.set_microphone_muted(muted).await);
        log_media_error("set_camera_enabled", track.set_camera_enabled(camera_on).await);
    }

    /// A remote user left. The record is reset, never removed. A join still
    /// resolving for the same transport id is cancelled.
    pub(super) async fn remove_meeting_user(&self, transport_id: TransportId) {
        let mut roster = self.roster.lock().await;
        if locked(&self.pending_joins).remove(&transport_id).is_some() {
            debug!(target: "classroom.roster", transport_id = %transport_id, "Pending join cancelled by leave");
        }
        match roster.find_by_transport_mut(transport_id) {
            Some(record) => {
                record.reset_after_leave();
                debug!(target: "classroom.roster", user_id = %record.user_id, "User left");
            }
            None => {
                debug!(target: "classroom.roster", transport_id = %transport_id, "Leave for unknown transport id");
                return;
            }
        }
        metrics::set_participants_joined(roster.joined_count());
        self.publish_snapshot(&roster);
    }

    /// Swap in a fresh remote handle without resetting the record.
    async fn refresh_remote_handle(&self, user: Arc<dyn RemoteUser>) {
        let mut roster = self.roster.lock().await;
        if let Some(record) = roster.find_by_transport_mut(user.transport_id()) {
            if record.is_joined {
                record.meeting_user = Some(MeetingUser::Remote(user));
                self.publish_snapshot(&roster);
            }
        }
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        debug!(target: "classroom.coordinator", event = ?event, "Transport event");
        match event {
            // Directory lookups can be slow; joins resolve concurrently.
            TransportEvent::UserJoined(user)
            | TransportEvent::ConnectionStateChanged {
                user,
                state: ConnectionState::Connected,
            } => {
                let transport_id = user.transport_id();
                let ticket = self.begin_join(transport_id);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    inner
                        .added_meeting_user(transport_id, MeetingUser::Remote(user), Some(ticket))
                        .await;
                });
            }
            TransportEvent::UserLeft(transport_id) => self.remove_meeting_user(transport_id).await,
            TransportEvent::ConnectionStateChanged { user, state } => {
                debug!(target: "classroom.coordinator", transport_id = %user.transport_id(), ?state, "Connection state changed");
                self.refresh_remote_handle(user).await;
            }
            TransportEvent::NetworkQuality(quality) => {
                locked(&self.state).network = quality;
            }
        }
    }
}

fn spawn_transport_loop(
    coordinator: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let Some(inner) = coordinator.upgrade() else {
                break;
            };
            if inner.is_closing() {
                break;
            }
            inner.on_transport_event(event).await;
        }
        debug!(target: "classroom.coordinator", "Transport loop stopped");
    })
}
