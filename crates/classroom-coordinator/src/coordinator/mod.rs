//! `MeetingCoordinator` - per-participant session state machine.
//!
//! Each coordinator:
//! - Owns the roster for one class session
//! - Consumes bus events on its own event-loop task, in publish order
//! - Consumes media transport callbacks on a second task
//! - Runs the active-speaker poller and the layout debouncer
//!
//! # Lifecycle
//!
//! `Initializing -> Active -> Destroyed`. [`MeetingCoordinator::start`]
//! performs the whole startup protocol:
//!
//! 1. Resolve the class session and the signed-in user
//! 2. Select the role policy (instructor or participant)
//! 3. Decide observer status through the policy
//! 4. Under the roster lock: build placeholders, persist "joined", pick
//!    devices, subscribe to transport callbacks, join the media channel
//! 5. Start speaker polling, request a layout pass, load music
//!
//! A failed startup navigates home and returns the error; nothing is left
//! subscribed.
//!
//! # Locking
//!
//! The roster sits behind one `tokio::sync::Mutex`. Structural changes are
//! made while it is held; device calls and layout requests happen after it is
//! released. UI bindings read a `watch` snapshot and never take the lock.

mod actions;
mod handlers;
mod membership;
mod speakers;
mod views;

pub use actions::EndClassChoice;

use crate::config::Config;
use crate::errors::{CoordinatorError, MediaError};
use crate::events::{EventBus, EventKind, GlobalEvent, SubscriptionId};
use crate::layout::{self, LayoutHandle};
use crate::locked;
use crate::music::{MusicMixer, MusicState};
use crate::policy::{self, Role, RolePolicy};
use crate::providers::{
    ClassSession, LocalMediaTrack, MediaStats, NetworkQuality, Services, UserProfile,
};
use crate::roster::{Roster, RosterSnapshot};
use crate::video::View;
use common::types::{SessionAcronym, TransportId, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Where a failed startup sends the user.
const HOME_PATH: &str = "/";

/// Prefix of the page that handles leaving a session.
const LEAVE_PATH_PREFIX: &str = "/session/leave/";

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Active,
    Destroyed,
}

/// State outside the roster. Guarded by a std mutex that is never held
/// across an await.
struct LocalState {
    phase: Phase,
    view: View,
    is_recording: bool,
    asked_for_help: bool,
    help_message: String,
    network: NetworkQuality,
    local_track: Option<Arc<dyn LocalMediaTrack>>,
    local_transport_id: Option<TransportId>,
    /// Whether the session store holds our "joined" state.
    session_stored: bool,
    subscription: Option<SubscriptionId>,
    poller: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct Inner {
    config: Config,
    services: Services,
    bus: EventBus,
    session: ClassSession,
    local_user: UserProfile,
    policy: Arc<dyn RolePolicy>,
    is_observer: bool,

    roster: Mutex<Roster>,
    snapshot_tx: watch::Sender<RosterSnapshot>,
    state: StdMutex<LocalState>,
    music: MusicMixer,
    layout: LayoutHandle,

    cancel: CancellationToken,
    closing: AtomicBool,
    /// Bus events queued for the event loop.
    received: Arc<AtomicU64>,
    /// Bus events the event loop has finished handling.
    processed_tx: watch::Sender<u64>,
    /// Bus sequence of the pending music toggle's command, 0 when none.
    music_toggle_seq: AtomicU64,
    /// Remote joins still resolving, keyed by transport id. The value is the
    /// ticket of the newest join; older lookups for the id are dropped.
    pending_joins: StdMutex<HashMap<TransportId, u64>>,
    join_tickets: AtomicU64,
}

/// Handle to a running coordinator. Cloning yields another handle to the
/// same coordinator.
#[derive(Clone)]
pub struct MeetingCoordinator {
    inner: Arc<Inner>,
}

impl MeetingCoordinator {
    /// Start a coordinator for the session named `session_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::SessionNotFound`] when no session matches,
    /// or the collaborator error that aborted startup. The user has been
    /// navigated home in either case.
    #[instrument(skip_all, name = "classroom.coordinator.start", fields(session = %session_name))]
    pub async fn start(
        config: Config,
        services: Services,
        bus: EventBus,
        session_name: &str,
    ) -> Result<Self, CoordinatorError> {
        let navigator = Arc::clone(&services.navigator);
        match Self::start_inner(config, services, bus, session_name).await {
            Ok(coordinator) => Ok(coordinator),
            Err(e) => {
                error!(
                    target: "classroom.coordinator",
                    session = %session_name,
                    error = %e,
                    error_code = e.error_code(),
                    "Coordinator failed to start"
                );
                navigator.navigate(HOME_PATH);
                Err(e)
            }
        }
    }

    async fn start_inner(
        config: Config,
        services: Services,
        bus: EventBus,
        session_name: &str,
    ) -> Result<Self, CoordinatorError> {
        // Step 1: session and identity.
        let session = services
            .sessions
            .session_by_name(session_name)
            .await?
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_name.to_string()))?;
        let local_user = services.sessions.current_user().await?;

        // Step 2: role policy.
        let is_instructor = local_user.id == session.instructor_id;
        let policy = policy::select(is_instructor, &config);

        // Step 3: observer status.
        let is_observer =
            policy.is_observer(&session.participants, &session.instructor_id, &local_user.id);

        info!(
            target: "classroom.coordinator",
            session = %session.acronym,
            user_id = %local_user.id,
            role = %policy.role(),
            is_observer,
            "Starting coordinator"
        );

        let cancel = CancellationToken::new();
        let (layout, layout_task) = layout::spawn(config.layout_debounce, cancel.child_token());
        let (snapshot_tx, _) = watch::channel(RosterSnapshot::default());
        let (processed_tx, _) = watch::channel(0_u64);
        let music = MusicMixer::new(Arc::clone(&services.media), config.music_volume);
        let help_message = config.help_message.clone();

        let inner = Arc::new(Inner {
            config,
            services,
            bus,
            session,
            local_user,
            policy,
            is_observer,
            roster: Mutex::new(Roster::new()),
            snapshot_tx,
            state: StdMutex::new(LocalState {
                phase: Phase::Initializing,
                view: View::Group,
                is_recording: false,
                asked_for_help: false,
                help_message,
                network: NetworkQuality::default(),
                local_track: None,
                local_transport_id: None,
                session_stored: false,
                subscription: None,
                poller: None,
                tasks: vec![layout_task],
            }),
            music,
            layout,
            cancel,
            closing: AtomicBool::new(false),
            received: Arc::new(AtomicU64::new(0)),
            processed_tx,
            music_toggle_seq: AtomicU64::new(0),
            pending_joins: StdMutex::new(HashMap::new()),
            join_tickets: AtomicU64::new(0),
        });
        let coordinator = Self { inner };
        coordinator.inner.subscribe_to_bus();

        // Step 4.
        if let Err(e) = coordinator.inner.join_session().await {
            coordinator.destroy().await;
            return Err(e);
        }

        // Step 5.
        coordinator.inner.restart_speaker_poller();
        coordinator.inner.layout.request_resize();
        if coordinator.inner.policy.loads_music() {
            coordinator.inner.load_music_library().await;
        }

        locked(&coordinator.inner.state).phase = Phase::Active;
        info!(
            target: "classroom.coordinator",
            session = %coordinator.inner.session.acronym,
            user_id = %coordinator.inner.local_user.id,
            "Coordinator active"
        );
        Ok(coordinator)
    }

    /// Tear the coordinator down. Every step is best-effort; failures are
    /// logged and the remaining steps still run. Calling it twice is a no-op.
    #[instrument(skip_all, name = "classroom.coordinator.destroy", fields(session = %self.inner.session.acronym))]
    pub async fn destroy(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.stop_speaker_poller();
        inner.music.stop().await;

        if let Err(e) = inner.services.media.leave().await {
            warn!(target: "classroom.coordinator", error = %e, "Failed to leave media session");
        }
        let local_track = locked(&inner.state).local_track.take();
        if let Some(track) = local_track {
            if let Err(e) = track.stop().await {
                warn!(target: "classroom.coordinator", error = %e, "Failed to stop local track");
            }
        }
        let session_stored = std::mem::take(&mut locked(&inner.state).session_stored);
        if session_stored {
            if let Err(e) = inner.services.store.close().await {
                warn!(target: "classroom.coordinator", error = %e, "Failed to close session state");
            }
        }

        // Transport and bus subscriptions go last so no callback fires into
        // a half-destroyed coordinator.
        inner.cancel.cancel();
        let subscription = locked(&inner.state).subscription.take();
        if let Some(id) = subscription {
            inner.bus.unsubscribe(id);
        }
        // Queued events are dropped with the event loop.
        inner
            .processed_tx
            .send_replace(inner.received.load(Ordering::SeqCst));

        inner.roster.lock().await.clear();
        inner.publish_snapshot(&Roster::new());
        locked(&inner.state).phase = Phase::Destroyed;
        info!(target: "classroom.coordinator", user_id = %inner.local_user.id, "Coordinator destroyed");
    }

    /// Wait until every bus event delivered so far has been handled,
    /// including events published by the handlers themselves.
    pub async fn settle(&self) {
        let mut rx = self.inner.processed_tx.subscribe();
        loop {
            let target = self.inner.received.load(Ordering::SeqCst);
            if rx.wait_for(|done| *done >= target).await.is_err() {
                return;
            }
            if self.inner.received.load(Ordering::SeqCst) == target {
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Read-only projections for UI bindings
    // ------------------------------------------------------------------

    #[must_use]
    pub fn roster_snapshot(&self) -> RosterSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        locked(&self.inner.state).phase
    }

    #[must_use]
    pub fn current_view(&self) -> View {
        self.inner.current_view()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        locked(&self.inner.state).is_recording
    }

    #[must_use]
    pub fn asked_for_help(&self) -> bool {
        locked(&self.inner.state).asked_for_help
    }

    #[must_use]
    pub fn help_message(&self) -> String {
        locked(&self.inner.state).help_message.clone()
    }

    #[must_use]
    pub fn network_quality(&self) -> NetworkQuality {
        locked(&self.inner.state).network
    }

    #[must_use]
    pub fn music_state(&self) -> MusicState {
        self.inner.music.state()
    }

    #[must_use]
    pub fn music(&self) -> &MusicMixer {
        &self.inner.music
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.policy.role()
    }

    #[must_use]
    pub fn is_observer(&self) -> bool {
        self.inner.is_observer
    }

    #[must_use]
    pub fn local_user(&self) -> &UserProfile {
        &self.inner.local_user
    }

    #[must_use]
    pub fn session(&self) -> &ClassSession {
        &self.inner.session
    }

    #[must_use]
    pub fn local_transport_id(&self) -> Option<TransportId> {
        locked(&self.inner.state).local_transport_id
    }

    /// Number of layout recomputes so far.
    #[must_use]
    pub fn layout_generation(&self) -> u64 {
        self.inner.layout.generation()
    }

    #[must_use]
    pub fn subscribe_layout(&self) -> watch::Receiver<u64> {
        self.inner.layout.subscribe()
    }

    /// Transport statistics for a joined participant.
    #[must_use]
    pub fn participant_stats(&self, user: &UserId) -> Option<MediaStats> {
        let snapshot = self.inner.snapshot_tx.borrow();
        snapshot
            .find(user)
            .and_then(|r| r.meeting_user.as_ref())
            .map(crate::roster::MeetingUser::stats)
    }
}

impl Inner {
    fn acronym(&self) -> &SessionAcronym {
        &self.session.acronym
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn current_view(&self) -> View {
        locked(&self.state).view.clone()
    }

    fn leave_url(&self) -> String {
        format!("{LEAVE_PATH_PREFIX}{}", self.acronym())
    }

    /// Publish a read-only copy of `roster` to UI bindings.
    fn publish_snapshot(&self, roster: &Roster) {
        let view = self.current_view();
        self.snapshot_tx.send_replace(RosterSnapshot {
            records: roster.records().to_vec(),
            view,
        });
    }

    /// Publish a Notify about the local user.
    fn publish_notify(&self, kind: EventKind, target: impl Into<Value>) {
        self.bus.publish(&GlobalEvent::notify(
            kind,
            self.local_user.id.as_str(),
            self.acronym(),
            target,
        ));
    }

    fn publish_command(&self, kind: EventKind, subject: impl Into<String>, target: impl Into<Value>) {
        self.bus
            .publish(&GlobalEvent::command(kind, subject, self.acronym(), target));
    }

    /// Forward bus events into the event loop.
    fn subscribe_to_bus(self: &Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel::<GlobalEvent>();
        let received = Arc::clone(&self.received);
        let id = self.bus.subscribe(move |event| {
            received.fetch_add(1, Ordering::SeqCst);
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("coordinator event loop has stopped"))
        });
        let task = spawn_event_loop(Arc::downgrade(self), rx, self.cancel.child_token());
        let mut state = locked(&self.state);
        state.subscription = Some(id);
        state.tasks.push(task);
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut state = locked(&self.state);
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(task);
    }

    async fn load_music_library(&self) {
        match self.services.music_library.music_files().await {
            Ok(files) => {
                self.music
                    .load_library(files, &self.config.default_song)
                    .await;
            }
            Err(e) => {
                warn!(target: "classroom.music", error = %e, "Failed to load music library");
            }
        }
    }
}

fn spawn_event_loop(
    coordinator: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<GlobalEvent>,
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
            inner.handle_global_event(&event).await;
            let done = *inner.processed_tx.borrow() + 1;
            inner.finish_music_toggle(done);
            inner.processed_tx.send_replace(done);
            inner.finish_music_toggle(done);
        }
        debug!(target: "classroom.coordinator", "Event loop stopped");
    })
}

/// Log a failed device call and carry on.
fn log_media_error(operation: &'static str, result: Result<(), MediaError>) {
    if let Err(e) = result {
        warn!(target: "classroom.coordinator", operation, error = %e, "Media operation failed");
    }
}
