//! Integration tests for the meeting coordinator.
//!
//! Every test runs one or more coordinators in-process over a shared event
//! bus with the in-memory collaborators from `providers::mock`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use classroom_coordinator::config::Config;
use classroom_coordinator::coordinator::{EndClassChoice, MeetingCoordinator, Phase};
use classroom_coordinator::errors::CoordinatorError;
use classroom_coordinator::events::{EventBus, EventKind, GlobalEvent, ANY_SUBJECT, SERVER};
use classroom_coordinator::music::MusicState;
use classroom_coordinator::policy::Role;
use classroom_coordinator::providers::mock::{
    MockDirectory, MockMediaProvider, MockMusicLibrary, MockNavigator, MockRemoteUser,
    MockSessionApi, MockSessionStore, RecordingTelemetry,
};
use classroom_coordinator::providers::{
    ClassSession, ConnectionState, LocalSessionStore, MusicFile, Services, SessionKind,
    SessionStore, TransportEvent, UserProfile,
};
use classroom_coordinator::roster::RosterSnapshot;
use classroom_coordinator::video::{OptimizationMode, StreamType, View};
use common::types::{SessionAcronym, TransportId, UserId};

const SESSION_NAME: &str = "Chair Yoga";
const ACRONYM: &str = "YOGA1";

// ============================================================================
// Harness
// ============================================================================

fn profiles() -> Vec<UserProfile> {
    vec![
        UserProfile::new("teacher", 1, "Tess"),
        UserProfile::new("alice", 2, "Alice"),
        UserProfile::new("bob", 3, "Bob"),
        UserProfile::new("carl", 4, "Carl"),
        UserProfile::new("olivia", 9, "Olivia"),
    ]
}

fn profile(id: &str) -> UserProfile {
    profiles().into_iter().find(|p| p.id.as_str() == id).unwrap()
}

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

fn acronym() -> SessionAcronym {
    SessionAcronym::new(ACRONYM)
}

fn session() -> ClassSession {
    ClassSession {
        acronym: acronym(),
        name: SESSION_NAME.to_string(),
        class_id: Some("class-42".to_string()),
        kind: SessionKind::Class,
        instructor_id: uid("teacher"),
        participants: vec![uid("alice"), uid("bob"), uid("carl")],
        optimization_mode: None,
    }
}

/// Slow speaker polling keeps snapshots quiet unless a test asks otherwise.
fn quiet_config() -> Config {
    let mut config = Config::default();
    config.active_speaker.sample_interval = Duration::from_secs(3600);
    config.layout_debounce = Duration::from_millis(10);
    config
}

struct Seat {
    coordinator: MeetingCoordinator,
    media: Arc<MockMediaProvider>,
    navigator: Arc<MockNavigator>,
    telemetry: Arc<RecordingTelemetry>,
}

struct Classroom {
    bus: EventBus,
    directory: Arc<MockDirectory>,
    config: Config,
}

impl Classroom {
    fn new() -> Self {
        Self::with_config(quiet_config())
    }

    fn with_config(config: Config) -> Self {
        Self {
            bus: EventBus::new(),
            directory: Arc::new(MockDirectory::with_profiles(profiles())),
            config,
        }
    }

    async fn try_seat(
        &self,
        user: &str,
        media: MockMediaProvider,
        session_name: &str,
    ) -> (
        Result<MeetingCoordinator, CoordinatorError>,
        Arc<MockMediaProvider>,
        Arc<MockNavigator>,
        Arc<RecordingTelemetry>,
    ) {
        let store = Arc::new(LocalSessionStore::new(self.bus.clone()));
        self.try_seat_with_store(user, media, session_name, store)
            .await
    }

    async fn try_seat_with_store(
        &self,
        user: &str,
        media: MockMediaProvider,
        session_name: &str,
        store: Arc<dyn SessionStore>,
    ) -> (
        Result<MeetingCoordinator, CoordinatorError>,
        Arc<MockMediaProvider>,
        Arc<MockNavigator>,
        Arc<RecordingTelemetry>,
    ) {
        let media = Arc::new(media);
        let navigator = Arc::new(MockNavigator::new());
        let telemetry = Arc::new(RecordingTelemetry::new());
        let services = Services {
            media: media.clone(),
            directory: self.directory.clone(),
            sessions: Arc::new(MockSessionApi::new(profile(user), vec![session()])),
            store,
            navigator: navigator.clone(),
            music_library: Arc::new(MockMusicLibrary::new(&["Take Five", "In the Mood"])),
            telemetry: telemetry.clone(),
        };
        let result =
            MeetingCoordinator::start(self.config.clone(), services, self.bus.clone(), session_name)
                .await;
        (result, media, navigator, telemetry)
    }

    async fn seat(&self, user: &str) -> Seat {
        let (result, media, navigator, telemetry) = self
            .try_seat(user, MockMediaProvider::new(), SESSION_NAME)
            .await;
        Seat {
            coordinator: result.expect("coordinator should start"),
            media,
            navigator,
            telemetry,
        }
    }
}

impl Seat {
    /// Connect remote users to this seat's media channel.
    fn connect(&self, users: &[&str]) -> Vec<Arc<MockRemoteUser>> {
        users
            .iter()
            .map(|id| {
                let number = profile(id).user_number.unwrap();
                let remote = Arc::new(MockRemoteUser::new(number.0));
                assert!(self.media.emit(TransportEvent::UserJoined(remote.clone())));
                remote
            })
            .collect()
    }

    fn record(&self, user: &str) -> classroom_coordinator::roster::MeetingUserInfo {
        self.coordinator
            .roster_snapshot()
            .find(&uid(user))
            .cloned()
            .unwrap()
    }
}

/// Drain every coordinator's event queue, repeating so events published by
/// one handler reach the others.
async fn settle_all(seats: &[&Seat]) {
    for _ in 0..3 {
        for seat in seats {
            seat.coordinator.settle().await;
        }
    }
}

async fn wait_roster<F>(seat: &Seat, mut condition: F) -> RosterSnapshot
where
    F: FnMut(&RosterSnapshot) -> bool,
{
    let mut rx = seat.coordinator.subscribe_roster();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| condition(s)))
        .await
        .expect("timed out waiting for roster")
        .expect("roster channel closed");
    snapshot.clone()
}

fn joined(snapshot: &RosterSnapshot, users: &[&str]) -> bool {
    users
        .iter()
        .all(|u| snapshot.find(&uid(u)).is_some_and(|r| r.is_joined))
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_participant_roster_order_and_local_join() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;

    assert_eq!(alice.coordinator.phase(), Phase::Active);
    assert_eq!(alice.coordinator.role(), Role::Participant);
    assert!(!alice.coordinator.is_observer());

    let snapshot = wait_roster(&alice, |s| joined(s, &["alice"])).await;
    assert_eq!(
        snapshot.user_ids(),
        vec![uid("teacher"), uid("alice"), uid("bob"), uid("carl")]
    );

    let first = snapshot.records.first().unwrap();
    assert!(first.is_the_instructor);
    let local = snapshot.find(&uid("alice")).unwrap();
    assert!(local.is_local_preview);
    assert_eq!(local.meeting_user_id, Some(TransportId(2)));
    assert_eq!(local.display_name(), "Alice");

    assert_eq!(alice.media.join_count(), 1);
    assert_eq!(alice.media.joined_channel(), Some(acronym()));
    assert!(alice.media.dual_stream_enabled());
    assert!(alice.media.has_transport_subscriber());
    assert_eq!(alice.coordinator.local_transport_id(), Some(TransportId(2)));
    assert!(!alice.media.local_track().is_mic_muted());
    assert!(alice.media.local_track().is_camera_enabled());
    assert_eq!(room.bus.listener_count(), 1);
}

#[tokio::test]
async fn test_instructor_roster_has_no_duplicates() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;

    assert_eq!(teacher.coordinator.role(), Role::Instructor);
    let snapshot = teacher.coordinator.roster_snapshot();
    assert_eq!(
        snapshot.user_ids(),
        vec![uid("teacher"), uid("alice"), uid("bob"), uid("carl")]
    );
    let locals: Vec<_> = snapshot.records.iter().filter(|r| r.is_local_preview).collect();
    assert_eq!(locals.len(), 1);
    assert!(locals.first().unwrap().is_the_instructor);
}

#[tokio::test]
async fn test_observer_is_appended_last() {
    let room = Classroom::new();
    let olivia = room.seat("olivia").await;

    assert!(olivia.coordinator.is_observer());
    let snapshot = olivia.coordinator.roster_snapshot();
    assert_eq!(
        snapshot.user_ids(),
        vec![uid("teacher"), uid("alice"), uid("bob"), uid("carl"), uid("olivia")]
    );
    assert!(snapshot.records.last().unwrap().is_local_preview);
}

#[tokio::test]
async fn test_unknown_session_navigates_home() {
    let room = Classroom::new();
    let (result, media, navigator, _) = room
        .try_seat("alice", MockMediaProvider::new(), "No Such Class")
        .await;

    assert!(matches!(result, Err(CoordinatorError::SessionNotFound(_))));
    assert_eq!(navigator.paths(), vec!["/".to_string()]);
    assert_eq!(media.join_count(), 0);
    assert_eq!(room.bus.listener_count(), 0);
}

#[tokio::test]
async fn test_failed_media_join_tears_down() {
    let room = Classroom::new();
    let (result, media, navigator, _) = room
        .try_seat("alice", MockMediaProvider::failing_join(), SESSION_NAME)
        .await;

    let err = result.err().expect("join failure should abort startup");
    assert!(matches!(err, CoordinatorError::Media(_)));
    assert_eq!(navigator.paths(), vec!["/".to_string()]);
    assert_eq!(media.join_count(), 1);
    assert_eq!(media.leave_count(), 1);
    assert_eq!(room.bus.listener_count(), 0);
}

#[tokio::test]
async fn test_failed_session_store_never_announces_leave() {
    let room = Classroom::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    room.bus.subscribe(move |event| {
        sink.lock().unwrap().push(event.event);
        Ok(())
    });
    let store = Arc::new(MockSessionStore::failing());

    let (result, media, navigator, _) = room
        .try_seat_with_store("alice", MockMediaProvider::new(), SESSION_NAME, store.clone())
        .await;

    assert!(matches!(result, Err(CoordinatorError::Service(_))));
    assert_eq!(navigator.paths(), vec!["/".to_string()]);
    assert_eq!(store.set_count(), 1);
    assert_eq!(store.close_count(), 0);
    assert_eq!(media.join_count(), 0);
    assert!(!seen.lock().unwrap().contains(&EventKind::SessionLeft));
}

#[tokio::test]
async fn test_destroy_closes_stored_session_once() {
    let room = Classroom::new();
    let store = Arc::new(MockSessionStore::new());
    let (result, _, _, _) = room
        .try_seat_with_store("alice", MockMediaProvider::new(), SESSION_NAME, store.clone())
        .await;
    let alice = result.unwrap();
    assert_eq!(store.session_acronym(), Some(acronym()));

    alice.destroy().await;
    alice.destroy().await;

    assert_eq!(store.close_count(), 1);
    assert_eq!(store.session_acronym(), None);
}

// ============================================================================
// Transport membership
// ============================================================================

#[tokio::test]
async fn test_remote_join_and_leave_keep_record() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    teacher.connect(&["bob"]);

    let snapshot = wait_roster(&teacher, |s| joined(s, &["bob"])).await;
    let bob = snapshot.find(&uid("bob")).unwrap();
    assert_eq!(bob.meeting_user_id, Some(TransportId(3)));
    assert!(bob.show_controls);

    assert!(teacher.media.emit(TransportEvent::UserLeft(TransportId(3))));
    let snapshot = wait_roster(&teacher, |s| !joined(s, &["bob"])).await;
    assert_eq!(snapshot.records.len(), 4);
    let bob = snapshot.find(&uid("bob")).unwrap();
    assert!(bob.meeting_user.is_none());
    assert!(bob.is_mic_on);
    assert!(bob.is_camera_on);
}

#[tokio::test]
async fn test_unknown_transport_user_is_ignored() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    assert!(teacher
        .media
        .emit(TransportEvent::UserJoined(Arc::new(MockRemoteUser::new(77)))));
    teacher.connect(&["alice"]);

    let snapshot = wait_roster(&teacher, |s| joined(s, &["alice"])).await;
    assert_eq!(snapshot.records.len(), 4);
    assert!(snapshot
        .records
        .iter()
        .all(|r| r.meeting_user_id != Some(TransportId(77))));
}

#[tokio::test]
async fn test_leave_during_slow_join_keeps_user_out() {
    let room = Classroom::new();
    room.directory
        .delay_lookup(TransportId(3), Duration::from_millis(100));
    let teacher = room.seat("teacher").await;

    teacher.connect(&["bob"]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(teacher.media.emit(TransportEvent::UserLeft(TransportId(3))));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let bob = teacher.record("bob");
    assert!(!bob.is_joined);
    assert!(bob.meeting_user.is_none());

    // A later join still lands.
    teacher.connect(&["bob"]);
    wait_roster(&teacher, |s| joined(s, &["bob"])).await;
}

#[tokio::test]
async fn test_rejoin_during_slow_join_uses_newest_handle() {
    let room = Classroom::new();
    room.directory
        .delay_lookup(TransportId(3), Duration::from_millis(100));
    let teacher = room.seat("teacher").await;

    let first = teacher.connect(&["bob"]).pop().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = teacher.connect(&["bob"]).pop().unwrap();
    wait_roster(&teacher, |s| joined(s, &["bob"])).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Muting bob reaches whichever handle the record holds.
    room.bus
        .publish(&GlobalEvent::notify(EventKind::MicOff, "bob", &acronym(), ""));
    teacher.coordinator.settle().await;
    assert!(second.is_playback_muted());
    assert!(!first.is_playback_muted());
}

#[tokio::test]
async fn test_connected_state_counts_as_join() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;

    assert!(teacher.media.emit(TransportEvent::ConnectionStateChanged {
        user: Arc::new(MockRemoteUser::new(3)),
        state: ConnectionState::Connected,
    }));

    let snapshot = wait_roster(&teacher, |s| joined(s, &["bob"])).await;
    assert_eq!(
        snapshot.find(&uid("bob")).unwrap().meeting_user_id,
        Some(TransportId(3))
    );
}

#[tokio::test]
async fn test_reconnect_swaps_handle_without_reset() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let original = teacher.connect(&["bob"]).pop().unwrap();
    wait_roster(&teacher, |s| joined(s, &["bob"])).await;

    room.bus
        .publish(&GlobalEvent::notify(EventKind::CameraOff, "bob", &acronym(), ""));
    teacher.coordinator.settle().await;

    let fresh = Arc::new(MockRemoteUser::new(3));
    assert!(teacher.media.emit(TransportEvent::ConnectionStateChanged {
        user: fresh.clone(),
        state: ConnectionState::Reconnecting,
    }));
    // A second transport event orders us behind the first.
    assert!(teacher
        .media
        .emit(TransportEvent::NetworkQuality(classroom_coordinator::providers::NetworkQuality {
            uplink: 1,
            downlink: 1,
        })));
    tokio::time::timeout(Duration::from_secs(5), async {
        while teacher.coordinator.network_quality().uplink != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let bob = teacher.record("bob");
    assert!(bob.is_joined);
    assert!(!bob.is_camera_on);
    assert_eq!(bob.meeting_user_id, Some(TransportId(3)));

    room.bus
        .publish(&GlobalEvent::notify(EventKind::MicOff, "bob", &acronym(), ""));
    teacher.coordinator.settle().await;
    assert!(fresh.is_playback_muted());
    assert!(!original.is_playback_muted());
}

#[tokio::test]
async fn test_slow_join_and_view_switch_stay_consistent() {
    let room = Classroom::new();
    room.directory
        .delay_lookup(TransportId(3), Duration::from_millis(100));
    let teacher = room.seat("teacher").await;

    teacher.connect(&["alice", "bob", "carl"]);
    teacher
        .coordinator
        .do_spotlight_event(&uid("alice"))
        .await
        .unwrap();

    let snapshot = wait_roster(&teacher, |s| {
        joined(s, &["alice", "bob", "carl"]) && s.view == View::Spotlight(uid("alice"))
    })
    .await;

    for record in &snapshot.records {
        let spotlit = record.user_id == uid("teacher") || record.user_id == uid("alice");
        assert_eq!(record.is_spotlight, spotlit, "{}", record.user_id);
        assert_eq!(record.is_focused, record.user_id == uid("alice"));
        assert!(record.is_joined);
        assert!(!record.is_hidden);
    }
}

#[tokio::test]
async fn test_network_quality_is_tracked() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    let quality = classroom_coordinator::providers::NetworkQuality {
        uplink: 2,
        downlink: 5,
    };
    assert!(alice.media.emit(TransportEvent::NetworkQuality(quality)));

    tokio::time::timeout(Duration::from_secs(5), async {
        while alice.coordinator.network_quality() != quality {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

// ============================================================================
// Event handling
// ============================================================================

#[tokio::test]
async fn test_notify_for_unknown_subject_changes_nothing() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    teacher.coordinator.settle().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let before = teacher.coordinator.roster_snapshot();
    let mut rx = teacher.coordinator.subscribe_roster();
    room.bus.publish(&GlobalEvent::notify(
        EventKind::MicOff,
        "stranger",
        &acronym(),
        "",
    ));
    teacher.coordinator.settle().await;

    assert!(!rx.has_changed().unwrap());
    let after = teacher.coordinator.roster_snapshot();
    assert_eq!(before.user_ids(), after.user_ids());
    assert!(after.records.iter().all(|r| r.is_mic_on));
}

#[tokio::test]
async fn test_events_from_other_sessions_are_ignored() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;

    room.bus.publish(&GlobalEvent::notify(
        EventKind::MicOff,
        "bob",
        &SessionAcronym::new("OTHER"),
        "",
    ));
    teacher.coordinator.settle().await;
    assert!(teacher.record("bob").is_mic_on);

    room.bus
        .publish(&GlobalEvent::notify(EventKind::MicOff, "bob", &acronym(), ""));
    teacher.coordinator.settle().await;
    assert!(!teacher.record("bob").is_mic_on);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;

    room.bus.publish(&GlobalEvent::command(
        EventKind::ChangeView,
        "alice",
        &acronym(),
        serde_json::json!(42),
    ));
    room.bus.publish(&GlobalEvent::command(
        EventKind::ChangeView,
        "alice",
        &acronym(),
        "sideways",
    ));
    alice.coordinator.settle().await;
    assert_eq!(alice.coordinator.current_view(), View::Group);

    // The event loop survives and keeps processing.
    room.bus.publish(&GlobalEvent::command(
        EventKind::ChangeView,
        "alice",
        &acronym(),
        "instructor",
    ));
    alice.coordinator.settle().await;
    assert_eq!(alice.coordinator.current_view(), View::Instructor);
}

#[tokio::test]
async fn test_recording_notify_updates_every_coordinator() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;

    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = requests.clone();
    room.bus.subscribe(move |event| {
        if event.is_command() && event.subject == SERVER {
            sink.lock().unwrap().push(event.clone());
        }
        Ok(())
    });

    teacher.coordinator.toggle_recording().unwrap();
    let request = requests.lock().unwrap().first().cloned().unwrap();
    assert_eq!(request.event, EventKind::Record);
    assert_eq!(request.target, serde_json::json!("on"));

    room.bus
        .publish(&GlobalEvent::notify(EventKind::Record, SERVER, &acronym(), "on"));
    settle_all(&[&teacher, &alice]).await;
    assert!(teacher.coordinator.is_recording());
    assert!(alice.coordinator.is_recording());

    assert!(matches!(
        alice.coordinator.toggle_recording(),
        Err(CoordinatorError::NotPermitted(_))
    ));
}

#[tokio::test]
async fn test_activity_notifies_update_remote_record() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let notify = |kind: EventKind, target: serde_json::Value| {
        room.bus
            .publish(&GlobalEvent::notify(kind, "bob", &acronym(), target));
    };

    notify(EventKind::QosAlert, serde_json::json!("on"));
    notify(EventKind::SessionInactive, serde_json::json!(""));
    teacher.coordinator.settle().await;
    let bob = teacher.record("bob");
    assert!(bob.qos);
    assert!(bob.is_session_inactive);

    notify(
        EventKind::SessionActive,
        serde_json::json!(r#"{"isEnabledAudio":false,"isEnabledVideo":false}"#),
    );
    notify(EventKind::QosAlert, serde_json::json!("off"));
    teacher.coordinator.settle().await;
    let bob = teacher.record("bob");
    assert!(!bob.qos);
    assert!(!bob.is_session_inactive);
    assert!(!bob.is_mic_on);
    assert!(!bob.is_camera_on);

    notify(EventKind::SessionLeft, serde_json::json!(""));
    teacher.coordinator.settle().await;
    let bob = teacher.record("bob");
    assert!(bob.is_mic_on);
    assert!(bob.is_camera_on);
    assert!(!bob.is_speaking);
}

#[tokio::test]
async fn test_local_record_inactive_until_server_reports_active() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    let snapshot = wait_roster(&alice, |s| joined(s, &["alice"])).await;
    assert!(snapshot.find(&uid("alice")).unwrap().is_session_inactive);

    room.bus.publish(&GlobalEvent::notify(
        EventKind::SessionActive,
        "alice",
        &acronym(),
        serde_json::json!({"isEnabledAudio": false, "isEnabledVideo": true}),
    ));
    alice.coordinator.settle().await;
    let local = alice.record("alice");
    assert!(!local.is_session_inactive);
    // The server echo does not override local devices.
    assert!(local.is_mic_on);
    assert!(!alice.media.local_track().is_mic_muted());

    room.bus.publish(&GlobalEvent::notify(
        EventKind::SessionInactive,
        "alice",
        &acronym(),
        "",
    ));
    alice.coordinator.settle().await;
    assert!(alice.record("alice").is_session_inactive);
}

#[tokio::test]
async fn test_optimization_mode_command_reaches_local_track() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    wait_roster(&alice, |s| joined(s, &["alice"])).await;

    room.bus.publish(&GlobalEvent::command(
        EventKind::VideoOptimizationMode,
        "alice",
        &acronym(),
        "motion",
    ));
    alice.coordinator.settle().await;
    assert_eq!(
        alice.media.local_track().optimization_mode(),
        Some(OptimizationMode::Motion)
    );

    room.bus.publish(&GlobalEvent::command(
        EventKind::VideoOptimizationMode,
        "alice",
        &acronym(),
        "blurry",
    ));
    alice.coordinator.settle().await;
    assert_eq!(
        alice.media.local_track().optimization_mode(),
        Some(OptimizationMode::Motion)
    );
}

// ============================================================================
// Media control across coordinators
// ============================================================================

#[tokio::test]
async fn test_mute_all_reaches_every_participant() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;
    let bob = room.seat("bob").await;

    let remotes = teacher.connect(&["alice", "bob"]);
    alice.connect(&["teacher", "bob"]);
    wait_roster(&teacher, |s| joined(s, &["teacher", "alice", "bob"])).await;
    wait_roster(&alice, |s| joined(s, &["teacher", "alice", "bob"])).await;
    settle_all(&[&teacher, &alice, &bob]).await;

    teacher.coordinator.do_mute_all_click().unwrap();
    settle_all(&[&teacher, &alice, &bob]).await;

    // Participants muted their own devices.
    for seat in [&alice, &bob] {
        let track = seat.media.local_track();
        assert!(track.is_mic_muted());
        assert_eq!(track.volume(), 0);
        let local = seat.coordinator.roster_snapshot();
        assert!(!local.find(&seat.coordinator.local_user().id).unwrap().is_mic_on);
    }

    // The instructor is not a target of participant broadcasts.
    assert!(!teacher.media.local_track().is_mic_muted());
    assert!(teacher.record("teacher").is_mic_on);

    // Everyone's roster reflects the muted participants.
    assert!(!teacher.record("alice").is_mic_on);
    assert!(!teacher.record("bob").is_mic_on);
    assert!(!alice.record("bob").is_mic_on);
    assert!(bob.record("teacher").is_mic_on);
    assert!(remotes.iter().all(|r| r.is_playback_muted()));

    teacher.coordinator.do_unmute_all_click().unwrap();
    settle_all(&[&teacher, &alice, &bob]).await;
    assert!(!alice.media.local_track().is_mic_muted());
    assert_eq!(alice.media.local_track().volume(), 100);
    assert!(teacher.record("alice").is_mic_on);
    assert!(remotes.iter().all(|r| !r.is_playback_muted()));

    assert!(teacher.telemetry.names().contains(&"mute_all".to_string()));
    assert!(matches!(
        alice.coordinator.do_mute_all_click(),
        Err(CoordinatorError::NotPermitted(_))
    ));
}

#[tokio::test]
async fn test_toggle_mic_round_trips_through_bus() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;
    wait_roster(&alice, |s| joined(s, &["alice"])).await;

    alice.coordinator.do_toggle_mic_click();
    settle_all(&[&teacher, &alice]).await;
    assert!(alice.media.local_track().is_mic_muted());
    assert!(!teacher.record("alice").is_mic_on);

    alice.coordinator.do_toggle_camera_click();
    settle_all(&[&teacher, &alice]).await;
    assert!(!alice.media.local_track().is_camera_enabled());
    assert!(!teacher.record("alice").is_camera_on);

    alice.coordinator.do_toggle_mic_click();
    settle_all(&[&teacher, &alice]).await;
    assert!(!alice.media.local_track().is_mic_muted());
    assert!(teacher.record("alice").is_mic_on);
}

#[tokio::test]
async fn test_instructor_toggles_participant_camera() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let bob = room.seat("bob").await;
    wait_roster(&bob, |s| joined(s, &["bob"])).await;

    teacher
        .coordinator
        .do_participant_video_event(&uid("bob"))
        .unwrap();
    settle_all(&[&teacher, &bob]).await;
    assert!(!bob.media.local_track().is_camera_enabled());
    assert!(!teacher.record("bob").is_camera_on);

    assert!(matches!(
        teacher.coordinator.do_participant_video_event(&uid("zed")),
        Err(CoordinatorError::ParticipantNotFound(_))
    ));
    assert!(matches!(
        bob.coordinator.do_participant_microphone_event(&uid("alice")),
        Err(CoordinatorError::NotPermitted(_))
    ));
}

#[tokio::test]
async fn test_help_request_and_clear() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;

    alice.coordinator.do_ask_for_help_click();
    settle_all(&[&teacher, &alice]).await;
    assert!(alice.coordinator.asked_for_help());
    assert!(teacher.record("alice").help_wanted);

    teacher.coordinator.do_clear_help(&uid("alice"));
    settle_all(&[&teacher, &alice]).await;
    assert!(!alice.coordinator.asked_for_help());
    assert!(!teacher.record("alice").help_wanted);

    room.bus.publish(&GlobalEvent::command(
        EventKind::SetHelpMessage,
        "*",
        &acronym(),
        "Raise your hand",
    ));
    settle_all(&[&teacher, &alice]).await;
    assert_eq!(alice.coordinator.help_message(), "Raise your hand");
}

// ============================================================================
// Views
// ============================================================================

#[tokio::test]
async fn test_spotlight_hides_everyone_else_for_participants() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;

    teacher
        .coordinator
        .do_spotlight_event(&uid("bob"))
        .await
        .unwrap();
    settle_all(&[&teacher, &alice]).await;

    let snapshot = alice.coordinator.roster_snapshot();
    assert_eq!(snapshot.view, View::Spotlight(uid("bob")));
    for record in &snapshot.records {
        let shown = record.is_the_instructor || record.user_id == uid("bob");
        assert_eq!(record.is_hidden, !shown, "{}", record.user_id);
        assert_eq!(record.is_spotlight, shown);
    }

    // The instructor still sees every tile.
    let snapshot = teacher.coordinator.roster_snapshot();
    assert_eq!(snapshot.view, View::Spotlight(uid("bob")));
    assert!(snapshot.records.iter().all(|r| !r.is_hidden));

    // Spotlighting the same user again returns to group view.
    teacher
        .coordinator
        .do_spotlight_event(&uid("bob"))
        .await
        .unwrap();
    settle_all(&[&teacher, &alice]).await;
    let snapshot = alice.coordinator.roster_snapshot();
    assert_eq!(snapshot.view, View::Group);
    assert!(snapshot
        .records
        .iter()
        .all(|r| !r.is_hidden && !r.is_spotlight && !r.is_focused));
}

#[tokio::test]
async fn test_participant_view_click_is_local() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;
    let bob = room.seat("bob").await;

    alice.coordinator.do_spotlight_view_click();
    settle_all(&[&teacher, &alice, &bob]).await;

    assert_eq!(alice.coordinator.current_view(), View::Instructor);
    assert_eq!(bob.coordinator.current_view(), View::Group);
    assert_eq!(teacher.coordinator.current_view(), View::Group);

    // Only the instructor's tile stays visible.
    let snapshot = alice.coordinator.roster_snapshot();
    for record in &snapshot.records {
        assert_eq!(record.is_hidden, !record.is_the_instructor, "{}", record.user_id);
    }
    let instructor = snapshot.find(&uid("teacher")).unwrap();
    assert!(instructor.is_spotlight && instructor.is_focused);
}

#[tokio::test]
async fn test_spotlight_promotes_remote_stream() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    teacher.connect(&["alice", "bob"]);
    wait_roster(&teacher, |s| joined(s, &["alice", "bob"])).await;

    teacher
        .coordinator
        .do_spotlight_event(&uid("bob"))
        .await
        .unwrap();

    let streams = teacher.media.stream_types();
    assert!(streams.contains(&(TransportId(3), StreamType::High)));
    assert!(streams.contains(&(TransportId(2), StreamType::Low)));

    assert!(matches!(
        teacher.coordinator.do_spotlight_event(&uid("nobody")).await,
        Err(CoordinatorError::ParticipantNotFound(_))
    ));
}

#[tokio::test]
async fn test_leave_instructor_returns_to_group() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;

    room.bus.publish(&GlobalEvent::command(
        EventKind::ChangeView,
        "alice",
        &acronym(),
        "instructor",
    ));
    alice.coordinator.settle().await;
    assert_eq!(alice.coordinator.current_view(), View::Instructor);

    room.bus.publish(&GlobalEvent::command(
        EventKind::LeaveInstructor,
        "alice",
        &acronym(),
        "",
    ));
    alice.coordinator.settle().await;
    assert_eq!(alice.coordinator.current_view(), View::Group);
    let snapshot = alice.coordinator.roster_snapshot();
    assert_eq!(snapshot.view, View::Group);
    assert!(snapshot.records.iter().all(|r| !r.is_hidden));
}

#[tokio::test]
async fn test_view_switch_requests_layout() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    let mut layout = alice.coordinator.subscribe_layout();
    tokio::time::timeout(Duration::from_secs(5), layout.wait_for(|g| *g >= 1))
        .await
        .unwrap()
        .unwrap();
    let before = alice.coordinator.layout_generation();

    alice.coordinator.do_spotlight_view_click();
    alice.coordinator.settle().await;
    tokio::time::timeout(Duration::from_secs(5), layout.wait_for(|g| *g > before))
        .await
        .unwrap()
        .unwrap();
}

// ============================================================================
// Active speakers
// ============================================================================

#[tokio::test]
async fn test_speaker_cap_and_echo_cancel() {
    let mut config = quiet_config();
    config.active_speaker.sample_interval = Duration::from_millis(20);
    config.active_speaker.max_active = 2;
    let room = Classroom::with_config(config);
    let alice = room.seat("alice").await;

    let teacher_audio = alice.connect(&["teacher"]).pop().unwrap();
    let bob_audio = alice.connect(&["bob"]).pop().unwrap();
    let carl_audio = alice.connect(&["carl"]).pop().unwrap();
    teacher_audio.set_level(0.5);
    bob_audio.set_level(0.3);
    carl_audio.set_level(0.4);

    let snapshot = wait_roster(&alice, |s| {
        joined(s, &["teacher", "bob", "carl"])
            && s.find(&uid("bob")).is_some_and(|r| r.is_audio_cancelled)
    })
    .await;

    let speaking: Vec<_> = snapshot
        .records
        .iter()
        .filter(|r| !r.is_local_preview && r.is_speaking)
        .map(|r| r.user_id.clone())
        .collect();
    assert!(speaking.len() <= 2);
    assert_eq!(speaking, vec![uid("teacher"), uid("carl")]);
    assert!(!snapshot.find(&uid("carl")).unwrap().is_audio_cancelled);

    // The next tick publishes after the previous tick applied its changes.
    let mut rx = alice.coordinator.subscribe_roster();
    rx.borrow_and_update();
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(bob_audio.is_playback_muted());
    assert!(!carl_audio.is_playback_muted());

    // Quiet again: cancellation is released.
    bob_audio.set_level(0.0);
    wait_roster(&alice, |s| {
        s.find(&uid("bob")).is_some_and(|r| !r.is_audio_cancelled)
    })
    .await;
}

#[tokio::test]
async fn test_spotlight_disables_participant_speaker_detection() {
    let mut config = quiet_config();
    config.active_speaker.sample_interval = Duration::from_millis(20);
    let room = Classroom::with_config(config);
    let alice = room.seat("alice").await;
    let remotes = alice.connect(&["bob"]);
    remotes.first().unwrap().set_level(0.9);

    wait_roster(&alice, |s| s.find(&uid("bob")).is_some_and(|r| r.is_speaking)).await;

    room.bus.publish(&GlobalEvent::command(
        EventKind::ChangeView,
        "alice",
        &acronym(),
        "spot:bob",
    ));
    wait_roster(&alice, |s| {
        s.view == View::Spotlight(uid("bob")) && s.records.iter().all(|r| !r.is_speaking)
    })
    .await;
}

// ============================================================================
// Music
// ============================================================================

#[tokio::test]
async fn test_music_toggle_cycle() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let music = teacher.coordinator.music();
    assert!(music.is_ready());
    assert_eq!(music.selected().await.unwrap().title, "In the Mood");

    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    // Guard held until the play command is handled.
    assert!(!teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Playing);
    assert!(!music.is_toggle_in_flight());
    assert_eq!(teacher.media.audio_tracks_created(), 1);
    assert_eq!(teacher.media.published_count(), 1);
    let first = teacher.media.last_audio_track().unwrap();
    assert_eq!(first.play_count(), 1);
    assert_eq!(first.volume(), 20);

    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Paused);
    assert_eq!(first.pause_count(), 1);

    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Playing);
    assert_eq!(first.resume_count(), 1);
    assert_eq!(teacher.media.audio_tracks_created(), 1);

    // Selecting a song stops playback and disposes the track.
    teacher
        .coordinator
        .do_music_selected(MusicFile {
            title: "Take Five".to_string(),
            url: "memory://music/Take_Five".to_string(),
        })
        .await
        .unwrap();
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Stopped);
    assert!(first.is_stopped());

    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    assert_eq!(teacher.media.audio_tracks_created(), 2);
}

#[tokio::test]
async fn test_music_volume_command_adjusts_playing_track() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    let track = teacher.media.last_audio_track().unwrap();

    room.bus.publish(&GlobalEvent::command(
        EventKind::MusicVolume,
        ANY_SUBJECT,
        &acronym(),
        35,
    ));
    teacher.coordinator.settle().await;
    assert_eq!(track.volume(), 35);
    assert_eq!(teacher.coordinator.music().volume().await, 35);

    room.bus.publish(&GlobalEvent::command(
        EventKind::MusicVolume,
        ANY_SUBJECT,
        &acronym(),
        250,
    ));
    teacher.coordinator.settle().await;
    assert_eq!(track.volume(), 35);
}

#[tokio::test]
async fn test_foreign_music_command_leaves_toggle_guard_alone() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let music = teacher.coordinator.music();

    // A toggle is still waiting when someone else starts the music.
    assert!(music.try_begin_toggle());
    room.bus.publish(&GlobalEvent::command(
        EventKind::Music,
        ANY_SUBJECT,
        &acronym(),
        "play",
    ));
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Playing);
    assert!(music.is_toggle_in_flight());
    assert!(!teacher.coordinator.do_toggle_music_click().await.unwrap());

    music.release_toggle();
    assert!(teacher.coordinator.do_toggle_music_click().await.unwrap());
    teacher.coordinator.settle().await;
    assert_eq!(teacher.coordinator.music_state(), MusicState::Paused);
    assert!(!music.is_toggle_in_flight());
}

#[tokio::test]
async fn test_music_is_instructor_only() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    assert!(!alice.coordinator.music().is_ready());
    assert!(matches!(
        alice.coordinator.do_toggle_music_click().await,
        Err(CoordinatorError::NotPermitted(_))
    ));
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_destroy_releases_everything_once() {
    let room = Classroom::new();
    let alice = room.seat("alice").await;
    wait_roster(&alice, |s| joined(s, &["alice"])).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    room.bus.subscribe(move |event| {
        sink.lock().unwrap().push((event.event, event.subject.clone()));
        Ok(())
    });

    alice.coordinator.destroy().await;

    assert_eq!(alice.coordinator.phase(), Phase::Destroyed);
    assert_eq!(alice.media.leave_count(), 1);
    assert!(alice.media.local_track().is_stopped());
    assert!(alice.coordinator.roster_snapshot().records.is_empty());
    assert_eq!(room.bus.listener_count(), 1);
    tokio::time::timeout(Duration::from_secs(5), async {
        while alice.media.has_transport_subscriber() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(seen
        .lock()
        .unwrap()
        .contains(&(EventKind::SessionLeft, "alice".to_string())));

    alice.coordinator.destroy().await;
    assert_eq!(alice.media.leave_count(), 1);

    // Late callbacks are ignored.
    alice.media.emit(TransportEvent::UserJoined(Arc::new(MockRemoteUser::new(3))));
    alice.coordinator.settle().await;
    assert!(alice.coordinator.roster_snapshot().records.is_empty());
}

#[tokio::test]
async fn test_end_class_sends_everyone_to_leave_page() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;

    assert!(teacher.coordinator.end_class_dialog().end_label.is_some());
    assert!(alice.coordinator.end_class_dialog().end_label.is_none());

    teacher.coordinator.end_class(EndClassChoice::Cancel);
    assert!(teacher.navigator.paths().is_empty());

    teacher.coordinator.end_class(EndClassChoice::End);
    settle_all(&[&teacher, &alice]).await;

    let leave = format!("/session/leave/{ACRONYM}");
    assert_eq!(teacher.navigator.paths(), vec![leave.clone()]);
    assert_eq!(alice.navigator.paths(), vec![leave]);
}

#[tokio::test]
async fn test_participant_leave_is_local() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let alice = room.seat("alice").await;

    alice.coordinator.end_class(EndClassChoice::End);
    settle_all(&[&teacher, &alice]).await;

    assert_eq!(alice.navigator.paths(), vec![format!("/session/leave/{ACRONYM}")]);
    assert!(teacher.navigator.paths().is_empty());
}

#[tokio::test]
async fn test_start_over_reloads_participant() {
    let room = Classroom::new();
    let teacher = room.seat("teacher").await;
    let carl = room.seat("carl").await;

    teacher
        .coordinator
        .do_participant_start_over(&uid("carl"))
        .unwrap();
    settle_all(&[&teacher, &carl]).await;
    assert_eq!(carl.navigator.reload_count(), 1);
    assert_eq!(teacher.navigator.reload_count(), 0);
}
