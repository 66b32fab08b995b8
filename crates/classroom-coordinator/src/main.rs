//! Classroom Coordinator loopback demo
//!
//! Runs an instructor and two participants in one process over a shared
//! event bus, backed by the in-memory media and directory collaborators.
//! Useful for watching the coordination protocol in the logs:
//!
//! ```text
//! RUST_LOG=classroom=debug cargo run -p classroom-coordinator
//! ```
//!
//! # Script
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start three coordinators and connect their media
//! 4. Instructor mutes everyone, spotlights a participant, plays music
//! 5. Instructor ends the class; everyone tears down
//! 6. Dump the rendered metrics

#![warn(clippy::pedantic)]

use classroom_coordinator::config::Config;
use classroom_coordinator::coordinator::{EndClassChoice, MeetingCoordinator};
use classroom_coordinator::events::EventBus;
use classroom_coordinator::observability::metrics::{init_metrics_recorder, MetricsTelemetry};
use classroom_coordinator::providers::mock::{
    MockDirectory, MockMediaProvider, MockMusicLibrary, MockNavigator, MockRemoteUser,
    MockSessionApi,
};
use classroom_coordinator::providers::{
    ClassSession, LocalSessionStore, Services, SessionKind, TransportEvent, UserProfile,
};
use common::types::{SessionAcronym, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SESSION_NAME: &str = "Morning Yoga";

/// Time given to the background tasks between script steps.
const STEP_PAUSE: Duration = Duration::from_millis(300);

struct Seat {
    coordinator: MeetingCoordinator,
    media: Arc<MockMediaProvider>,
    navigator: Arc<MockNavigator>,
}

fn users() -> Vec<UserProfile> {
    vec![
        UserProfile::new("instructor-ana", 1, "Ana"),
        UserProfile::new("participant-ben", 2, "Ben"),
        UserProfile::new("participant-cleo", 3, "Cleo"),
    ]
}

fn session() -> ClassSession {
    ClassSession {
        acronym: SessionAcronym::new("YOGA1"),
        name: SESSION_NAME.to_string(),
        class_id: Some(uuid::Uuid::new_v4().to_string()),
        kind: SessionKind::Class,
        instructor_id: UserId::new("instructor-ana"),
        participants: vec![UserId::new("participant-ben"), UserId::new("participant-cleo")],
        optimization_mode: None,
    }
}

async fn take_seat(
    config: &Config,
    bus: &EventBus,
    directory: &Arc<MockDirectory>,
    user: UserProfile,
) -> anyhow::Result<Seat> {
    let media = Arc::new(MockMediaProvider::new());
    let navigator = Arc::new(MockNavigator::new());
    let services = Services {
        media: media.clone(),
        directory: directory.clone(),
        sessions: Arc::new(MockSessionApi::new(user, vec![session()])),
        store: Arc::new(LocalSessionStore::new(bus.clone())),
        navigator: navigator.clone(),
        music_library: Arc::new(MockMusicLibrary::new(&["In the Mood", "Take Five"])),
        telemetry: Arc::new(MetricsTelemetry),
    };
    let coordinator =
        MeetingCoordinator::start(config.clone(), services, bus.clone(), SESSION_NAME).await?;
    Ok(Seat {
        coordinator,
        media,
        navigator,
    })
}

async fn settle(seats: &[Seat]) {
    tokio::time::sleep(STEP_PAUSE).await;
    for _ in 0..2 {
        for seat in seats {
            seat.coordinator.settle().await;
        }
    }
}

fn log_rosters(seats: &[Seat], step: &str) {
    for seat in seats {
        let snapshot = seat.coordinator.roster_snapshot();
        let summary: Vec<String> = snapshot
            .records
            .iter()
            .map(|r| {
                format!(
                    "{}[{}{}{}{}]",
                    r.display_name(),
                    if r.is_joined { "J" } else { "-" },
                    if r.is_mic_on { "M" } else { "m" },
                    if r.is_spotlight { "S" } else { "-" },
                    if r.is_hidden { "h" } else { "-" },
                )
            })
            .collect();
        info!(
            step,
            user_id = %seat.coordinator.local_user().id,
            role = %seat.coordinator.role(),
            view = %snapshot.view,
            roster = %summary.join(" "),
            "Roster"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classroom_coordinator=debug,classroom=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting classroom loopback demo");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let bus = EventBus::new();
    let directory = Arc::new(MockDirectory::with_profiles(users()));

    let mut seats = Vec::new();
    for user in users() {
        seats.push(take_seat(&config, &bus, &directory, user).await?);
    }

    // Every seat sees the other two connect.
    for seat in &seats {
        for other in users() {
            let Some(number) = other.user_number else {
                continue;
            };
            if other.id != seat.coordinator.local_user().id {
                seat.media
                    .emit(TransportEvent::UserJoined(Arc::new(MockRemoteUser::new(number.0))));
            }
        }
    }
    settle(&seats).await;
    log_rosters(&seats, "joined");

    let [instructor, ..] = seats.as_slice() else {
        anyhow::bail!("no instructor seat");
    };

    instructor.coordinator.do_mute_all_click()?;
    settle(&seats).await;
    log_rosters(&seats, "muted");

    instructor
        .coordinator
        .do_spotlight_event(&UserId::new("participant-ben"))
        .await?;
    settle(&seats).await;
    log_rosters(&seats, "spotlight");

    instructor.coordinator.do_toggle_music_click().await?;
    settle(&seats).await;
    info!(state = instructor.coordinator.music_state().as_str(), "Music");

    instructor.coordinator.end_class(EndClassChoice::End);
    settle(&seats).await;
    for seat in &seats {
        info!(
            user_id = %seat.coordinator.local_user().id,
            paths = ?seat.navigator.paths(),
            "Navigation"
        );
        seat.coordinator.destroy().await;
    }

    info!(metrics = %prometheus_handle.render(), "Demo finished");
    Ok(())
}
