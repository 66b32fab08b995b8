//! Active-speaker detection.
//!
//! Each tick ranks joined remote participants by audio level, instructor
//! first, and lets the top `max_active` that are above the threshold show as
//! speaking. Loud participants below the cap can be echo-cancelled. The
//! ranking is re-evaluated from scratch every tick with no hysteresis, so a
//! speaker hovering around the threshold may flicker.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One participant's audio sample for a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerSample<K> {
    pub key: K,
    pub is_instructor: bool,
    pub level: f64,
}

/// Outcome for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerDecision<K> {
    pub key: K,
    pub speaking: bool,
    pub cancelled: bool,
}

/// Rank `samples` and decide who is speaking.
///
/// `cancel_excess` engages echo cancellation for non-instructor speakers
/// above the threshold who did not make the cap. A `max_active` of 0 is
/// treated as 1.
#[must_use]
pub fn rank_speakers<K>(
    mut samples: Vec<SpeakerSample<K>>,
    max_active: usize,
    threshold: f64,
    cancel_excess: bool,
) -> Vec<SpeakerDecision<K>> {
    samples.sort_by(|a, b| {
        b.is_instructor
            .cmp(&a.is_instructor)
            .then_with(|| b.level.total_cmp(&a.level))
    });

    let mut remaining = max_active.max(1);
    samples
        .into_iter()
        .map(|sample| {
            let has_sound = sample.level > threshold;
            if remaining > 0 {
                if has_sound {
                    remaining -= 1;
                }
                SpeakerDecision {
                    key: sample.key,
                    speaking: has_sound,
                    cancelled: false,
                }
            } else {
                SpeakerDecision {
                    key: sample.key,
                    speaking: false,
                    cancelled: cancel_excess && has_sound && !sample.is_instructor,
                }
            }
        })
        .collect()
}

/// Run `tick` every `interval` until `cancel` fires. The first tick runs
/// immediately.
pub fn spawn_poller<F, Fut>(interval: Duration, cancel: CancellationToken, tick: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(target: "classroom.speaker", "Speaker poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    tick().await;
                }
            }
        }
    })
}
