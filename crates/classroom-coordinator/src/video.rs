//! Video encoder profiles, view modes and stream types.

use crate::errors::PayloadError;
use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoder settings for one named camera profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoProfile {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
}

const fn profile(
    name: &'static str,
    width: u32,
    height: u32,
    frame_rate: u32,
    bitrate_kbps: u32,
) -> VideoProfile {
    VideoProfile {
        name,
        width,
        height,
        frame_rate,
        bitrate_kbps,
    }
}

/// Used when a configured name is missing from the table.
pub const DEFAULT_PROFILE: VideoProfile = profile("default", 640, 480, 15, 500);

const PROFILES: &[VideoProfile] = &[
    profile("120p_1", 160, 120, 15, 65),
    profile("120p_3", 120, 120, 15, 50),
    profile("180p_1", 320, 180, 15, 140),
    profile("180p_3", 180, 180, 15, 100),
    profile("180p_4", 240, 180, 15, 120),
    profile("240p_1", 320, 240, 15, 200),
    profile("240p_3", 240, 240, 15, 140),
    profile("240p_4", 424, 240, 15, 220),
    profile("360p_1", 640, 360, 15, 400),
    profile("360p_3", 360, 360, 15, 260),
    profile("360p_4", 640, 360, 30, 600),
    profile("360p_6", 360, 360, 30, 400),
    profile("360p_7", 480, 360, 15, 320),
    profile("360p_8", 480, 360, 30, 490),
    profile("360p_9", 640, 360, 15, 800),
    profile("360p_10", 640, 360, 24, 800),
    profile("360p_11", 640, 360, 24, 1000),
    profile("480p_1", 640, 480, 15, 500),
    profile("480p_2", 640, 480, 30, 1000),
    profile("480p_3", 480, 480, 15, 400),
    profile("480p_4", 640, 480, 30, 750),
    profile("480p_6", 480, 480, 30, 600),
    profile("480p_8", 848, 480, 15, 610),
    profile("480p_9", 848, 480, 30, 930),
    profile("480p_10", 640, 480, 10, 400),
    profile("720p_1", 1280, 720, 15, 1130),
    profile("720p_2", 1280, 720, 30, 2000),
    profile("720p_3", 1280, 720, 30, 1710),
    profile("720p_5", 960, 720, 15, 910),
    profile("720p_6", 960, 720, 30, 1380),
    profile("1080p_1", 1920, 1080, 15, 2080),
    profile("1080p_2", 1920, 1080, 30, 3000),
    profile("1080p_3", 1920, 1080, 30, 3150),
    profile("1080p_5", 1920, 1080, 60, 4780),
    profile("1440p_1", 2560, 1440, 30, 4850),
    profile("1440p_2", 2560, 1440, 60, 7350),
];

impl VideoProfile {
    /// Look up a profile by name, falling back to [`DEFAULT_PROFILE`].
    #[must_use]
    pub fn lookup(name: &str) -> VideoProfile {
        PROFILES
            .iter()
            .find(|p| p.name == name)
            .copied()
            .unwrap_or(DEFAULT_PROFILE)
    }

    #[must_use]
    pub fn is_known(name: &str) -> bool {
        PROFILES.iter().any(|p| p.name == name)
    }
}

/// Which layout the local user is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum View {
    /// Everyone in a grid.
    #[default]
    Group,
    /// Only the instructor.
    Instructor,
    /// One participant plus the instructor.
    Spotlight(UserId),
}

const SPOTLIGHT_PREFIX: &str = "spot:";

impl View {
    /// Parse a view-change target: `group`, `instructor` or `spot:<user id>`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownValue`] for anything else, including
    /// a spotlight target with an empty user id.
    pub fn parse(target: &str) -> Result<View, PayloadError> {
        match target {
            "group" => Ok(View::Group),
            "instructor" => Ok(View::Instructor),
            other => match other.strip_prefix(SPOTLIGHT_PREFIX) {
                Some(id) if !id.is_empty() => Ok(View::Spotlight(UserId::new(id))),
                _ => Err(PayloadError::UnknownValue {
                    field: "view",
                    value: other.to_string(),
                }),
            },
        }
    }

    /// Inverse of [`View::parse`].
    #[must_use]
    pub fn to_target(&self) -> String {
        match self {
            View::Group => "group".to_string(),
            View::Instructor => "instructor".to_string(),
            View::Spotlight(id) => format!("{SPOTLIGHT_PREFIX}{id}"),
        }
    }

    /// Spotlight and instructor views both show a reduced set of tiles.
    #[must_use]
    pub fn is_spotlighting(&self) -> bool {
        !matches!(self, View::Group)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_target())
    }
}

/// Simulcast layer requested for a remote video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    High,
    Low,
}

/// Encoder optimization hint for the local camera track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    Motion,
    Detail,
    Balanced,
}

impl OptimizationMode {
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownValue`] for unrecognized modes.
    pub fn parse(value: &str) -> Result<Self, PayloadError> {
        match value {
            "motion" => Ok(OptimizationMode::Motion),
            "detail" => Ok(OptimizationMode::Detail),
            "balanced" => Ok(OptimizationMode::Balanced),
            other => Err(PayloadError::UnknownValue {
                field: "optimization mode",
                value: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationMode::Motion => "motion",
            OptimizationMode::Detail => "detail",
            OptimizationMode::Balanced => "balanced",
        }
    }
}
