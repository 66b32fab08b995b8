//! Classroom coordinator configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; unset variables fall back to the defaults below.

use crate::video::VideoProfile;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default audience for active-speaker highlighting.
pub const DEFAULT_ACTIVE_SPEAKER_ENABLED_FOR: &str = "all";

/// Default active-speaker sampling interval in milliseconds.
pub const DEFAULT_ACTIVE_SPEAKER_SAMPLE_MS: u64 = 1000;

/// Default number of simultaneous active speakers.
pub const DEFAULT_ACTIVE_SPEAKER_MAX_ACTIVE: usize = 1;

/// Default audio level above which a participant counts as speaking.
pub const DEFAULT_ACTIVE_SPEAKER_THRESHOLD: f64 = 0.02;

pub const DEFAULT_INSTRUCTOR_VIDEO_LOW: &str = "480p_8";
pub const DEFAULT_INSTRUCTOR_VIDEO_HIGH: &str = "720p_1";
pub const DEFAULT_PARTICIPANT_VIDEO_LOW: &str = "240p_4";
pub const DEFAULT_PARTICIPANT_VIDEO_HIGH: &str = "720p_1";

/// Default microphone volume restored on unmute-all.
pub const DEFAULT_VOLUME: u8 = 100;

/// Default background music volume.
pub const DEFAULT_MUSIC_VOLUME: u8 = 20;

/// Default background music title.
pub const DEFAULT_SONG: &str = "In the Mood";

/// Default layout recompute debounce in milliseconds.
pub const DEFAULT_LAYOUT_DEBOUNCE_MS: u64 = 250;

/// Default help copy shown to participants.
pub const DEFAULT_HELP_MESSAGE: &str = "Your instructor has been notified and will help you shortly.";

/// Who gets active-speaker highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerAudience {
    /// Instructor and participants.
    All,
    /// Instructor only.
    Instructor,
    /// Participants never get it. The instructor always does.
    None,
}

impl SpeakerAudience {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(SpeakerAudience::All),
            "instructor" => Some(SpeakerAudience::Instructor),
            "none" => Some(SpeakerAudience::None),
            _ => None,
        }
    }
}

/// Active-speaker poller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSpeakerConfig {
    pub enabled_for: SpeakerAudience,
    pub sample_interval: Duration,
    pub max_active: usize,
    pub volume_threshold: f64,
}

/// Low/high camera profile names for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProfileNames {
    pub low: String,
    pub high: String,
}

impl VideoProfileNames {
    #[must_use]
    pub fn low_profile(&self) -> VideoProfile {
        VideoProfile::lookup(&self.low)
    }

    #[must_use]
    pub fn high_profile(&self) -> VideoProfile {
        VideoProfile::lookup(&self.high)
    }
}

/// Classroom coordinator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Active-speaker detection settings.
    pub active_speaker: ActiveSpeakerConfig,

    /// Camera profiles used when the local user is the instructor.
    pub instructor_video: VideoProfileNames,

    /// Camera profiles used when the local user is a participant.
    pub participant_video: VideoProfileNames,

    /// Microphone volume restored by unmute-all (0-100).
    pub default_volume: u8,

    /// Background music volume (0-100).
    pub music_volume: u8,

    /// Title of the song selected when the music library loads.
    pub default_song: String,

    /// Quiet period before a layout recompute runs.
    pub layout_debounce: Duration,

    /// Help copy shown until an instructor overrides it.
    pub help_message: String,

    /// Skip transport callbacks entirely (audio/video disabled).
    pub disable_av: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_speaker: ActiveSpeakerConfig {
                enabled_for: SpeakerAudience::All,
                sample_interval: Duration::from_millis(DEFAULT_ACTIVE_SPEAKER_SAMPLE_MS),
                max_active: DEFAULT_ACTIVE_SPEAKER_MAX_ACTIVE,
                volume_threshold: DEFAULT_ACTIVE_SPEAKER_THRESHOLD,
            },
            instructor_video: VideoProfileNames {
                low: DEFAULT_INSTRUCTOR_VIDEO_LOW.to_string(),
                high: DEFAULT_INSTRUCTOR_VIDEO_HIGH.to_string(),
            },
            participant_video: VideoProfileNames {
                low: DEFAULT_PARTICIPANT_VIDEO_LOW.to_string(),
                high: DEFAULT_PARTICIPANT_VIDEO_HIGH.to_string(),
            },
            default_volume: DEFAULT_VOLUME,
            music_volume: DEFAULT_MUSIC_VOLUME,
            default_song: DEFAULT_SONG.to_string(),
            layout_debounce: Duration::from_millis(DEFAULT_LAYOUT_DEBOUNCE_MS),
            help_message: DEFAULT_HELP_MESSAGE.to_string(),
            disable_av: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but malformed.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let enabled_for = match vars.get("CLASSROOM_ACTIVE_SPEAKER_ENABLED_FOR") {
            Some(value) => SpeakerAudience::parse(value).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "CLASSROOM_ACTIVE_SPEAKER_ENABLED_FOR must be all, instructor or none, got '{value}'"
                ))
            })?,
            None => defaults.active_speaker.enabled_for,
        };

        let sample_ms = parse_var(
            vars,
            "CLASSROOM_ACTIVE_SPEAKER_SAMPLE_MS",
            DEFAULT_ACTIVE_SPEAKER_SAMPLE_MS,
        )?;
        if sample_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "CLASSROOM_ACTIVE_SPEAKER_SAMPLE_MS must be greater than 0".to_string(),
            ));
        }

        let max_active = parse_var(
            vars,
            "CLASSROOM_ACTIVE_SPEAKER_MAX_ACTIVE",
            DEFAULT_ACTIVE_SPEAKER_MAX_ACTIVE,
        )?;
        if max_active == 0 {
            return Err(ConfigError::InvalidValue(
                "CLASSROOM_ACTIVE_SPEAKER_MAX_ACTIVE must be at least 1".to_string(),
            ));
        }

        let volume_threshold = parse_var(
            vars,
            "CLASSROOM_ACTIVE_SPEAKER_THRESHOLD",
            DEFAULT_ACTIVE_SPEAKER_THRESHOLD,
        )?;
        if !(0.0..=1.0).contains(&volume_threshold) {
            return Err(ConfigError::InvalidValue(format!(
                "CLASSROOM_ACTIVE_SPEAKER_THRESHOLD must be within 0.0-1.0, got {volume_threshold}"
            )));
        }

        let instructor_video = VideoProfileNames {
            low: profile_var(vars, "CLASSROOM_INSTRUCTOR_VIDEO_LOW", DEFAULT_INSTRUCTOR_VIDEO_LOW)?,
            high: profile_var(vars, "CLASSROOM_INSTRUCTOR_VIDEO_HIGH", DEFAULT_INSTRUCTOR_VIDEO_HIGH)?,
        };
        let participant_video = VideoProfileNames {
            low: profile_var(vars, "CLASSROOM_PARTICIPANT_VIDEO_LOW", DEFAULT_PARTICIPANT_VIDEO_LOW)?,
            high: profile_var(
                vars,
                "CLASSROOM_PARTICIPANT_VIDEO_HIGH",
                DEFAULT_PARTICIPANT_VIDEO_HIGH,
            )?,
        };

        let default_volume = volume_var(vars, "CLASSROOM_DEFAULT_VOLUME", DEFAULT_VOLUME)?;
        let music_volume = volume_var(vars, "CLASSROOM_MUSIC_VOLUME", DEFAULT_MUSIC_VOLUME)?;

        let default_song = vars
            .get("CLASSROOM_DEFAULT_SONG")
            .cloned()
            .unwrap_or(defaults.default_song);

        let layout_debounce_ms = parse_var(
            vars,
            "CLASSROOM_LAYOUT_DEBOUNCE_MS",
            DEFAULT_LAYOUT_DEBOUNCE_MS,
        )?;

        let help_message = vars
            .get("CLASSROOM_HELP_MESSAGE")
            .cloned()
            .unwrap_or(defaults.help_message);

        let disable_av = parse_var(vars, "CLASSROOM_DISABLE_AV", false)?;

        Ok(Config {
            active_speaker: ActiveSpeakerConfig {
                enabled_for,
                sample_interval: Duration::from_millis(sample_ms),
                max_active,
                volume_threshold,
            },
            instructor_video,
            participant_video,
            default_volume,
            music_volume,
            default_song,
            layout_debounce: Duration::from_millis(layout_debounce_ms),
            help_message,
            disable_av,
        })
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        Some(value) => value.trim().parse::<T>().map_err(|e| {
            ConfigError::InvalidValue(format!("{name} could not be parsed from '{value}': {e}"))
        }),
        None => Ok(default),
    }
}

fn volume_var(vars: &HashMap<String, String>, name: &str, default: u8) -> Result<u8, ConfigError> {
    let volume = parse_var(vars, name, default)?;
    if volume > 100 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be within 0-100, got {volume}"
        )));
    }
    Ok(volume)
}

fn profile_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(value) if VideoProfile::is_known(value) => Ok(value.clone()),
        Some(value) => Err(ConfigError::InvalidValue(format!(
            "{name} names an unknown video profile '{value}'"
        ))),
        None => Ok(default.to_string()),
    }
}
