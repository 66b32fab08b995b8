//! Classroom event model.
//!
//! A [`GlobalEvent`] is either a Command ("please do X") or a Notify
//! ("X happened"). Events serialize to the short wire codes shared with the
//! rest of the classroom (`{"eventClass":"C","event":"MMA",...}`).
//!
//! The `target` payload is untyped on the wire. Its legal shape depends on
//! the event kind and is checked by [`GlobalEvent::decode_target`] when the
//! event is consumed.

pub mod bus;

pub use bus::{EventBus, SubscriptionId};

use crate::errors::PayloadError;
use crate::video::{OptimizationMode, View};
use common::types::{SessionAcronym, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Subject sentinel: every participant.
pub const ANY_SUBJECT: &str = "*";
/// Subject sentinel: nobody in particular.
pub const NO_SUBJECT: &str = "-";
/// Subject sentinel: the classroom backend.
pub const SERVER: &str = "$";
/// Session sentinel: every session.
pub const ANY_SESSION: &str = "*";

/// Command vs Notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    #[serde(rename = "C")]
    Command,
    #[serde(rename = "N")]
    Notify,
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventClass::Command => "C",
            EventClass::Notify => "N",
        })
    }
}

macro_rules! event_kinds {
    ($($(#[$doc:meta])* $variant:ident => $code:literal,)+) => {
        /// Event kinds and their wire codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum EventKind {
            $($(#[$doc])* $variant,)+
        }

        impl EventKind {
            /// Wire code for this kind.
            #[must_use]
            pub fn code(self) -> &'static str {
                match self {
                    $(EventKind::$variant => $code,)+
                }
            }

            /// Parse a wire code. Unrecognized codes map to [`EventKind::Unknown`].
            #[must_use]
            pub fn from_code(code: &str) -> Self {
                match code {
                    $($code => EventKind::$variant,)+
                    _ => EventKind::Unknown,
                }
            }
        }
    };
}

event_kinds! {
    AudioMuted => "AM",
    AudioUnmuted => "AU",
    CameraOff => "CameraOff",
    CameraOn => "CameraOn",
    ChangeView => "CV",
    ChangeViewAll => "CVA",
    Debug => "DBG",
    LeaveSession => "LS",
    LoggedIn => "LI",
    LoggedOut => "LO",
    LogoutAll => "LOA",
    MediaStatus => "MS",
    MediaStatusAll => "MSA",
    MicOff => "MicOff",
    MicOn => "MicOn",
    MuteAudio => "MA",
    MuteMicAll => "MMA",
    MuteVideoAll => "MVA",
    Navigate => "N",
    NavigateAll => "NL",
    Navigated => "NN",
    /// Placeholder kind carrying no meaning.
    NoOp => "X",
    Record => "RE",
    Music => "MC",
    MusicVolume => "PV",
    SessionJoined => "SJ",
    SessionLeft => "SL",
    Unknown => "?",
    UnmuteAudio => "UA",
    UnmuteMicAll => "UMA",
    UnmuteVideoAll => "UVA",
    ViewChanged => "VC",
    HelpWanted => "HW",
    ClearHelp => "CH",
    ShowStats => "SS",
    QosAlert => "QOS",
    SetHelpMessage => "SH",
    StartOver => "SO",
    VideoOptimizationMode => "VOM",
    SessionInactive => "IS",
    SessionActive => "AS",
    LeaveInstructor => "LIT",
}

impl From<String> for EventKind {
    fn from(code: String) -> Self {
        EventKind::from_code(&code)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.code().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl EventKind {
    /// Events that update a remote participant's media tile.
    #[must_use]
    pub fn is_media(self) -> bool {
        matches!(
            self,
            EventKind::MuteMicAll
                | EventKind::MuteAudio
                | EventKind::MuteVideoAll
                | EventKind::UnmuteMicAll
                | EventKind::UnmuteVideoAll
                | EventKind::UnmuteAudio
                | EventKind::AudioMuted
                | EventKind::AudioUnmuted
                | EventKind::CameraOff
                | EventKind::CameraOn
                | EventKind::MicOff
                | EventKind::MicOn
                | EventKind::MediaStatus
                | EventKind::MediaStatusAll
                | EventKind::QosAlert
                | EventKind::SessionActive
                | EventKind::SessionInactive
                | EventKind::SessionJoined
                | EventKind::SessionLeft
        )
    }

    #[must_use]
    pub fn is_active_session(self) -> bool {
        matches!(
            self,
            EventKind::SessionActive
                | EventKind::SessionInactive
                | EventKind::SessionLeft
                | EventKind::SessionJoined
        )
    }

    #[must_use]
    pub fn is_mic(self) -> bool {
        matches!(
            self,
            EventKind::MuteMicAll | EventKind::UnmuteMicAll | EventKind::MicOff | EventKind::MicOn
        )
    }

    #[must_use]
    pub fn is_video(self) -> bool {
        matches!(
            self,
            EventKind::MuteVideoAll
                | EventKind::UnmuteVideoAll
                | EventKind::CameraOff
                | EventKind::CameraOn
        )
    }

    #[must_use]
    pub fn is_mute(self) -> bool {
        matches!(
            self,
            EventKind::MuteAudio
                | EventKind::MuteMicAll
                | EventKind::MuteVideoAll
                | EventKind::MicOff
                | EventKind::CameraOff
        )
    }

    #[must_use]
    pub fn is_unmute(self) -> bool {
        matches!(
            self,
            EventKind::UnmuteAudio
                | EventKind::UnmuteMicAll
                | EventKind::UnmuteVideoAll
                | EventKind::MicOn
                | EventKind::CameraOn
        )
    }

    #[must_use]
    pub fn is_view(self) -> bool {
        matches!(
            self,
            EventKind::ChangeView | EventKind::ChangeViewAll | EventKind::ViewChanged
        )
    }

    #[must_use]
    pub fn is_recording(self) -> bool {
        matches!(self, EventKind::Record)
    }

    #[must_use]
    pub fn is_music(self) -> bool {
        matches!(self, EventKind::Music | EventKind::MusicVolume)
    }

    #[must_use]
    pub fn is_help(self) -> bool {
        matches!(
            self,
            EventKind::HelpWanted | EventKind::ClearHelp | EventKind::SetHelpMessage
        )
    }

    #[must_use]
    pub fn is_qos(self) -> bool {
        matches!(self, EventKind::QosAlert)
    }

    /// Broadcasts aimed at participants. The instructor ignores these.
    #[must_use]
    pub fn is_for_all_participants(self) -> bool {
        matches!(
            self,
            EventKind::NavigateAll
                | EventKind::LogoutAll
                | EventKind::MuteMicAll
                | EventKind::MuteVideoAll
                | EventKind::UnmuteMicAll
                | EventKind::UnmuteVideoAll
                | EventKind::MediaStatusAll
        )
    }
}

/// One event on the classroom bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalEvent {
    pub event_class: EventClass,
    pub event: EventKind,
    pub subject: String,
    pub session_id: String,
    #[serde(default)]
    pub target: Value,
}

impl GlobalEvent {
    pub fn new(
        event_class: EventClass,
        event: EventKind,
        subject: impl Into<String>,
        session: &SessionAcronym,
        target: impl Into<Value>,
    ) -> Self {
        Self {
            event_class,
            event,
            subject: subject.into(),
            session_id: session.as_str().to_string(),
            target: target.into(),
        }
    }

    pub fn command(
        event: EventKind,
        subject: impl Into<String>,
        session: &SessionAcronym,
        target: impl Into<Value>,
    ) -> Self {
        Self::new(EventClass::Command, event, subject, session, target)
    }

    pub fn notify(
        event: EventKind,
        subject: impl Into<String>,
        session: &SessionAcronym,
        target: impl Into<Value>,
    ) -> Self {
        Self::new(EventClass::Notify, event, subject, session, target)
    }

    #[must_use]
    pub fn is_command(&self) -> bool {
        self.event_class == EventClass::Command
    }

    #[must_use]
    pub fn is_notify(&self) -> bool {
        self.event_class == EventClass::Notify
    }

    /// Whether `user` is the subject of this event.
    #[must_use]
    pub fn is_about(&self, user: &UserId) -> bool {
        self.subject == user.as_str()
    }

    /// Whether this event addresses `user`, directly or through [`ANY_SUBJECT`].
    #[must_use]
    pub fn is_addressed_to(&self, user: &UserId) -> bool {
        self.is_about(user) || self.subject == ANY_SUBJECT
    }

    /// Whether this event belongs to `session` (or to every session).
    #[must_use]
    pub fn in_session(&self, session: &SessionAcronym) -> bool {
        self.session_id == session.as_str() || self.session_id == ANY_SESSION
    }

    /// Decode `target` into the shape required by this event's kind.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] when the payload does not fit the kind.
    pub fn decode_target(&self) -> Result<EventTarget, PayloadError> {
        let kind = self.event.code();
        let target = &self.target;
        match self.event {
            EventKind::ChangeView | EventKind::ChangeViewAll | EventKind::ViewChanged => {
                Ok(EventTarget::View(View::parse(expect_str(kind, target, "view target")?)?))
            }
            EventKind::HelpWanted | EventKind::QosAlert => {
                Ok(EventTarget::Toggle(decode_toggle(kind, target)?))
            }
            EventKind::Record => Ok(EventTarget::Record(RecordState::parse(expect_str(
                kind,
                target,
                "record state",
            )?)?)),
            EventKind::Music => Ok(EventTarget::Music(MusicCommand::parse(expect_str(
                kind,
                target,
                "music command",
            )?)?)),
            EventKind::MusicVolume => Ok(EventTarget::Volume(decode_volume(kind, target)?)),
            EventKind::Navigate | EventKind::NavigateAll | EventKind::Navigated => {
                let path = expect_str(kind, target, "path")?;
                if path.is_empty() {
                    return Err(unexpected(kind, "non-empty path", target));
                }
                Ok(EventTarget::Path(path.to_string()))
            }
            EventKind::SetHelpMessage => Ok(EventTarget::Text(
                expect_str(kind, target, "help message")?.to_string(),
            )),
            EventKind::VideoOptimizationMode => Ok(EventTarget::Optimization(
                OptimizationMode::parse(expect_str(kind, target, "optimization mode")?)?,
            )),
            EventKind::SessionActive => Ok(EventTarget::MediaState(SessionMediaState::decode(
                kind, target,
            )?)),
            _ => Ok(EventTarget::None),
        }
    }
}

impl fmt::Display for GlobalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.event_class, self.event, self.subject, self.session_id, self.target
        )
    }
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    /// Kind carries no meaningful target.
    None,
    View(View),
    Toggle(bool),
    Record(RecordState),
    Music(MusicCommand),
    Volume(u8),
    Path(String),
    Text(String),
    Optimization(OptimizationMode),
    MediaState(SessionMediaState),
}

/// `on` / `off` payload as a wire string.
#[must_use]
pub fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Recording state carried by Record events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    On,
    Off,
    Pause,
}

impl RecordState {
    fn parse(value: &str) -> Result<Self, PayloadError> {
        match value {
            "on" => Ok(RecordState::On),
            "off" => Ok(RecordState::Off),
            "pause" => Ok(RecordState::Pause),
            other => Err(PayloadError::UnknownValue {
                field: "record state",
                value: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::On => "on",
            RecordState::Off => "off",
            RecordState::Pause => "pause",
        }
    }
}

/// Music sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicCommand {
    Play,
    Pause,
    Stop,
    VolumeUp,
    VolumeDown,
    /// Progress reports from the player; not acted on.
    Loading,
    Ready,
}

impl MusicCommand {
    fn parse(value: &str) -> Result<Self, PayloadError> {
        match value {
            "play" => Ok(MusicCommand::Play),
            "pause" => Ok(MusicCommand::Pause),
            "stop" => Ok(MusicCommand::Stop),
            "vup" => Ok(MusicCommand::VolumeUp),
            "vdown" => Ok(MusicCommand::VolumeDown),
            "loading" => Ok(MusicCommand::Loading),
            "ready" => Ok(MusicCommand::Ready),
            other => Err(PayloadError::UnknownValue {
                field: "music command",
                value: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MusicCommand::Play => "play",
            MusicCommand::Pause => "pause",
            MusicCommand::Stop => "stop",
            MusicCommand::VolumeUp => "vup",
            MusicCommand::VolumeDown => "vdown",
            MusicCommand::Loading => "loading",
            MusicCommand::Ready => "ready",
        }
    }
}

/// Audio/video flags carried by SessionActive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMediaState {
    #[serde(default = "enabled")]
    pub is_enabled_audio: bool,
    #[serde(default = "enabled")]
    pub is_enabled_video: bool,
}

fn enabled() -> bool {
    true
}

impl SessionMediaState {
    /// Accepts either a JSON object or a string holding JSON.
    fn decode(kind: &'static str, target: &Value) -> Result<Self, PayloadError> {
        let parsed = match target {
            Value::String(s) => serde_json::from_str::<SessionMediaState>(s),
            Value::Object(_) => serde_json::from_value::<SessionMediaState>(target.clone()),
            _ => return Err(unexpected(kind, "media state object", target)),
        };
        parsed.map_err(|_| unexpected(kind, "media state object", target))
    }
}

fn unexpected(kind: &'static str, expected: &'static str, found: &Value) -> PayloadError {
    PayloadError::UnexpectedShape {
        kind,
        expected,
        found: found.to_string(),
    }
}

fn expect_str<'a>(
    kind: &'static str,
    target: &'a Value,
    expected: &'static str,
) -> Result<&'a str, PayloadError> {
    target.as_str().ok_or_else(|| unexpected(kind, expected, target))
}

fn decode_toggle(kind: &'static str, target: &Value) -> Result<bool, PayloadError> {
    match target {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "on" => Ok(true),
        Value::String(s) if s == "off" => Ok(false),
        _ => Err(unexpected(kind, "on/off", target)),
    }
}

fn decode_volume(kind: &'static str, target: &Value) -> Result<u8, PayloadError> {
    let raw = match target {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if (0.0..=100.0).contains(&v) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let volume = v.round() as u8;
            Ok(volume)
        }
        _ => Err(unexpected(kind, "volume 0-100", target)),
    }
}
