//! Temporal stabilization of per-frame verdicts.
//!
//! Single-frame classifications flicker with lighting, pose and brief
//! occlusion. The stabilizer keeps a sliding window of the last few labels
//! and only commits to an identity once the whole window agrees. A run of
//! frames without any face raises a single alert instead of one per frame.
//!
//! Every terminal decision pauses the stabilizer. While paused all verdicts
//! are ignored until the collaborator handling the decision calls
//! [`Stabilizer::resume`].
//!
//! The transition itself is the pure function [`step`]; [`Stabilizer`] just
//! owns one state value and threads it through.

use crate::geometry::FaceBox;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const REQUIRED_CONSECUTIVE_MATCHES: usize = 3;
pub const MAX_NO_FACE_FRAMES: u32 = 10;

/// Classification of a single processed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    NoFace,
    /// A face was found but nothing in the gallery is similar enough.
    Unmatched(FaceBox),
    Matched {
        face: FaceBox,
        name: String,
        similarity: f32,
    },
}

/// One slot of the voting window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    Known(String),
    Unknown,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(name) => write!(f, "{name}"),
            Label::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Buffering,
    Paused,
}

/// Progress text for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    AlignFace { frames_left: u32 },
    Processing,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::AlignFace { frames_left } => write!(f, "Align your face ({frames_left})"),
            Status::Processing => write!(f, "Face detected - processing..."),
        }
    }
}

/// What the stabilizer asks its caller to do after a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Nothing to report (verdict ignored while paused).
    Continue,
    StatusUpdate(Status),
    NoFaceAlert,
    KnownUserConfirmed(String),
    UnknownUserConfirmed,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Continue => write!(f, "continue"),
            Event::StatusUpdate(status) => write!(f, "status: {status}"),
            Event::NoFaceAlert => write!(f, "no face detected"),
            Event::KnownUserConfirmed(name) => write!(f, "known user: {name}"),
            Event::UnknownUserConfirmed => write!(f, "unknown user"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// Identical consecutive labels needed before a decision.
    pub required_consecutive: usize,
    /// Consecutive faceless frames before a no-face alert.
    pub max_no_face_frames: u32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            required_consecutive: REQUIRED_CONSECUTIVE_MATCHES,
            max_no_face_frames: MAX_NO_FACE_FRAMES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StabilizerState {
    phase: Phase,
    window: VecDeque<Label>,
    no_face_frames: u32,
}

impl StabilizerState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.phase == Phase::Paused
    }

    /// Labels in the voting window, oldest first.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.window.iter()
    }

    pub fn no_face_frames(&self) -> u32 {
        self.no_face_frames
    }

    /// Leave `Paused` with a clean slate. Returns `false` (state untouched)
    /// when not paused.
    pub fn resume(self) -> (bool, StabilizerState) {
        if self.phase != Phase::Paused {
            return (false, self);
        }
        (true, StabilizerState::default())
    }

    fn pause(mut self) -> Self {
        self.window.clear();
        self.phase = Phase::Paused;
        self
    }
}

/// Apply one verdict. Pure: the same inputs always give the same outputs.
pub fn step(config: &StabilizerConfig, state: StabilizerState, verdict: &Verdict) -> (Event, StabilizerState) {
    if state.is_paused() {
        return (Event::Continue, state);
    }

    let mut state = state;

    let label = match verdict {
        Verdict::NoFace => {
            state.no_face_frames += 1;
            if state.no_face_frames >= config.max_no_face_frames {
                return (Event::NoFaceAlert, state.pause());
            }
            let frames_left = config.max_no_face_frames - state.no_face_frames;
            return (Event::StatusUpdate(Status::AlignFace { frames_left }), state);
        }
        Verdict::Unmatched(_) => Label::Unknown,
        Verdict::Matched { name, .. } => Label::Known(name.clone()),
    };

    let required = config.required_consecutive.max(1);

    state.no_face_frames = 0;
    state.phase = Phase::Buffering;
    state.window.push_back(label);
    while state.window.len() > required {
        state.window.pop_front();
    }

    if state.window.len() >= required {
        let first = &state.window[0];
        if state.window.iter().all(|l| l == first) {
            let event = match first {
                Label::Known(name) => Event::KnownUserConfirmed(name.clone()),
                Label::Unknown => Event::UnknownUserConfirmed,
            };
            return (event, state.pause());
        }
    }

    (Event::StatusUpdate(Status::Processing), state)
}

/// Owns one [`StabilizerState`] and feeds it verdicts.
#[derive(Debug, Clone, Default)]
pub struct Stabilizer {
    config: StabilizerConfig,
    state: StabilizerState,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            state: StabilizerState::default(),
        }
    }

    pub fn state(&self) -> &StabilizerState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn observe(&mut self, verdict: &Verdict) -> Event {
        let state = std::mem::take(&mut self.state);
        let (event, next) = step(&self.config, state, verdict);
        self.state = next;

        if event != Event::Continue {
            tracing::debug!(
                %event,
                phase = ?self.state.phase(),
                window = self.state.window.len(),
                no_face_frames = self.state.no_face_frames,
                "stabilizer transition"
            );
        }
        event
    }

    /// Leave the paused state. A no-op (returning `false`) when not paused.
    pub fn resume(&mut self) -> bool {
        let (resumed, next) = std::mem::take(&mut self.state).resume();
        self.state = next;
        if resumed {
            tracing::debug!("stabilizer resumed");
        }
        resumed
    }
}
