//! Hysteresis and confidence smoothing for chord detections

use super::engine::DetectedChord;

/// Chord shown when nothing has been detected for a while
pub const NO_CHORD: &str = "--";

/// Weight of the previous smoothed confidence
const CONFIDENCE_DECAY: f32 = 0.7;

/// Tuning for [`ChordSmoother`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    /// Detections below this confidence count as no detection
    pub min_confidence: f32,

    /// Consecutive matching detections before a chord is published
    pub hold_count: u32,

    /// Consecutive non-detections before the display is cleared
    pub silence_count: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            hold_count: 2,
            silence_count: 20,
        }
    }
}

/// Smoother state, owned by the analysis worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChordSmoothingState {
    /// Current candidate chord
    pub last_name: Option<String>,

    /// Consecutive detections of the candidate
    pub hold_count: u32,

    /// Consecutive analyses without a usable detection
    pub no_detection_count: u32,

    pub smoothed_confidence: f32,
}

/// Update to publish to the control surface
#[derive(Debug, Clone, PartialEq)]
pub enum ChordUpdate {
    Accepted { name: String, confidence: f32 },

    /// Reset the display to [`NO_CHORD`] with zero confidence
    Cleared,
}

/// Stateful filter between the detection engine and the display
#[derive(Debug, Clone, Default)]
pub struct ChordSmoother {
    config: SmoothingConfig,
    state: ChordSmoothingState,
}

impl ChordSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            state: ChordSmoothingState::default(),
        }
    }

    pub fn state(&self) -> &ChordSmoothingState {
        &self.state
    }

    /// Feed one analysis result
    pub fn observe(&mut self, detection: Option<&DetectedChord>) -> Option<ChordUpdate> {
        match detection {
            Some(chord) if chord.confidence >= self.config.min_confidence => self.detected(chord),
            _ => self.missed(),
        }
    }

    fn detected(&mut self, chord: &DetectedChord) -> Option<ChordUpdate> {
        let state = &mut self.state;
        state.no_detection_count = 0;

        if state.last_name.as_deref() == Some(chord.name.as_str()) {
            state.hold_count = state.hold_count.saturating_add(1);
        } else {
            state.last_name = Some(chord.name.clone());
            state.hold_count = 1;
        }

        if state.hold_count < self.config.hold_count {
            return None;
        }

        state.smoothed_confidence = state.smoothed_confidence * CONFIDENCE_DECAY
            + chord.confidence * (1.0 - CONFIDENCE_DECAY);
        Some(ChordUpdate::Accepted {
            name: chord.name.clone(),
            confidence: state.smoothed_confidence,
        })
    }

    fn missed(&mut self) -> Option<ChordUpdate> {
        self.state.no_detection_count = self.state.no_detection_count.saturating_add(1);
        if self.state.no_detection_count != self.config.silence_count {
            return None;
        }

        self.state = ChordSmoothingState {
            no_detection_count: self.state.no_detection_count,
            ..ChordSmoothingState::default()
        };
        Some(ChordUpdate::Cleared)
    }
}
