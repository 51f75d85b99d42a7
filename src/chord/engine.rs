//! Chord naming on top of a raw classifier

use super::classifier::{ChordClassifier, RawChord};

/// Pitch class names, indexed by root
pub const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Chord quality as reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordQuality {
    Minor,
    Major,
    Suspended,
    Dominant,
    Diminished,
    Augmented,
}

impl ChordQuality {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ChordQuality::Minor),
            1 => Some(ChordQuality::Major),
            2 => Some(ChordQuality::Suspended),
            3 => Some(ChordQuality::Dominant),
            4 => Some(ChordQuality::Diminished),
            5 => Some(ChordQuality::Augmented),
            _ => None,
        }
    }

    /// Name suffix for this quality at the given interval width
    pub fn suffix(self, interval_width: i32) -> &'static str {
        match self {
            ChordQuality::Minor if interval_width == 7 => "m7",
            ChordQuality::Minor => "m",
            ChordQuality::Major if interval_width == 7 => "maj7",
            ChordQuality::Major => "",
            ChordQuality::Suspended if interval_width == 2 => "sus2",
            ChordQuality::Suspended => "sus4",
            ChordQuality::Dominant => "7",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
        }
    }
}

/// Display name for a classifier triple, `None` when it cannot be named
pub fn chord_name(root: i32, quality: i32, interval_width: i32) -> Option<String> {
    let root = usize::try_from(root).ok()?;
    let pitch = PITCH_CLASSES.get(root)?;
    let quality = ChordQuality::from_code(quality)?;
    Some(format!("{}{}", pitch, quality.suffix(interval_width)))
}

/// Named detection result
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChord {
    pub name: String,
    pub confidence: f32,
}

/// Runs the classifier over fixed-size frames and names the result
pub struct ChordDetectionEngine {
    classifier: Box<dyn ChordClassifier>,
    frame_size: usize,
}

impl ChordDetectionEngine {
    pub fn new(classifier: Box<dyn ChordClassifier>, frame_size: usize) -> Self {
        Self {
            classifier,
            frame_size,
        }
    }

    /// Samples needed per analysis
    pub fn required_frame_size(&self) -> usize {
        self.frame_size
    }

    /// Classify the first `required_frame_size` samples of `frame`
    ///
    /// Short frames are not an error; they simply detect nothing.
    pub fn analyze(&mut self, frame: &[f32]) -> Option<DetectedChord> {
        if frame.len() < self.frame_size {
            return None;
        }
        let RawChord {
            root,
            quality,
            interval_width,
            confidence,
        } = self.classifier.classify(&frame[..self.frame_size])?;

        Some(DetectedChord {
            name: chord_name(root, quality, interval_width)?,
            confidence,
        })
    }
}
