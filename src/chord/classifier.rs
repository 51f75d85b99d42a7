//! Classifier seam for raw chord detection

use super::chroma::ChromaClassifier;
use std::sync::Arc;

/// Classifier output before naming
///
/// `quality` codes: 0 minor, 1 major, 2 suspended, 3 dominant,
/// 4 diminished, 5 augmented. `interval_width` tells apart the sevenths
/// (7) and the two suspended chords (2 or 5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawChord {
    pub root: i32,
    pub quality: i32,
    pub interval_width: i32,
    pub confidence: f32,
}

/// Classifies one analysis frame
///
/// Implementations may keep scratch state between calls; each analysis
/// worker owns its own instance.
pub trait ChordClassifier: Send {
    fn classify(&mut self, frame: &[f32]) -> Option<RawChord>;
}

/// Builds a classifier for `(frame_size, sample_rate)`
pub type ClassifierFactory = Arc<dyn Fn(usize, u32) -> Box<dyn ChordClassifier> + Send + Sync>;

/// Factory for the built-in chromagram classifier
pub fn default_factory() -> ClassifierFactory {
    Arc::new(|frame_size: usize, sample_rate: u32| {
        Box::new(ChromaClassifier::new(frame_size, sample_rate)) as Box<dyn ChordClassifier>
    })
}
