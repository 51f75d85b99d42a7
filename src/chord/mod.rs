//! Chord detection: classification, naming, smoothing and the analysis worker

mod chroma;
mod classifier;
mod engine;
mod smoothing;
mod worker;

pub use chroma::ChromaClassifier;
pub use classifier::{default_factory, ChordClassifier, ClassifierFactory, RawChord};
pub use engine::{chord_name, ChordDetectionEngine, ChordQuality, DetectedChord, PITCH_CLASSES};
pub use smoothing::{
    ChordSmoother, ChordSmoothingState, ChordUpdate, SmoothingConfig, NO_CHORD,
};
pub use worker::{AnalysisWorker, ChordUpdateMessage};
