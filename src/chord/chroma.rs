//! Chromagram template matcher
//!
//! Folds the windowed power spectrum into twelve pitch classes and scores
//! it against chord templates by cosine similarity.

use super::classifier::{ChordClassifier, RawChord};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Spectrum range folded into the chromagram (roughly C2 to C7)
const MIN_FREQ: f32 = 65.0;
const MAX_FREQ: f32 = 2100.0;

/// Frames with less total power than this are treated as silence
const MIN_ENERGY: f32 = 1e-6;

/// Template: (quality code, interval width, semitone offsets from root)
const TEMPLATES: [(i32, i32, &[usize]); 9] = [
    (1, 4, &[0, 4, 7]),
    (0, 3, &[0, 3, 7]),
    (1, 7, &[0, 4, 7, 11]),
    (0, 7, &[0, 3, 7, 10]),
    (3, 7, &[0, 4, 7, 10]),
    (2, 2, &[0, 2, 7]),
    (2, 5, &[0, 5, 7]),
    (4, 6, &[0, 3, 6]),
    (5, 8, &[0, 4, 8]),
];

/// Built-in chromagram classifier
pub struct ChromaClassifier {
    frame_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,

    /// Pitch class per FFT bin, `None` outside the folded range
    bin_classes: Vec<Option<usize>>,

    scratch: Vec<Complex<f32>>,
}

impl ChromaClassifier {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(frame_size);

        // Hann window
        let window: Vec<f32> = (0..frame_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (frame_size - 1) as f32).cos())
            })
            .collect();

        let bin_classes = (0..=frame_size / 2)
            .map(|bin| {
                let freq = bin as f32 * sample_rate as f32 / frame_size as f32;
                if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                    return None;
                }
                let midi = (69.0 + 12.0 * (freq / 440.0).log2()).round() as i32;
                Some(midi.rem_euclid(12) as usize)
            })
            .collect();

        Self {
            frame_size,
            fft,
            window,
            bin_classes,
            scratch: vec![Complex::new(0.0, 0.0); frame_size],
        }
    }

    /// Normalized twelve-bin chromagram, `None` for silent frames
    pub fn chroma(&mut self, frame: &[f32]) -> Option<[f32; 12]> {
        if frame.len() < self.frame_size {
            return None;
        }

        for ((slot, &sample), &w) in self.scratch.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let mut chroma = [0.0f32; 12];
        for (bin, class) in self.bin_classes.iter().enumerate() {
            if let Some(class) = class {
                chroma[*class] += self.scratch[bin].norm_sqr();
            }
        }

        let energy: f32 = chroma.iter().sum();
        if !energy.is_finite() || energy < MIN_ENERGY {
            return None;
        }

        let norm = chroma.iter().map(|v| v * v).sum::<f32>().sqrt();
        for value in chroma.iter_mut() {
            *value /= norm;
        }
        Some(chroma)
    }
}

impl ChordClassifier for ChromaClassifier {
    fn classify(&mut self, frame: &[f32]) -> Option<RawChord> {
        let chroma = self.chroma(frame)?;

        let mut best: Option<(f32, RawChord)> = None;
        for root in 0..12 {
            for (quality, width, intervals) in TEMPLATES {
                let hits: f32 = intervals.iter().map(|i| chroma[(root + i) % 12]).sum();
                let score = hits / (intervals.len() as f32).sqrt();

                if best.as_ref().map_or(true, |(top, _)| score > *top) {
                    best = Some((
                        score,
                        RawChord {
                            root: root as i32,
                            quality,
                            interval_width: width,
                            confidence: ((score - 0.5) / 0.5).clamp(0.0, 1.0),
                        },
                    ));
                }
            }
        }
        best.map(|(_, chord)| chord)
    }
}
