//! Capture pass owned by the render thread
//!
//! A take is allocated on the control thread, handed to the render thread
//! inside a command, written in place for every incoming buffer and handed
//! back inside an event when it finishes. Writing never allocates.

/// Identifier of one capture pass
pub type TakeId = u64;

/// What a take is capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeKind {
    /// Fresh recording into a fixed-capacity scratch buffer
    Recording,

    /// Additive pass aligned to the committed loop length
    Overdub,
}

/// Result of writing one buffer into a take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Continue,

    /// The recording scratch is full; the take must be finished
    CapacityReached,
}

/// One recording or overdub pass
#[derive(Debug)]
pub struct Take {
    id: TakeId,
    kind: TakeKind,
    samples: Vec<f32>,
    cursor: usize,
}

impl Take {
    /// Zeroed recording scratch of `capacity` samples
    pub fn recording(id: TakeId, capacity: usize) -> Self {
        Self {
            id,
            kind: TakeKind::Recording,
            samples: vec![0.0; capacity],
            cursor: 0,
        }
    }

    /// Zeroed overdub ring of exactly `loop_len` samples
    pub fn overdub(id: TakeId, loop_len: usize) -> Self {
        Self {
            id,
            kind: TakeKind::Overdub,
            samples: vec![0.0; loop_len],
            cursor: 0,
        }
    }

    pub fn id(&self) -> TakeId {
        self.id
    }

    pub fn kind(&self) -> TakeKind {
        self.kind
    }

    /// Write cursor: samples recorded so far, or the overdub ring position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Write one buffer
    ///
    /// Recording copies as much as still fits. Overdub adds every sample at
    /// `(cursor + i) % len` and never ends by itself.
    pub fn write(&mut self, frame: &[f32]) -> WriteOutcome {
        match self.kind {
            TakeKind::Recording => {
                let remaining = self.samples.len() - self.cursor;
                let count = remaining.min(frame.len());
                self.samples[self.cursor..self.cursor + count].copy_from_slice(&frame[..count]);
                self.cursor += count;

                if self.cursor >= self.samples.len() {
                    WriteOutcome::CapacityReached
                } else {
                    WriteOutcome::Continue
                }
            }
            TakeKind::Overdub => {
                let len = self.samples.len();
                if len == 0 {
                    return WriteOutcome::Continue;
                }
                for (i, &sample) in frame.iter().enumerate() {
                    self.samples[(self.cursor + i) % len] += sample;
                }
                self.cursor = (self.cursor + frame.len()) % len;
                WriteOutcome::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_index_is_capped_at_capacity() {
        let mut take = Take::recording(1, 10);
        let frames: [&[f32]; 3] = [&[0.1; 4], &[0.2; 4], &[0.3; 4]];
        let mut expected = 0;

        for (i, frame) in frames.iter().enumerate() {
            let outcome = take.write(frame);
            expected = (expected + frame.len()).min(10);
            assert_eq!(take.cursor(), expected);

            if i < 2 {
                assert_eq!(outcome, WriteOutcome::Continue);
            } else {
                assert_eq!(outcome, WriteOutcome::CapacityReached);
            }
        }

        assert_eq!(&take.samples()[8..], &[0.3, 0.3]);
    }

    #[test]
    fn recording_reports_capacity_when_exactly_full() {
        let mut take = Take::recording(1, 8);

        assert_eq!(take.write(&[1.0; 4]), WriteOutcome::Continue);
        assert_eq!(take.write(&[1.0; 4]), WriteOutcome::CapacityReached);
        assert_eq!(take.cursor(), 8);
    }

    #[test]
    fn overdub_wraps_at_loop_length() {
        let mut take = Take::overdub(2, 4);

        take.write(&[1.0, 2.0, 3.0]);
        take.write(&[10.0, 20.0, 30.0]);

        assert_eq!(take.samples(), &[21.0, 32.0, 3.0, 10.0]);
        assert_eq!(take.cursor(), 2);
    }

    #[test]
    fn overdub_is_independent_of_chunking() {
        let input: Vec<f32> = (0..23).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut whole = Take::overdub(1, 7);
        whole.write(&input);

        let mut single = Take::overdub(2, 7);
        for sample in &input {
            single.write(std::slice::from_ref(sample));
        }

        let mut uneven = Take::overdub(3, 7);
        for chunk in input.chunks(5) {
            uneven.write(chunk);
        }

        for i in 0..7 {
            assert!((whole.samples()[i] - single.samples()[i]).abs() < 1e-6);
            assert!((whole.samples()[i] - uneven.samples()[i]).abs() < 1e-6);
        }
        assert_eq!(whole.cursor(), single.cursor());
        assert_eq!(whole.cursor(), uneven.cursor());
    }

    #[test]
    fn overdub_never_requests_a_stop() {
        let mut take = Take::overdub(1, 3);

        for _ in 0..10 {
            assert_eq!(take.write(&[0.5; 5]), WriteOutcome::Continue);
        }
    }
}
