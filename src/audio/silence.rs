//! Energy-based end-of-speech detection
//!
//! Audio is analysed in 20ms frames; a frame whose RMS energy reaches the
//! threshold counts as speech. A capture ends once speech has been heard
//! and is followed by a continuous run of silence at least as long as the
//! silence threshold, or once the duration cap is reached.

use super::SAMPLE_RATE;
use std::time::Duration;

const FRAME_MS: u32 = 20;
const FRAME_SIZE: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// What the capture loop should do after a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceVerdict {
    /// Keep capturing
    Listening,
    /// Speech was heard and then the silence threshold elapsed
    EndOfSpeech,
    /// The silence threshold elapsed without any speech
    NoSpeech,
    /// The duration cap was reached
    MaxDuration,
}

impl SilenceVerdict {
    pub fn is_final(&self) -> bool {
        !matches!(self, SilenceVerdict::Listening)
    }
}

/// Streaming silence detector for one capture
pub struct SilenceDetector {
    energy_threshold: f32,
    silence_frames_needed: u64,
    max_frames: u64,
    pending: Vec<f32>,
    frames: u64,
    speech_frames: u64,
    trailing_silence: u64,
}

impl SilenceDetector {
    pub fn new(energy_threshold: f32, silence_threshold: Duration, max_duration: Duration) -> Self {
        let to_frames = |d: Duration| (d.as_millis() as u64 / u64::from(FRAME_MS)).max(1);
        Self {
            energy_threshold,
            silence_frames_needed: to_frames(silence_threshold),
            max_frames: to_frames(max_duration),
            pending: Vec::with_capacity(FRAME_SIZE),
            frames: 0,
            speech_frames: 0,
            trailing_silence: 0,
        }
    }

    /// Feed newly captured samples (mono, 16kHz)
    pub fn feed(&mut self, samples: &[f32]) -> SilenceVerdict {
        self.pending.extend_from_slice(samples);

        let mut consumed = 0;
        let mut verdict = SilenceVerdict::Listening;
        for frame in self.pending.chunks_exact(FRAME_SIZE) {
            consumed += FRAME_SIZE;
            self.frames += 1;
            if calculate_rms(frame) >= self.energy_threshold {
                self.speech_frames += 1;
                self.trailing_silence = 0;
            } else {
                self.trailing_silence += 1;
            }

            verdict = self.verdict();
            if verdict.is_final() {
                break;
            }
        }
        self.pending.drain(..consumed);
        verdict
    }

    fn verdict(&self) -> SilenceVerdict {
        if self.trailing_silence >= self.silence_frames_needed {
            if self.heard_speech() {
                SilenceVerdict::EndOfSpeech
            } else {
                SilenceVerdict::NoSpeech
            }
        } else if self.frames >= self.max_frames {
            SilenceVerdict::MaxDuration
        } else {
            SilenceVerdict::Listening
        }
    }

    pub fn heard_speech(&self) -> bool {
        self.speech_frames > 0
    }

    /// Audio analysed so far
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.frames * u64::from(FRAME_MS))
    }
}

/// RMS energy of a sample slice
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
