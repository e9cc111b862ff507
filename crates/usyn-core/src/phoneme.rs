//! Recorded phoneme instances and their per-frame acoustics.

use serde::{Deserialize, Serialize};

/// Number of cepstral coefficients stored per frame.
pub const MFCC_N: usize = 12;

pub type MfccArray = [f64; MFCC_N];

/// Dense identifier of a phoneme instance inside a `PhonemeAlphabet`.
pub type LabelId = usize;

/// One analysis frame: fundamental frequency (Hz, 0 when unvoiced) and MFCCs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub pitch: f64,
    pub mfcc: MfccArray,
}

impl Frame {
    pub fn new(pitch: f64) -> Self {
        Self {
            pitch,
            mfcc: [0.0; MFCC_N],
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Log pitch at the first and last frame of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchContour {
    pub start: f64,
    pub end: f64,
}

impl PitchContour {
    /// Build from frames. Unvoiced frames (pitch <= 1 Hz) map to log 1 = 0.
    pub fn from_frames(frames: &[Frame]) -> Self {
        let log_pitch = |f: Option<&Frame>| f.map(|f| f.pitch.max(1.0).ln()).unwrap_or(0.0);
        Self {
            start: log_pitch(frames.first()),
            end: log_pitch(frames.last()),
        }
    }

    /// Sum of absolute log-pitch differences, point by point.
    pub fn diff(&self, other: &PitchContour) -> f64 {
        (self.start - other.start).abs() + (self.end - other.end).abs()
    }
}

/// A single recorded phoneme, as stored in the unit database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeInstance {
    #[serde(default)]
    pub id: LabelId,
    pub label: char,
    /// Label of the phoneme that preceded this one in its recording.
    #[serde(default)]
    pub ctx_left: Option<char>,
    pub start: f64,
    pub end: f64,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub pitch_contour: PitchContour,
}

impl PhonemeInstance {
    pub fn new(label: char, start: f64, end: f64, frames: Vec<Frame>) -> Self {
        let pitch_contour = PitchContour::from_frames(&frames);
        Self {
            id: 0,
            label,
            ctx_left: None,
            start,
            end,
            frames,
            pitch_contour,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn first(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Mean pitch over all frames (0 when there are none).
    pub fn mean_pitch(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.frames.iter().map(|f| f.pitch).sum::<f64>() / self.frames.len() as f64
    }

    pub fn refresh_contour(&mut self) {
        self.pitch_contour = PitchContour::from_frames(&self.frames);
    }
}

/// Give unvoiced frames the pitch of their nearest voiced neighbour.
///
/// `phonemes` must be one recording in time order. A forward pass carries the
/// last voiced pitch to the right, then a backward pass fills the leading
/// gap. Pitch contours are recomputed afterwards.
pub fn fill_unvoiced_pitch(phonemes: &mut [PhonemeInstance]) {
    let mut last_pitch = 0.0;
    for frame in phonemes.iter_mut().flat_map(|p| p.frames.iter_mut()) {
        if frame.pitch == 0.0 {
            frame.pitch = last_pitch;
        } else {
            last_pitch = frame.pitch;
        }
    }

    last_pitch = 0.0;
    for frame in phonemes
        .iter_mut()
        .rev()
        .flat_map(|p| p.frames.iter_mut().rev())
    {
        if frame.pitch == 0.0 {
            frame.pitch = last_pitch;
        } else {
            last_pitch = frame.pitch;
        }
    }

    for p in phonemes.iter_mut() {
        p.refresh_contour();
    }
}
