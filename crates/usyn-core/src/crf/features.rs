use serde::{Deserialize, Serialize};

use crate::alphabet::PhonemeAlphabet;
use crate::phoneme::{MfccArray, PhonemeInstance};

/// Vertex features: score a candidate instance against the target at one position.
///
/// Distances are negated so that every potential reads "higher is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFeature {
    /// Absolute duration mismatch with the target.
    Duration,
    /// Log-pitch contour mismatch with the target.
    Pitch,
}

/// Edge features: score the join between two consecutive candidate instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionFeature {
    /// Log-pitch jump across the join.
    Pitch,
    /// Euclidean MFCC distance across the join.
    Mfcc,
    /// L1 MFCC distance across the join.
    MfccL1,
    /// The next unit was not recorded after a phoneme with the previous label.
    LeftContext,
    /// The two units were not adjacent in their source recording.
    Baseline,
    /// The two units carry different labels.
    LabelChange,
}

impl StateFeature {
    pub const ALL: [StateFeature; 2] = [StateFeature::Duration, StateFeature::Pitch];

    pub fn name(self) -> &'static str {
        match self {
            StateFeature::Duration => "state-duration",
            StateFeature::Pitch => "state-pitch",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn eval(self, candidate: &PhonemeInstance, target: &PhonemeInstance) -> f64 {
        match self {
            StateFeature::Duration => -(candidate.duration() - target.duration()).abs(),
            StateFeature::Pitch => -candidate.pitch_contour.diff(&target.pitch_contour),
        }
    }
}

impl TransitionFeature {
    pub const ALL: [TransitionFeature; 6] = [
        TransitionFeature::Pitch,
        TransitionFeature::Mfcc,
        TransitionFeature::MfccL1,
        TransitionFeature::LeftContext,
        TransitionFeature::Baseline,
        TransitionFeature::LabelChange,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransitionFeature::Pitch => "trans-pitch",
            TransitionFeature::Mfcc => "trans-mfcc",
            TransitionFeature::MfccL1 => "trans-mfcc-l1",
            TransitionFeature::LeftContext => "trans-ctx",
            TransitionFeature::Baseline => "trans-baseline",
            TransitionFeature::LabelChange => "trans-label",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn eval(
        self,
        alphabet: &PhonemeAlphabet,
        prev: &PhonemeInstance,
        next: &PhonemeInstance,
    ) -> f64 {
        match self {
            TransitionFeature::Pitch => -(prev.pitch_contour.end - next.pitch_contour.start).abs(),
            TransitionFeature::Mfcc => match (prev.last(), next.first()) {
                (Some(a), Some(b)) => -l2(&a.mfcc, &b.mfcc),
                _ => 0.0,
            },
            TransitionFeature::MfccL1 => match (prev.last(), next.first()) {
                (Some(a), Some(b)) => -l1(&a.mfcc, &b.mfcc),
                _ => 0.0,
            },
            TransitionFeature::LeftContext => {
                if next.ctx_left == Some(prev.label) {
                    0.0
                } else {
                    -1.0
                }
            }
            TransitionFeature::Baseline => {
                let adjacent = match (alphabet.old_id(prev.id), alphabet.old_id(next.id)) {
                    (Ok(a), Ok(b)) => a + 1 == b,
                    _ => false,
                };
                if adjacent {
                    0.0
                } else {
                    -1.0
                }
            }
            TransitionFeature::LabelChange => {
                if prev.label != next.label {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

pub(crate) fn l2(a: &MfccArray, b: &MfccArray) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn l1(a: &MfccArray, b: &MfccArray) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Named presets for `FeatureSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureSetKind {
    Phonetic,
    Baseline,
}

/// Ordered state and transition features, each paired 1:1 with a coefficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    pub states: Vec<StateFeature>,
    pub transitions: Vec<TransitionFeature>,
}

impl FeatureSet {
    pub fn new(states: Vec<StateFeature>, transitions: Vec<TransitionFeature>) -> Self {
        Self {
            states,
            transitions,
        }
    }

    pub fn phonetic() -> Self {
        Self::new(
            vec![StateFeature::Duration, StateFeature::Pitch],
            vec![
                TransitionFeature::Pitch,
                TransitionFeature::Mfcc,
                TransitionFeature::LeftContext,
            ],
        )
    }

    pub fn baseline() -> Self {
        Self::new(Vec::new(), vec![TransitionFeature::Baseline])
    }

    pub fn preset(kind: FeatureSetKind) -> Self {
        match kind {
            FeatureSetKind::Phonetic => Self::phonetic(),
            FeatureSetKind::Baseline => Self::baseline(),
        }
    }

    /// Build from feature names. Returns the first unknown name on failure.
    pub fn from_names<'a>(
        states: impl IntoIterator<Item = &'a str>,
        transitions: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, String> {
        let states = states
            .into_iter()
            .map(|n| StateFeature::from_name(n).ok_or_else(|| n.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let transitions = transitions
            .into_iter()
            .map(|n| TransitionFeature::from_name(n).ok_or_else(|| n.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(states, transitions))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.states
            .iter()
            .map(|f| f.name())
            .chain(self.transitions.iter().map(|f| f.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phoneme::Frame;

    fn unit(label: char, dur: f64, pitch: (f64, f64), mfcc0: f64) -> PhonemeInstance {
        let mut first = Frame::new(pitch.0);
        first.mfcc[0] = mfcc0;
        let mut last = Frame::new(pitch.1);
        last.mfcc[0] = mfcc0;
        PhonemeInstance::new(label, 0.0, dur, vec![first, last])
    }

    #[test]
    fn test_names_round_trip() {
        for f in StateFeature::ALL {
            assert_eq!(StateFeature::from_name(f.name()), Some(f));
        }
        for f in TransitionFeature::ALL {
            assert_eq!(TransitionFeature::from_name(f.name()), Some(f));
        }
        assert_eq!(TransitionFeature::from_name("tranx-ctx"), None);
    }

    #[test]
    fn test_state_duration() {
        let a = unit('a', 0.10, (100.0, 100.0), 0.0);
        let b = unit('a', 0.25, (100.0, 100.0), 0.0);
        assert!((StateFeature::Duration.eval(&a, &b) + 0.15).abs() < 1e-12);
        assert_eq!(StateFeature::Duration.eval(&a, &a), 0.0);
    }

    #[test]
    fn test_transition_pitch_and_mfcc() {
        let alphabet = PhonemeAlphabet::default();
        let a = unit('a', 0.1, (100.0, 200.0), 1.0);
        let b = unit('b', 0.1, (100.0, 100.0), 4.0);
        let pitch = TransitionFeature::Pitch.eval(&alphabet, &a, &b);
        assert!((pitch + 2.0f64.ln()).abs() < 1e-12);
        assert!((TransitionFeature::Mfcc.eval(&alphabet, &a, &b) + 3.0).abs() < 1e-12);
        assert!((TransitionFeature::MfccL1.eval(&alphabet, &a, &b) + 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_left_context() {
        let alphabet = PhonemeAlphabet::default();
        let a = unit('a', 0.1, (100.0, 100.0), 0.0);
        let mut b = unit('b', 0.1, (100.0, 100.0), 0.0);
        assert_eq!(TransitionFeature::LeftContext.eval(&alphabet, &a, &b), -1.0);
        b.ctx_left = Some('a');
        assert_eq!(TransitionFeature::LeftContext.eval(&alphabet, &a, &b), 0.0);
    }

    #[test]
    fn test_baseline_uses_original_order() {
        let mut alphabet = PhonemeAlphabet::new(vec![
            unit('b', 0.1, (100.0, 100.0), 0.0),
            unit('a', 0.1, (100.0, 100.0), 0.0),
        ]);
        alphabet.optimize();
        // After optimize: id 0 = 'a' (old 1), id 1 = 'b' (old 0)
        let a = alphabet.get(0).unwrap();
        let b = alphabet.get(1).unwrap();
        assert_eq!(TransitionFeature::Baseline.eval(&alphabet, b, a), 0.0);
        assert_eq!(TransitionFeature::Baseline.eval(&alphabet, a, b), -1.0);
    }

    #[test]
    fn test_from_names_reports_unknown() {
        let set = FeatureSet::from_names(["state-duration"], ["trans-label"]).unwrap();
        assert_eq!(set.states, vec![StateFeature::Duration]);
        assert_eq!(set.transitions, vec![TransitionFeature::LabelChange]);
        let err = FeatureSet::from_names(std::iter::empty(), ["trans-nope"]).unwrap_err();
        assert_eq!(err, "trans-nope");
    }

    #[test]
    fn test_phonetic_names() {
        let names: Vec<&str> = FeatureSet::phonetic().names().collect();
        assert_eq!(
            names,
            vec![
                "state-duration",
                "state-pitch",
                "trans-pitch",
                "trans-mfcc",
                "trans-ctx"
            ]
        );
    }
}
