//! Linear-chain CRF over phoneme instances.
//!
//! Labels are instance ids of a `PhonemeAlphabet`; the input is the target
//! phoneme sequence. The partition function and the Viterbi decode share one
//! backward trellis recursion (`trellis`), differing only in how a cell
//! combines its successors.

pub mod features;
mod trellis;


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::alphabet::PhonemeAlphabet;
use crate::phoneme::{LabelId, PhonemeInstance};

pub use features::{FeatureSet, FeatureSetKind, StateFeature, TransitionFeature};

use trellis::Potentials;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CrfError {
    #[error("input sequence is empty")]
    EmptySequence,

    #[error("label alphabet is empty")]
    EmptyAlphabet,

    #[error("label {label} out of range (alphabet has {len} labels)")]
    LabelOutOfRange { label: LabelId, len: usize },

    #[error("trellis position {position} out of range ({rows} positions)")]
    CellOutOfRange { position: usize, rows: usize },

    #[error("label sequence has {labels} labels but input has {inputs}")]
    LengthMismatch { labels: usize, inputs: usize },

    #[error("no instances for label {label:?} at position {position}")]
    UnknownLabel { position: usize, label: char },

    #[error("no feasible label sequence (dead end at position {position})")]
    NoFeasiblePath { position: usize },

    #[error("potential of label {label} at position {position} is {value}")]
    InvalidPotential {
        position: usize,
        label: LabelId,
        value: f64,
    },

    #[error("unknown feature: {0}")]
    UnknownFeature(String),
}

/// Pairwise predicate deciding whether `next` may follow `prev`.
pub trait TransitionPolicy: Send + Sync {
    fn allowed(&self, prev: &PhonemeInstance, next: &PhonemeInstance) -> bool;
}

/// Every transition is allowed.
pub struct AnyTransition;

impl TransitionPolicy for AnyTransition {
    fn allowed(&self, _prev: &PhonemeInstance, _next: &PhonemeInstance) -> bool {
        true
    }
}

impl<F> TransitionPolicy for F
where
    F: Fn(&PhonemeInstance, &PhonemeInstance) -> bool + Send + Sync,
{
    fn allowed(&self, prev: &PhonemeInstance, next: &PhonemeInstance) -> bool {
        self(prev, next)
    }
}

/// Which labels a position may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateMode {
    /// Instances whose label equals the target's label at that position.
    #[default]
    ByClass,
    /// Every instance in the alphabet.
    All,
}

/// Coefficient position, resolved once from a feature name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientSlot {
    State(usize),
    Transition(usize),
}

/// Result of a Viterbi decode.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPath {
    pub labels: Vec<LabelId>,
    pub score: f64,
}

/// CRF model: feature set, one coefficient per feature, transition predicate.
///
/// Cloning is cheap (the alphabet and policy are shared), which is how the
/// tuner hands a frozen coefficient snapshot to its worker threads.
#[derive(Clone)]
pub struct Crf {
    alphabet: Arc<PhonemeAlphabet>,
    features: FeatureSet,
    /// state (vertex) coefficients, paired with `features.states`
    mu: Vec<f64>,
    /// transition (edge) coefficients, paired with `features.transitions`
    lambda: Vec<f64>,
    policy: Arc<dyn TransitionPolicy>,
    candidates: CandidateMode,
}

impl Crf {
    /// New model with every coefficient at 1.0, all transitions allowed.
    pub fn new(alphabet: Arc<PhonemeAlphabet>, features: FeatureSet) -> Self {
        Self {
            mu: vec![1.0; features.states.len()],
            lambda: vec![1.0; features.transitions.len()],
            alphabet,
            features,
            policy: Arc::new(AnyTransition),
            candidates: CandidateMode::default(),
        }
    }

    pub fn with_policy(mut self, policy: impl TransitionPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_candidates(mut self, mode: CandidateMode) -> Self {
        self.candidates = mode;
        self
    }

    pub fn alphabet(&self) -> &PhonemeAlphabet {
        &self.alphabet
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn candidate_mode(&self) -> CandidateMode {
        self.candidates
    }

    /// Resolve a feature name to its coefficient slot.
    pub fn resolve(&self, name: &str) -> Result<CoefficientSlot, CrfError> {
        if let Some(i) = self.features.states.iter().position(|f| f.name() == name) {
            return Ok(CoefficientSlot::State(i));
        }
        if let Some(i) = self
            .features
            .transitions
            .iter()
            .position(|f| f.name() == name)
        {
            return Ok(CoefficientSlot::Transition(i));
        }
        Err(CrfError::UnknownFeature(name.to_string()))
    }

    /// Set a coefficient by feature name. Unknown names fail.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), CrfError> {
        let slot = self.resolve(name)?;
        self.set_slot(slot, value);
        Ok(())
    }

    /// Set a coefficient through a slot obtained from `resolve` on this model.
    pub fn set_slot(&mut self, slot: CoefficientSlot, value: f64) {
        match slot {
            CoefficientSlot::State(i) => self.mu[i] = value,
            CoefficientSlot::Transition(i) => self.lambda[i] = value,
        }
    }

    pub fn coefficient(&self, name: &str) -> Result<f64, CrfError> {
        Ok(match self.resolve(name)? {
            CoefficientSlot::State(i) => self.mu[i],
            CoefficientSlot::Transition(i) => self.lambda[i],
        })
    }

    /// `(feature name, coefficient)` pairs, states first.
    pub fn coefficients(&self) -> Vec<(&'static str, f64)> {
        let states = self.features.states.iter().map(|f| f.name()).zip(&self.mu);
        let transitions = self
            .features
            .transitions
            .iter()
            .map(|f| f.name())
            .zip(&self.lambda);
        states.chain(transitions).map(|(n, &v)| (n, v)).collect()
    }

    pub fn allowed_transition(&self, prev: LabelId, next: LabelId) -> Result<bool, CrfError> {
        let prev = self.instance(prev)?;
        let next = self.instance(next)?;
        Ok(self.policy.allowed(prev, next))
    }

    /// Weighted state potential of instance `label` against `x[pos]`.
    pub fn state_value(
        &self,
        label: LabelId,
        pos: usize,
        x: &[PhonemeInstance],
    ) -> Result<f64, CrfError> {
        let candidate = self.instance(label)?;
        let target = x.get(pos).ok_or(CrfError::CellOutOfRange {
            position: pos,
            rows: x.len(),
        })?;
        Ok(self.state_of(candidate, target))
    }

    /// `score(y, x)`: the exponent of the CRF potential for one sequence.
    ///
    /// Infeasible sequences (a disallowed transition, or a label outside the
    /// candidates of its position) score `-inf`.
    pub fn score(&self, y: &[LabelId], x: &[PhonemeInstance]) -> Result<f64, CrfError> {
        if y.len() != x.len() {
            return Err(CrfError::LengthMismatch {
                labels: y.len(),
                inputs: x.len(),
            });
        }
        let bound = BoundCrf::new(self, x)?;
        for (pos, &label) in y.iter().enumerate() {
            if label >= self.alphabet.len() {
                return Err(CrfError::LabelOutOfRange {
                    label,
                    len: self.alphabet.len(),
                });
            }
            if !bound.is_candidate(pos, label) {
                return Ok(f64::NEG_INFINITY);
            }
        }

        let mut total = bound.state(y[0], 0);
        for pos in 1..y.len() {
            match bound.transition(y[pos - 1], y[pos], pos) {
                Some(v) => total += v,
                None => return Ok(f64::NEG_INFINITY),
            }
        }
        Ok(total)
    }

    /// `log Z(x)`, summed over every feasible label sequence.
    pub fn log_partition(&self, x: &[PhonemeInstance]) -> Result<f64, CrfError> {
        let _span = debug_span!("log_partition", n = x.len()).entered();
        let bound = BoundCrf::new(self, x)?;
        trellis::log_partition(&bound)
    }

    /// `Z(x)` in linear space. May overflow to infinity for long inputs;
    /// prefer `log_partition`.
    pub fn partition(&self, x: &[PhonemeInstance]) -> Result<f64, CrfError> {
        self.log_partition(x).map(f64::exp)
    }

    /// `log P(y | x) = score(y, x) - log Z(x)`. Exponentiate for a probability.
    pub fn probability_of(&self, y: &[LabelId], x: &[PhonemeInstance]) -> Result<f64, CrfError> {
        let numerator = self.score(y, x)?;
        let log_z = self.log_partition(x)?;
        Ok(numerator - log_z)
    }

    /// Highest-scoring feasible label sequence for `x`.
    pub fn best_path(&self, x: &[PhonemeInstance]) -> Result<BestPath, CrfError> {
        let _span = debug_span!("best_path", n = x.len()).entered();
        let bound = BoundCrf::new(self, x)?;
        let (score, labels) = trellis::best_path(&bound)?;
        Ok(BestPath { labels, score })
    }

    fn instance(&self, id: LabelId) -> Result<&PhonemeInstance, CrfError> {
        self.alphabet
            .phonemes()
            .get(id)
            .ok_or(CrfError::LabelOutOfRange {
                label: id,
                len: self.alphabet.len(),
            })
    }

    fn state_of(&self, candidate: &PhonemeInstance, target: &PhonemeInstance) -> f64 {
        self.features
            .states
            .iter()
            .zip(&self.mu)
            .map(|(f, &mu)| mu * f.eval(candidate, target))
            .sum()
    }

    fn transition_of(&self, prev: &PhonemeInstance, next: &PhonemeInstance) -> f64 {
        self.features
            .transitions
            .iter()
            .zip(&self.lambda)
            .map(|(f, &lambda)| lambda * f.eval(&self.alphabet, prev, next))
            .sum()
    }
}

/// A model bound to one input: candidate lists and state potentials are
/// computed once per query.
struct BoundCrf<'a> {
    crf: &'a Crf,
    x: &'a [PhonemeInstance],
    /// per-position candidates in `ByClass` mode
    by_class: Vec<&'a [LabelId]>,
    /// every label, in `All` mode
    all: Vec<LabelId>,
    /// states[pos * width + label], filled for candidates only
    states: Vec<f64>,
}

impl<'a> BoundCrf<'a> {
    fn new(crf: &'a Crf, x: &'a [PhonemeInstance]) -> Result<Self, CrfError> {
        if x.is_empty() {
            return Err(CrfError::EmptySequence);
        }
        let width = crf.alphabet.len();
        if width == 0 {
            return Err(CrfError::EmptyAlphabet);
        }

        let (by_class, all) = match crf.candidates {
            CandidateMode::ByClass => {
                let columns = x
                    .iter()
                    .enumerate()
                    .map(|(position, target)| {
                        let class = crf.alphabet.class_of(target.label);
                        if class.is_empty() {
                            Err(CrfError::UnknownLabel {
                                position,
                                label: target.label,
                            })
                        } else {
                            Ok(class)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (columns, Vec::new())
            }
            CandidateMode::All => (Vec::new(), (0..width).collect()),
        };

        let mut bound = Self {
            crf,
            x,
            by_class,
            all,
            states: vec![0.0; x.len() * width],
        };
        for pos in 0..x.len() {
            for i in 0..bound.candidates(pos).len() {
                let label = bound.candidates(pos)[i];
                let candidate = &crf.alphabet.phonemes()[label];
                bound.states[pos * width + label] = crf.state_of(candidate, &x[pos]);
            }
        }
        Ok(bound)
    }

    fn is_candidate(&self, pos: usize, label: LabelId) -> bool {
        match self.crf.candidates {
            CandidateMode::ByClass => self.crf.alphabet.phonemes()[label].label == self.x[pos].label,
            CandidateMode::All => true,
        }
    }
}

impl Potentials for BoundCrf<'_> {
    fn width(&self) -> usize {
        self.crf.alphabet.len()
    }

    fn len(&self) -> usize {
        self.x.len()
    }

    fn candidates(&self, pos: usize) -> &[LabelId] {
        match self.crf.candidates {
            CandidateMode::ByClass => self.by_class[pos],
            CandidateMode::All => &self.all,
        }
    }

    fn state(&self, label: LabelId, pos: usize) -> f64 {
        self.states[pos * self.width() + label]
    }

    fn transition(&self, prev: LabelId, next: LabelId, pos: usize) -> Option<f64> {
        let phonemes = self.crf.alphabet.phonemes();
        let (prev_inst, next_inst) = (&phonemes[prev], &phonemes[next]);
        if !self.crf.policy.allowed(prev_inst, next_inst) {
            return None;
        }
        Some(self.crf.transition_of(prev_inst, next_inst) + self.state(next, pos))
    }
}
