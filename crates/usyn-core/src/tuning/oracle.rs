use std::sync::Arc;

use tracing::debug;

use crate::alphabet::AlphabetError;
use crate::corpus::Corpus;
use crate::crf::features::l2;
use crate::crf::{Crf, CrfError};
use crate::phoneme::PhonemeInstance;

use super::comparisons::Comparisons;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("test item {index} out of range ({len} items)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("item {index}: decode failed: {source}")]
    Decode {
        index: usize,
        #[source]
        source: CrfError,
    },

    #[error("item {index}: {source}")]
    Alphabet {
        index: usize,
        #[source]
        source: AlphabetError,
    },

    #[error("item {index}: {message}")]
    Failed { index: usize, message: String },
}

/// Scores one coefficient vector against one test item.
///
/// Called concurrently from worker threads for distinct indices, each with a
/// shared snapshot of the model; implementations keep no state across
/// indices.
pub trait Oracle: Send + Sync {
    /// Number of test items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evaluate(&self, model: &Crf, index: usize) -> Result<Comparisons, OracleError>;
}

/// Decodes each test item with the model and compares the selected units'
/// cepstra against the item's own reference frames.
pub struct DecodeOracle {
    corpus: Arc<Corpus>,
}

impl DecodeOracle {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self { corpus }
    }
}

impl Oracle for DecodeOracle {
    fn len(&self) -> usize {
        self.corpus.len()
    }

    fn evaluate(&self, model: &Crf, index: usize) -> Result<Comparisons, OracleError> {
        let item = self
            .corpus
            .get(index)
            .ok_or(OracleError::IndexOutOfRange {
                index,
                len: self.corpus.len(),
            })?;
        let best = model
            .best_path(&item.input)
            .map_err(|source| OracleError::Decode { index, source })?;
        let selection = model
            .alphabet()
            .to_phonemes(&best.labels)
            .map_err(|source| OracleError::Alphabet { index, source })?;

        let distance = cepstral_distance(&selection, &item.input);
        debug!(index, file = %item.file, distance, "item scored");
        Ok(Comparisons::new(distance, 0.0))
    }
}

/// Mean Euclidean MFCC distance over reference frames.
///
/// Units are paired position by position. Each reference frame is matched
/// to the selected unit's frame at the same relative time, so units of
/// different lengths compare frame-aligned. Units without frames on either
/// side are skipped; with no comparable frames at all the distance is 0.
pub fn cepstral_distance(selected: &[PhonemeInstance], reference: &[PhonemeInstance]) -> f64 {
    let mut total = 0.0;
    let mut frames = 0usize;
    for (sel, target) in selected.iter().zip(reference) {
        let (s, m) = (sel.frames.len(), target.frames.len());
        if s == 0 || m == 0 {
            continue;
        }
        for (k, frame) in target.frames.iter().enumerate() {
            let aligned = &sel.frames[k * s / m];
            total += l2(&aligned.mfcc, &frame.mfcc);
        }
        frames += m;
    }
    if frames == 0 {
        0.0
    } else {
        total / frames as f64
    }
}
