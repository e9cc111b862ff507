use tracing::{debug, debug_span};

use crate::phoneme::LabelId;

use super::CrfError;

/// Potentials of one CRF bound to one input sequence, as seen by the trellis.
pub(crate) trait Potentials {
    /// Table width: number of labels in the alphabet.
    fn width(&self) -> usize;
    /// Sequence length.
    fn len(&self) -> usize;
    /// Labels a position may take, ascending.
    fn candidates(&self, pos: usize) -> &[LabelId];
    /// Weighted state potential of `label` at `pos`.
    fn state(&self, label: LabelId, pos: usize) -> f64;
    /// Weighted transition potential into `next` at `pos`, plus the state
    /// potential of `next`. `None` when the transition is not allowed.
    fn transition(&self, prev: LabelId, next: LabelId, pos: usize) -> Option<f64>;
}

/// How a cell combines the scores of its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Semiring {
    /// log Σ exp(..): partition function.
    LogSum,
    /// max(..): Viterbi decoding.
    Max,
}

/// Running combination over one cell's successors.
///
/// For `LogSum`, `value` holds the running maximum and `scale` the sum of
/// `exp(v - value)`, so nothing is exponentiated above zero.
struct Accumulator {
    semiring: Semiring,
    value: f64,
    scale: f64,
    arg: Option<LabelId>,
}

impl Accumulator {
    fn new(semiring: Semiring) -> Self {
        Self {
            semiring,
            value: f64::NEG_INFINITY,
            scale: 0.0,
            arg: None,
        }
    }

    /// Add the score of successor `label` at `position`. `-inf` means the
    /// path is impossible and is skipped; NaN and `+inf` are defects.
    fn push(&mut self, v: f64, label: LabelId, position: usize) -> Result<(), CrfError> {
        if v.is_nan() || v == f64::INFINITY {
            return Err(CrfError::InvalidPotential {
                position,
                label,
                value: v,
            });
        }
        if v == f64::NEG_INFINITY {
            return Ok(());
        }
        match self.semiring {
            Semiring::Max => {
                // strict: ties keep the lowest label
                if self.arg.is_none() || v > self.value {
                    self.value = v;
                    self.arg = Some(label);
                }
            }
            Semiring::LogSum => {
                if self.arg.is_none() {
                    self.value = v;
                    self.scale = 1.0;
                    self.arg = Some(label);
                } else if v > self.value {
                    self.scale = self.scale * (self.value - v).exp() + 1.0;
                    self.value = v;
                    self.arg = Some(label);
                } else {
                    self.scale += (v - self.value).exp();
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> (f64, Option<LabelId>) {
        match (self.semiring, self.arg) {
            (_, None) => (f64::NEG_INFINITY, None),
            (Semiring::Max, arg) => (self.value, arg),
            (Semiring::LogSum, arg) => (self.value + self.scale.ln(), arg),
        }
    }
}

/// Dense `(position, label)` table with checked access.
struct Table<T> {
    rows: usize,
    width: usize,
    cells: Vec<T>,
}

impl<T: Copy> Table<T> {
    fn new(rows: usize, width: usize, fill: T) -> Self {
        Self {
            rows,
            width,
            cells: vec![fill; rows * width],
        }
    }

    fn index(&self, pos: usize, label: LabelId) -> Result<usize, CrfError> {
        if pos >= self.rows {
            return Err(CrfError::CellOutOfRange {
                position: pos,
                rows: self.rows,
            });
        }
        if label >= self.width {
            return Err(CrfError::LabelOutOfRange {
                label,
                len: self.width,
            });
        }
        Ok(pos * self.width + label)
    }

    fn get(&self, pos: usize, label: LabelId) -> Result<T, CrfError> {
        let idx = self.index(pos, label)?;
        Ok(self.cells[idx])
    }

    fn set(&mut self, pos: usize, label: LabelId, value: T) -> Result<(), CrfError> {
        let idx = self.index(pos, label)?;
        self.cells[idx] = value;
        Ok(())
    }
}

/// A filled trellis. `cells[(k, i)]` is the combined score of every suffix
/// that starts with label `i` at position `k`, excluding the state potential
/// of `i` itself; `root` folds in the state potentials of position 0.
struct Trellis {
    root: f64,
    root_label: LabelId,
    successors: Option<Table<Option<LabelId>>>,
}

fn fill(p: &dyn Potentials, semiring: Semiring) -> Result<Trellis, CrfError> {
    let n = p.len();
    let width = p.width();
    let _span = debug_span!("trellis", ?semiring, n, width).entered();
    if n == 0 {
        return Err(CrfError::EmptySequence);
    }
    if width == 0 {
        return Err(CrfError::EmptyAlphabet);
    }

    let mut cells = Table::new(n, width, f64::NEG_INFINITY);
    let mut successors = (semiring == Semiring::Max).then(|| Table::new(n, width, None));

    // Terminal column: the empty suffix scores 0
    if p.candidates(n - 1).is_empty() {
        return Err(CrfError::NoFeasiblePath { position: n - 1 });
    }
    for &j in p.candidates(n - 1) {
        cells.set(n - 1, j, 0.0)?;
    }

    for k in (0..n - 1).rev() {
        let mut alive = false;
        for &i in p.candidates(k) {
            let mut acc = Accumulator::new(semiring);
            for &j in p.candidates(k + 1) {
                let child = cells.get(k + 1, j)?;
                if child == f64::NEG_INFINITY {
                    continue;
                }
                if let Some(t) = p.transition(i, j, k + 1) {
                    acc.push(t + child, j, k + 1)?;
                }
            }
            let (value, arg) = acc.finish();
            cells.set(k, i, value)?;
            if let Some(s) = successors.as_mut() {
                s.set(k, i, arg)?;
            }
            alive |= value > f64::NEG_INFINITY;
        }
        if !alive {
            return Err(CrfError::NoFeasiblePath { position: k });
        }
    }

    let mut acc = Accumulator::new(semiring);
    for &i in p.candidates(0) {
        acc.push(cells.get(0, i)? + p.state(i, 0), i, 0)?;
    }
    let (root, root_label) = acc.finish();
    let root_label = root_label.ok_or(CrfError::NoFeasiblePath { position: 0 })?;
    debug!(root, root_label);

    Ok(Trellis {
        root,
        root_label,
        successors,
    })
}

/// `log Z`: log-sum-exp of every feasible sequence score.
pub(crate) fn log_partition(p: &dyn Potentials) -> Result<f64, CrfError> {
    fill(p, Semiring::LogSum).map(|t| t.root)
}

/// Best score and the label sequence that reaches it.
pub(crate) fn best_path(p: &dyn Potentials) -> Result<(f64, Vec<LabelId>), CrfError> {
    let trellis = fill(p, Semiring::Max)?;
    let successors = trellis
        .successors
        .as_ref()
        .ok_or(CrfError::NoFeasiblePath { position: 0 })?;

    let n = p.len();
    let mut labels = Vec::with_capacity(n);
    labels.push(trellis.root_label);
    for k in 0..n - 1 {
        let next = successors
            .get(k, labels[k])?
            .ok_or(CrfError::NoFeasiblePath { position: k })?;
        labels.push(next);
    }
    debug_assert_eq!(labels.len(), n);
    Ok((trellis.root, labels))
}
