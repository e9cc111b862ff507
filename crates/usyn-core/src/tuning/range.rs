use std::ops::{Index, IndexMut};

use crate::crf::{CoefficientSlot, Crf, CrfError};
use crate::settings::RangeSpec;

/// Upper bound on grid points per dimension.
const MAX_POINTS: f64 = 1e7;
/// Slack when counting grid points, so `to` survives float rounding.
const GRID_EPS: f64 = 1e-9;

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("no ranges configured")]
    Empty,

    #[error("range {feature}: step must be positive and finite (got {step})")]
    BadStep { feature: String, step: f64 },

    #[error("range {feature}: from ({from}) is greater than to ({to})")]
    Inverted { feature: String, from: f64, to: f64 },

    #[error("range {feature}: bounds must be finite")]
    NonFinite { feature: String },

    #[error("range {feature}: {points} grid points is too many")]
    TooManyPoints { feature: String, points: f64 },

    #[error("range {feature}: start {start} is not a grid value")]
    OffGrid { feature: String, start: f64 },

    #[error("range {0} configured twice")]
    Duplicate(String),

    #[error("range {feature}: {source}")]
    Feature {
        feature: String,
        #[source]
        source: CrfError,
    },
}

/// One searched dimension. The current value is always `from + index * step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    name: String,
    slot: CoefficientSlot,
    from: f64,
    to: f64,
    step: f64,
    points: usize,
    start: usize,
    index: usize,
}

impl Range {
    pub fn new(spec: &RangeSpec, slot: CoefficientSlot) -> Result<Self, RangeError> {
        let feature = || spec.feature.clone();
        if !(spec.from.is_finite() && spec.to.is_finite()) {
            return Err(RangeError::NonFinite { feature: feature() });
        }
        if !(spec.step.is_finite() && spec.step > 0.0) {
            return Err(RangeError::BadStep {
                feature: feature(),
                step: spec.step,
            });
        }
        if spec.from > spec.to {
            return Err(RangeError::Inverted {
                feature: feature(),
                from: spec.from,
                to: spec.to,
            });
        }
        let span = ((spec.to - spec.from) / spec.step + GRID_EPS).floor();
        if span + 1.0 > MAX_POINTS {
            return Err(RangeError::TooManyPoints {
                feature: feature(),
                points: span + 1.0,
            });
        }

        let mut range = Self {
            name: spec.feature.clone(),
            slot,
            from: spec.from,
            to: spec.to,
            step: spec.step,
            points: span as usize + 1,
            start: 0,
            index: 0,
        };
        if let Some(start) = spec.start {
            range.start = range.index_of(start).ok_or(RangeError::OffGrid {
                feature: feature(),
                start,
            })?;
            range.index = range.start;
        }
        Ok(range)
    }

    /// Grid index of `value`, if it is one of this range's grid values.
    fn index_of(&self, value: f64) -> Option<usize> {
        let raw = (value - self.from) / self.step;
        let index = raw.round();
        if index < 0.0 || index >= self.points as f64 {
            return None;
        }
        let on_grid = (self.value_at(index as usize) - value).abs() <= GRID_EPS * value.abs().max(1.0);
        on_grid.then_some(index as usize)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> CoefficientSlot {
        self.slot
    }

    pub fn from(&self) -> f64 {
        self.from
    }

    pub fn to(&self) -> f64 {
        self.to
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of grid values, `to` included when it lies on the grid.
    pub fn points(&self) -> usize {
        self.points
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> f64 {
        self.value_at(self.index)
    }

    pub fn value_at(&self, index: usize) -> f64 {
        self.from + index as f64 * self.step
    }

    /// Back to `from`.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Back to the configured start value (`from` when none was given).
    pub fn reset_to_start(&mut self) {
        self.index = self.start;
    }

    /// Move one step. Returns false, without moving, past the last grid value.
    pub fn advance(&mut self) -> bool {
        if self.index + 1 < self.points {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Indices beyond the grid clamp to the last value.
    pub fn set_index(&mut self, index: usize) {
        self.index = index.min(self.points - 1);
    }
}

/// The search space: one `Range` per tuned coefficient, in configured order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranges {
    dims: Vec<Range>,
}

impl Ranges {
    /// Build from configuration, resolving every feature name against `crf`
    /// once.
    pub fn from_specs(specs: &[RangeSpec], crf: &Crf) -> Result<Self, RangeError> {
        if specs.is_empty() {
            return Err(RangeError::Empty);
        }
        let mut dims: Vec<Range> = Vec::with_capacity(specs.len());
        for spec in specs {
            if dims.iter().any(|d| d.name == spec.feature) {
                return Err(RangeError::Duplicate(spec.feature.clone()));
            }
            let slot = crf
                .resolve(&spec.feature)
                .map_err(|source| RangeError::Feature {
                    feature: spec.feature.clone(),
                    source,
                })?;
            dims.push(Range::new(spec, slot)?);
        }
        Ok(Self { dims })
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn get(&self, dim: usize) -> Option<&Range> {
        self.dims.get(dim)
    }

    pub fn get_mut(&mut self, dim: usize) -> Option<&mut Range> {
        self.dims.get_mut(dim)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.dims.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.dims.iter().map(|d| d.name.clone()).collect()
    }

    /// Current value of every dimension: the cache key.
    pub fn values(&self) -> Vec<f64> {
        self.dims.iter().map(Range::value).collect()
    }

    /// Current grid index of every dimension.
    pub fn indices(&self) -> Vec<usize> {
        self.dims.iter().map(Range::index).collect()
    }

    pub fn restore(&mut self, indices: &[usize]) {
        for (dim, &i) in self.dims.iter_mut().zip(indices) {
            dim.set_index(i);
        }
    }

    pub fn reset_to_start(&mut self) {
        for dim in &mut self.dims {
            dim.reset_to_start();
        }
    }

    /// Write every dimension's current value into the model.
    pub fn install(&self, crf: &mut Crf) {
        for dim in &self.dims {
            crf.set_slot(dim.slot, dim.value());
        }
    }

    /// Total grid points, `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.points))
    }
}

impl Index<usize> for Ranges {
    type Output = Range;

    fn index(&self, dim: usize) -> &Range {
        &self.dims[dim]
    }
}

impl IndexMut<usize> for Ranges {
    fn index_mut(&mut self, dim: usize) -> &mut Range {
        &mut self.dims[dim]
    }
}
