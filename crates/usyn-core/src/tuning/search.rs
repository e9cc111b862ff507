//! Search controller: walks the coefficient grid, fans each uncached point
//! out to the worker pool, and keeps the best configuration seen.
//!
//! The controller is the only writer of the model, the ranges and the cache.
//! For each point it installs the coefficients, freezes an `Arc` snapshot of
//! the model, submits one job per test item, and blocks until every job has
//! reported (or died) before touching shared state again.

use std::io;
use std::sync::{mpsc, Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, info, warn};

use crate::crf::Crf;
use crate::settings::SearchSettings;

use super::cache::{CacheError, ValueCache};
use super::comparisons::{Aggregation, Comparisons, Metric};
use super::oracle::{Oracle, OracleError};
use super::pool::{PoolError, WorkerPool};
use super::range::{RangeError, Ranges};
use super::trace::TraceWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Sweep one dimension at a time, fixing its best value before the next.
    #[default]
    Coordinate,
    /// Visit every point of the Cartesian grid, dimension 0 fastest.
    Grid,
}

/// What a failing test item does to its grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// The point fails and the search stops with the item's error.
    #[default]
    Abort,
    /// The item is left out of the aggregate with a warning.
    Exclude,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub strategy: Strategy,
    pub passes: usize,
    pub max_iterations: Option<usize>,
    pub metric: Metric,
    pub aggregate: Aggregation,
    pub on_item_failure: FailurePolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            passes: 1,
            max_iterations: None,
            metric: Metric::default(),
            aggregate: Aggregation::default(),
            on_item_failure: FailurePolicy::default(),
        }
    }
}

impl From<&SearchSettings> for SearchOptions {
    fn from(s: &SearchSettings) -> Self {
        Self {
            strategy: s.strategy,
            passes: s.passes,
            max_iterations: s.max_iterations,
            metric: s.metric,
            aggregate: s.aggregate,
            on_item_failure: s.on_item_failure,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("test corpus is empty")]
    EmptyCorpus,

    #[error("evaluation at {point:?} failed: {source}")]
    Item {
        point: Vec<f64>,
        #[source]
        source: OracleError,
    },

    #[error("every test item failed at {point:?}")]
    AllItemsFailed { point: Vec<f64> },

    #[error("{lost} of {expected} evaluation jobs never reported at {point:?}")]
    LostJobs {
        point: Vec<f64>,
        expected: usize,
        lost: usize,
    },

    #[error("trace write failed: {0}")]
    Trace(#[source] io::Error),

    #[error("search ended without evaluating any point")]
    NoResult,
}

/// Outcome of a finished search.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutput {
    /// Best value per dimension, by feature name, in range order.
    pub best: Vec<(String, f64)>,
    pub comparisons: Comparisons,
    /// Points visited, cache hits included.
    pub iterations: usize,
    /// Points sent to the oracle.
    pub evaluations: usize,
    pub cache_hits: usize,
}

impl TrainingOutput {
    pub fn best_values(&self) -> Vec<f64> {
        self.best.iter().map(|(_, v)| *v).collect()
    }
}

struct Best {
    indices: Vec<usize>,
    result: Comparisons,
}

pub struct SearchController {
    model: Crf,
    ranges: Ranges,
    cache: ValueCache,
    pool: WorkerPool,
    oracle: Arc<dyn Oracle>,
    options: SearchOptions,
    trace: Option<TraceWriter>,
    best: Option<Best>,
    iterations: usize,
    evaluations: usize,
    cache_hits: usize,
}

impl SearchController {
    /// Fails before any search work when the cache was opened for another
    /// dimensionality or the oracle has no items.
    pub fn new(
        model: Crf,
        ranges: Ranges,
        cache: ValueCache,
        pool: WorkerPool,
        oracle: Arc<dyn Oracle>,
        options: SearchOptions,
    ) -> Result<Self, SearchError> {
        if cache.dims() != ranges.len() {
            return Err(CacheError::DimensionMismatch {
                path: cache.path().to_path_buf(),
                expected: ranges.len(),
                found: cache.dims(),
            }
            .into());
        }
        if oracle.is_empty() {
            return Err(SearchError::EmptyCorpus);
        }
        Ok(Self {
            model,
            ranges,
            cache,
            pool,
            oracle,
            options,
            trace: None,
            best: None,
            iterations: 0,
            evaluations: 0,
            cache_hits: 0,
        })
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn model(&self) -> &Crf {
        &self.model
    }

    pub fn ranges(&self) -> &Ranges {
        &self.ranges
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Run the configured strategy, then install the best point into the
    /// ranges and the model.
    pub fn run(&mut self) -> Result<TrainingOutput, SearchError> {
        info!(
            strategy = ?self.options.strategy,
            passes = self.options.passes,
            dims = self.ranges.len(),
            items = self.oracle.len(),
            threads = self.pool.threads(),
            "search started"
        );
        self.ranges.reset_to_start();
        match self.options.strategy {
            Strategy::Coordinate => self.coordinate_descent()?,
            Strategy::Grid => self.grid_walk()?,
        }

        let best = self.best.as_ref().ok_or(SearchError::NoResult)?;
        let comparisons = best.result;
        self.ranges.restore(&best.indices);
        self.ranges.install(&mut self.model);

        let output = TrainingOutput {
            best: self
                .ranges
                .iter()
                .map(|r| (r.name().to_string(), r.value()))
                .collect(),
            comparisons,
            iterations: self.iterations,
            evaluations: self.evaluations,
            cache_hits: self.cache_hits,
        };
        info!(
            best = ?output.best,
            score = comparisons.value(self.options.metric),
            iterations = output.iterations,
            evaluations = output.evaluations,
            cache_hits = output.cache_hits,
            "search finished"
        );
        Ok(output)
    }

    fn budget_left(&self) -> bool {
        self.options
            .max_iterations
            .map_or(true, |max| self.iterations < max)
    }

    fn coordinate_descent(&mut self) -> Result<(), SearchError> {
        for pass in 1..=self.options.passes {
            info!(pass, "coordinate descent pass");
            for dim in 0..self.ranges.len() {
                // Dimension 0 keeps its start value through the first pass.
                if pass == 1 && dim == 0 && self.ranges.len() > 1 {
                    continue;
                }
                if !self.sweep(dim)? {
                    info!(iterations = self.iterations, "iteration limit reached");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Sweep `dim` over its whole range and leave it at its best value.
    /// Returns false when the iteration budget ran out mid-sweep.
    fn sweep(&mut self, dim: usize) -> Result<bool, SearchError> {
        let metric = self.options.metric;
        let mut dim_best: Option<(usize, Comparisons)> = None;
        let mut completed = true;

        self.ranges[dim].reset();
        loop {
            if !self.budget_left() {
                completed = false;
                break;
            }
            let result = self.visit()?;
            let index = self.ranges[dim].index();
            if dim_best.map_or(true, |(_, b)| result.better_than(&b, metric)) {
                dim_best = Some((index, result));
            }
            if !self.ranges[dim].advance() {
                break;
            }
        }

        match dim_best {
            Some((index, result)) => {
                let range = &mut self.ranges[dim];
                range.set_index(index);
                info!(
                    dim = range.name(),
                    value = range.value(),
                    score = result.value(metric),
                    "dimension fixed"
                );
            }
            None => self.ranges[dim].reset_to_start(),
        }
        Ok(completed)
    }

    fn grid_walk(&mut self) -> Result<(), SearchError> {
        for pass in 1..=self.options.passes {
            info!(pass, "grid pass");
            for dim in 0..self.ranges.len() {
                self.ranges[dim].reset();
            }
            loop {
                if !self.budget_left() {
                    info!(iterations = self.iterations, "iteration limit reached");
                    return Ok(());
                }
                self.visit()?;
                if !self.odometer_step() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Advance the odometer by one point. Returns false on carry out of the
    /// last dimension, i.e. when the pass is complete.
    fn odometer_step(&mut self) -> bool {
        for dim in 0..self.ranges.len() {
            if self.ranges[dim].advance() {
                return true;
            }
            self.ranges[dim].reset();
        }
        false
    }

    /// Score the current point through the cache or the oracle, trace it,
    /// and track the global best.
    fn visit(&mut self) -> Result<Comparisons, SearchError> {
        self.iterations += 1;
        let values = self.ranges.values();
        let result = match self.cache.lookup(&values) {
            Some(hit) => {
                self.cache_hits += 1;
                debug!(?values, "cache hit");
                hit
            }
            None => {
                let result = self.evaluate_point(&values)?;
                self.evaluations += 1;
                self.cache.insert(values.clone(), result);
                self.cache.persist()?;
                result
            }
        };

        let metric = self.options.metric;
        if let Some(trace) = self.trace.as_mut() {
            trace
                .append(&values, result.value(metric))
                .map_err(SearchError::Trace)?;
        }

        let improved = self
            .best
            .as_ref()
            .map_or(true, |b| result.better_than(&b.result, metric));
        if improved {
            info!(
                ?values,
                score = result.value(metric),
                iteration = self.iterations,
                "new best"
            );
            self.best = Some(Best {
                indices: self.ranges.indices(),
                result,
            });
        }
        Ok(result)
    }

    /// Fan one job per test item out to the pool and fold the results.
    fn evaluate_point(&mut self, values: &[f64]) -> Result<Comparisons, SearchError> {
        let n = self.oracle.len();
        let _span = debug_span!("evaluate", ?values, items = n).entered();

        self.ranges.install(&mut self.model);
        let snapshot = Arc::new(self.model.clone());

        let (tx, rx) = mpsc::channel();
        for index in 0..n {
            let tx = tx.clone();
            let model = Arc::clone(&snapshot);
            let oracle = Arc::clone(&self.oracle);
            self.pool.submit(move || {
                let result = oracle.evaluate(&model, index);
                // receiver outlives every job of this point
                let _ = tx.send((index, result));
            })?;
        }
        drop(tx);

        let mut slots: Vec<Option<Result<Comparisons, OracleError>>> =
            (0..n).map(|_| None).collect();
        for (index, result) in rx.iter() {
            slots[index] = Some(result);
        }

        let lost = slots.iter().filter(|s| s.is_none()).count();
        if lost > 0 {
            return Err(SearchError::LostJobs {
                point: values.to_vec(),
                expected: n,
                lost,
            });
        }

        let mut items = Vec::with_capacity(n);
        for result in slots.into_iter().flatten() {
            match result {
                Ok(c) => items.push(c),
                Err(e) => match self.options.on_item_failure {
                    FailurePolicy::Abort => {
                        return Err(SearchError::Item {
                            point: values.to_vec(),
                            source: e,
                        })
                    }
                    FailurePolicy::Exclude => {
                        warn!(?values, error = %e, "item excluded from aggregate");
                    }
                },
            }
        }

        let aggregate = self
            .options
            .aggregate
            .aggregate(&items, self.options.metric)
            .ok_or_else(|| SearchError::AllItemsFailed {
                point: values.to_vec(),
            })?;
        debug!(
            score = aggregate.value(self.options.metric),
            scored = items.len(),
            "point evaluated"
        );
        Ok(aggregate)
    }
}
