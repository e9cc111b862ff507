//! Coefficient tuning: search space, value cache, worker pool, evaluation
//! oracle and the search controller that drives them.

mod cache;
mod comparisons;
mod oracle;
mod pool;
mod range;
mod search;
mod trace;

#[cfg(test)]
mod tests;

pub use cache::{CacheEntry, CacheError, ValueCache};
pub use comparisons::{Aggregation, Comparisons, Metric};
pub use oracle::{cepstral_distance, DecodeOracle, Oracle, OracleError};
pub use pool::{PoolError, WorkerPool};
pub use range::{Range, RangeError, Ranges};
pub use search::{
    FailurePolicy, SearchController, SearchError, SearchOptions, Strategy, TrainingOutput,
};
pub use trace::{ColumnStats, TraceError, TraceStats, TraceWriter, VALUE_COLUMN};
