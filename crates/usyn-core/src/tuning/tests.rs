use std::path::Path;
use std::sync::{Arc, Mutex};

use super::*;
use crate::alphabet::PhonemeAlphabet;
use crate::crf::{Crf, FeatureSet};
use crate::settings::RangeSpec;

fn model() -> Crf {
    Crf::new(Arc::new(PhonemeAlphabet::default()), FeatureSet::phonetic())
}

fn spec(feature: &str, from: f64, to: f64, step: f64) -> RangeSpec {
    RangeSpec {
        feature: feature.to_string(),
        from,
        to,
        step,
        start: None,
    }
}

fn ranges(specs: &[RangeSpec]) -> Ranges {
    Ranges::from_specs(specs, &model()).unwrap()
}

/// Separable bowl with its minimum at trans-ctx = 3, trans-pitch = 7.
/// Records the point seen by item 0 of every fresh evaluation.
struct Bowl {
    items: usize,
    seen: Mutex<Vec<Vec<f64>>>,
}

impl Bowl {
    fn new(items: usize) -> Arc<Self> {
        Arc::new(Self {
            items,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Vec<f64>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Oracle for Bowl {
    fn len(&self) -> usize {
        self.items
    }

    fn evaluate(&self, model: &Crf, index: usize) -> Result<Comparisons, OracleError> {
        let ctx = model.coefficient("trans-ctx").unwrap();
        let pitch = model.coefficient("trans-pitch").unwrap();
        if index == 0 {
            self.seen.lock().unwrap().push(vec![ctx, pitch]);
        }
        let d = (ctx - 3.0).powi(2) + (pitch - 7.0).powi(2);
        Ok(Comparisons::new(d, 0.0))
    }
}

/// Item `index` scores `index + 1`; items listed in `failing` fail, and
/// `panicking` ones panic.
struct Items {
    items: usize,
    failing: Vec<usize>,
    panicking: Vec<usize>,
}

impl Oracle for Items {
    fn len(&self) -> usize {
        self.items
    }

    fn evaluate(&self, _model: &Crf, index: usize) -> Result<Comparisons, OracleError> {
        if self.panicking.contains(&index) {
            panic!("oracle crashed on item {index}");
        }
        if self.failing.contains(&index) {
            return Err(OracleError::Failed {
                index,
                message: "synthesis failed".into(),
            });
        }
        Ok(Comparisons::new(index as f64 + 1.0, 0.0))
    }
}

fn controller(
    ranges: Ranges,
    cache_path: &Path,
    oracle: Arc<dyn Oracle>,
    options: SearchOptions,
) -> SearchController {
    let cache = ValueCache::open(cache_path, ranges.len()).unwrap();
    let pool = WorkerPool::initialize(3).unwrap();
    SearchController::new(model(), ranges, cache, pool, oracle, options).unwrap()
}

fn grid_3x3() -> Ranges {
    ranges(&[
        spec("trans-ctx", 1.0, 3.0, 1.0),
        spec("trans-pitch", 10.0, 30.0, 10.0),
    ])
}

// --- value cache ---------------------------------------------------------

#[test]
fn test_cache_single_entry_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("value-cache.bin");
    let mut bytes = 1u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&2u32.to_le_bytes());
    for v in [1.0f64, 2.0, 0.0, 3.5] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(&path, bytes).unwrap();

    let cache = ValueCache::open(&path, 2).unwrap();
    let mut r = ranges(&[
        spec("trans-ctx", 1.0, 1.0, 1.0),
        spec("trans-pitch", 2.0, 2.1, 0.1),
    ]);
    assert_eq!(r.values(), vec![1.0, 2.0]);
    let hit = cache.load(&r).unwrap();
    assert_eq!(hit.log_spectrum, 3.5);

    assert!(r[1].advance());
    assert_eq!(r.values(), vec![1.0, 2.0 + 0.1]);
    assert_eq!(cache.load(&r), None);
    assert_eq!(cache.lookup(&[1.0, 2.1]), None);
}

#[test]
fn test_cache_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    let mut r = grid_3x3();
    let result = Comparisons::new(0.123456789, 4.5);

    let mut cache = ValueCache::open(&path, 2).unwrap();
    assert!(cache.is_empty());
    r[0].advance();
    cache.save(&r, result);
    cache.persist().unwrap();
    assert!(!path.with_extension("tmp").exists());

    let reopened = ValueCache::open(&path, 2).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.load(&r), Some(result));
    assert_eq!(reopened.entries(), cache.entries());
    assert_eq!(std::fs::read(&path).unwrap(), cache.to_bytes());
}

#[test]
fn test_cache_tolerates_short_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let missing = ValueCache::open(&dir.path().join("nope.bin"), 2).unwrap();
    assert!(missing.is_empty());

    let short = dir.path().join("short.bin");
    std::fs::write(&short, [3u8, 0]).unwrap();
    assert!(ValueCache::open(&short, 2).unwrap().is_empty());

    let truncated = dir.path().join("truncated.bin");
    let mut bytes = 2u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&1.0f64.to_le_bytes());
    std::fs::write(&truncated, bytes).unwrap();
    assert!(ValueCache::open(&truncated, 2).unwrap().is_empty());
}

#[test]
fn test_cache_missing_last_word_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.bin");
    let mut cache = ValueCache::new(&path, 2);
    cache.insert(vec![1.0, 2.0], Comparisons::new(3.5, 0.0));
    cache.persist().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

    let reopened = ValueCache::open(&path, 2).unwrap();
    assert!(reopened.is_empty());
}

#[test]
fn test_cache_dimension_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    let mut cache = ValueCache::new(&path, 3);
    cache.insert(vec![1.0, 2.0, 3.0], Comparisons::new(1.0, 0.0));
    cache.persist().unwrap();

    let err = ValueCache::open(&path, 2).err().unwrap();
    match &err {
        CacheError::DimensionMismatch {
            path: p,
            expected,
            found,
        } => {
            assert_eq!(p, &path);
            assert_eq!((*expected, *found), (2, 3));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("cache.bin"));
}

// --- search controller ---------------------------------------------------

#[test]
fn test_controller_rejects_mismatched_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ValueCache::new(&dir.path().join("c.bin"), 3);
    let pool = WorkerPool::initialize(1).unwrap();
    let result = SearchController::new(
        model(),
        grid_3x3(),
        cache,
        pool,
        Bowl::new(1),
        SearchOptions::default(),
    );
    assert!(matches!(
        result.err(),
        Some(SearchError::Cache(CacheError::DimensionMismatch {
            expected: 2,
            found: 3,
            ..
        }))
    ));
}

#[test]
fn test_controller_rejects_empty_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ValueCache::new(&dir.path().join("c.bin"), 2);
    let pool = WorkerPool::initialize(1).unwrap();
    let result = SearchController::new(
        model(),
        grid_3x3(),
        cache,
        pool,
        Bowl::new(0),
        SearchOptions::default(),
    );
    assert!(matches!(result.err(), Some(SearchError::EmptyCorpus)));
}

#[test]
fn test_coordinate_descent_converges() {
    let dir = tempfile::tempdir().unwrap();
    let bowl = Bowl::new(2);
    let mut search = controller(
        ranges(&[
            spec("trans-ctx", 0.0, 10.0, 1.0),
            spec("trans-pitch", 0.0, 10.0, 1.0),
        ]),
        &dir.path().join("cache.bin"),
        bowl.clone(),
        SearchOptions {
            strategy: Strategy::Coordinate,
            passes: 2,
            ..SearchOptions::default()
        },
    );
    let out = search.run().unwrap();

    assert_eq!(
        out.best,
        vec![("trans-ctx".to_string(), 3.0), ("trans-pitch".to_string(), 7.0)]
    );
    assert_eq!(out.comparisons.log_spectrum, 0.0);
    assert_eq!(search.model().coefficient("trans-ctx").unwrap(), 3.0);
    assert_eq!(search.model().coefficient("trans-pitch").unwrap(), 7.0);

    // pass 1 sweeps trans-pitch only; pass 2 sweeps both
    assert_eq!(out.iterations, 33);
    assert_eq!(out.cache_hits, 2);
    assert_eq!(out.evaluations, 31);
    assert_eq!(bowl.seen().len(), 31);
    // trans-ctx held at its start value through pass 1
    assert!(bowl.seen()[..11].iter().all(|p| p[0] == 0.0));
}

#[test]
fn test_coordinate_descent_honours_start_value() {
    let dir = tempfile::tempdir().unwrap();
    let bowl = Bowl::new(1);
    let mut ctx = spec("trans-ctx", 0.0, 10.0, 1.0);
    ctx.start = Some(3.0);
    let mut search = controller(
        ranges(&[ctx, spec("trans-pitch", 0.0, 10.0, 1.0)]),
        &dir.path().join("cache.bin"),
        bowl.clone(),
        SearchOptions {
            passes: 1,
            ..SearchOptions::default()
        },
    );
    let out = search.run().unwrap();
    assert_eq!(out.best_values(), vec![3.0, 7.0]);
    assert_eq!(out.iterations, 11);
}

#[test]
fn test_grid_walk_visits_each_point_once_per_pass() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.csv");
    let bowl = Bowl::new(1);
    let r = grid_3x3();
    let trace = TraceWriter::create(&trace_path, &r.names()).unwrap();
    let mut search = controller(
        r,
        &dir.path().join("cache.bin"),
        bowl.clone(),
        SearchOptions {
            strategy: Strategy::Grid,
            passes: 2,
            ..SearchOptions::default()
        },
    )
    .with_trace(trace);
    let out = search.run().unwrap();

    let expected: Vec<Vec<f64>> = [10.0, 20.0, 30.0]
        .iter()
        .flat_map(|&b| [1.0, 2.0, 3.0].map(|a| vec![a, b]))
        .collect();
    assert_eq!(bowl.seen(), expected);

    assert_eq!(out.iterations, 18);
    assert_eq!(out.evaluations, 9);
    assert_eq!(out.cache_hits, 9);
    // closest grid point to (3, 7)
    assert_eq!(out.best_values(), vec![3.0, 10.0]);

    let text = std::fs::read_to_string(&trace_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "trans-ctx,trans-pitch,value");
    assert_eq!(lines.len(), 1 + 18);
    assert_eq!(lines[1], "1,10,13");
    assert_eq!(&lines[1..10], &lines[10..19]);
}

#[test]
fn test_iteration_limit_stops_search() {
    let dir = tempfile::tempdir().unwrap();
    let mut search = controller(
        grid_3x3(),
        &dir.path().join("cache.bin"),
        Bowl::new(1),
        SearchOptions {
            strategy: Strategy::Grid,
            passes: 5,
            max_iterations: Some(4),
            ..SearchOptions::default()
        },
    );
    let out = search.run().unwrap();
    assert_eq!(out.iterations, 4);
    assert_eq!(out.evaluations, 4);
}

#[test]
fn test_every_evaluation_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    let options = SearchOptions {
        strategy: Strategy::Grid,
        ..SearchOptions::default()
    };

    let mut first = controller(grid_3x3(), &path, Bowl::new(2), options.clone());
    let out = first.run().unwrap();
    assert_eq!(out.evaluations, 9);
    assert_eq!(ValueCache::open(&path, 2).unwrap().len(), 9);

    let bowl = Bowl::new(2);
    let mut second = controller(grid_3x3(), &path, bowl.clone(), options);
    let again = second.run().unwrap();
    assert_eq!(again.evaluations, 0);
    assert_eq!(again.cache_hits, 9);
    assert!(bowl.seen().is_empty());
    assert_eq!(again.best, out.best);
    assert_eq!(again.comparisons, out.comparisons);
}

#[test]
fn test_aggregate_modes() {
    let dir = tempfile::tempdir().unwrap();
    let single = || ranges(&[spec("trans-ctx", 1.0, 1.0, 1.0)]);
    let run = |aggregate: Aggregation, name: &str| {
        let oracle = Arc::new(Items {
            items: 4,
            failing: Vec::new(),
            panicking: Vec::new(),
        });
        let mut search = controller(
            single(),
            &dir.path().join(name),
            oracle,
            SearchOptions {
                aggregate,
                ..SearchOptions::default()
            },
        );
        search.run().unwrap().comparisons.log_spectrum
    };
    assert_eq!(run(Aggregation::Sum, "sum.bin"), 10.0);
    assert_eq!(run(Aggregation::Mean, "mean.bin"), 2.5);
    assert_eq!(run(Aggregation::Worst, "worst.bin"), 4.0);
}

#[test]
fn test_abort_policy_reports_first_failing_item() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(Items {
        items: 5,
        failing: vec![3, 1],
        panicking: Vec::new(),
    });
    let mut search = controller(
        ranges(&[spec("trans-ctx", 1.0, 2.0, 1.0)]),
        &dir.path().join("cache.bin"),
        oracle,
        SearchOptions::default(),
    );
    let err = search.run().unwrap_err();
    match err {
        SearchError::Item { point, source } => {
            assert_eq!(point, vec![1.0]);
            assert!(matches!(source, OracleError::Failed { index: 1, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(search.cache().is_empty());
}

#[test]
fn test_exclude_policy_aggregates_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(Items {
        items: 4,
        failing: vec![0],
        panicking: Vec::new(),
    });
    let mut search = controller(
        ranges(&[spec("trans-ctx", 1.0, 1.0, 1.0)]),
        &dir.path().join("cache.bin"),
        oracle,
        SearchOptions {
            on_item_failure: FailurePolicy::Exclude,
            ..SearchOptions::default()
        },
    );
    let out = search.run().unwrap();
    assert_eq!(out.comparisons.log_spectrum, 2.0 + 3.0 + 4.0);
}

#[test]
fn test_exclude_policy_with_no_survivors_fails() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(Items {
        items: 2,
        failing: vec![0, 1],
        panicking: Vec::new(),
    });
    let mut search = controller(
        ranges(&[spec("trans-ctx", 1.0, 1.0, 1.0)]),
        &dir.path().join("cache.bin"),
        oracle,
        SearchOptions {
            on_item_failure: FailurePolicy::Exclude,
            ..SearchOptions::default()
        },
    );
    assert!(matches!(
        search.run(),
        Err(SearchError::AllItemsFailed { .. })
    ));
}

#[test]
fn test_panicking_item_is_reported_not_hung() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(Items {
        items: 3,
        failing: Vec::new(),
        panicking: vec![2],
    });
    let mut search = controller(
        ranges(&[spec("trans-ctx", 1.0, 1.0, 1.0)]),
        &dir.path().join("cache.bin"),
        oracle,
        SearchOptions::default(),
    );
    assert!(matches!(
        search.run(),
        Err(SearchError::LostJobs {
            expected: 3,
            lost: 1,
            ..
        })
    ));
}

#[test]
fn test_decode_oracle_end_to_end() {
    use crate::corpus::{CorpusBundle, Recording};
    use crate::phoneme::{Frame, PhonemeInstance};

    let phon = |label: char, start: f64, dur: f64, c: f64| {
        let mut f = Frame::new(120.0);
        f.mfcc[0] = c;
        PhonemeInstance::new(label, start, start + dur, vec![f, f])
    };
    let train = vec![Recording {
        file: "train.wav".into(),
        phonemes: vec![
            phon('a', 0.0, 0.10, 1.0),
            phon('b', 0.1, 0.10, 2.0),
            phon('a', 0.2, 0.30, 5.0),
            phon('b', 0.5, 0.30, 6.0),
        ],
    }];
    let test = vec![Recording {
        file: "test.wav".into(),
        phonemes: vec![phon('a', 0.0, 0.10, 1.0), phon('b', 0.1, 0.10, 2.0)],
    }];
    let bundle = CorpusBundle::build(train, test).unwrap();
    let alphabet = Arc::new(bundle.alphabet);
    let crf = Crf::new(alphabet, FeatureSet::phonetic());
    let r = Ranges::from_specs(
        &[
            spec("state-duration", 0.0, 2.0, 1.0),
            spec("trans-mfcc", 0.0, 1.0, 1.0),
        ],
        &crf,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache = ValueCache::open(&dir.path().join("cache.bin"), r.len()).unwrap();
    let oracle = Arc::new(DecodeOracle::new(Arc::new(bundle.test)));
    let mut search = SearchController::new(
        crf,
        r,
        cache,
        WorkerPool::initialize(2).unwrap(),
        oracle,
        SearchOptions {
            strategy: Strategy::Grid,
            ..SearchOptions::default()
        },
    )
    .unwrap();
    let out = search.run().unwrap();
    assert_eq!(out.iterations, 6);
    assert_eq!(out.evaluations, 6);
    // the recorded units themselves are selected at every point
    assert_eq!(out.comparisons.log_spectrum, 0.0);
    assert_eq!(search.cache().len(), 6);
    assert!(search
        .cache()
        .entries()
        .iter()
        .all(|e| e.result.log_spectrum == 0.0));
}
