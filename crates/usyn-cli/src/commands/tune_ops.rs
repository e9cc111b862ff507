use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use usyn_core::alphabet::PhonemeAlphabet;
use usyn_core::corpus::CorpusBundle;
use usyn_core::crf::Crf;
use usyn_core::settings::TuningSettings;
use usyn_core::tuning::{
    DecodeOracle, Ranges, SearchController, SearchOptions, TraceWriter, ValueCache, WorkerPool,
};

use super::config_ops::load_settings;

/// Command-line overrides for `tune`.
pub struct TuneOptions<'a> {
    pub config: Option<&'a str>,
    pub cache: Option<&'a str>,
    pub trace: Option<&'a str>,
    pub threads: Option<usize>,
    pub json: bool,
}

#[derive(Serialize)]
struct TuneJson<'a> {
    best: Vec<(&'a str, f64)>,
    log_spectrum: f64,
    itakura_saito: f64,
    iterations: usize,
    evaluations: usize,
    cache_hits: usize,
}

/// The model the configuration describes, every coefficient at 1.0.
pub fn build_model(settings: &TuningSettings, alphabet: Arc<PhonemeAlphabet>) -> Crf {
    Crf::new(alphabet, settings.feature_set()).with_candidates(settings.search.candidates)
}

pub fn tune(bundle_file: &str, opts: &TuneOptions) {
    let settings = load_settings(opts.config);
    let bundle = die!(
        CorpusBundle::open(Path::new(bundle_file)),
        "Error opening {bundle_file}: {}"
    );
    info!(
        units = bundle.alphabet.len(),
        items = bundle.test.len(),
        "corpus loaded"
    );

    let model = build_model(&settings, Arc::new(bundle.alphabet));
    let ranges = die!(
        Ranges::from_specs(&settings.ranges, &model),
        "Error in ranges: {}"
    );
    info!(
        dims = ranges.len(),
        points = ?ranges.grid_size(),
        "search space"
    );

    let cache_path = opts
        .cache
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.cache.path.clone());
    let cache = die!(
        ValueCache::open(&cache_path, ranges.len()),
        "Error opening cache: {}"
    );
    let threads = opts.threads.unwrap_or(settings.search.threads);
    let pool = die!(WorkerPool::initialize(threads), "Error starting workers: {}");
    let oracle = Arc::new(DecodeOracle::new(Arc::new(bundle.test)));

    let mut controller = die!(
        SearchController::new(
            model,
            ranges,
            cache,
            pool,
            oracle,
            SearchOptions::from(&settings.search),
        ),
        "Error: {}"
    );
    // Created only once the setup is valid: creating truncates the file.
    let trace_path = opts
        .trace
        .map(PathBuf::from)
        .or_else(|| settings.cache.trace.clone());
    if let Some(path) = trace_path {
        let trace = die!(
            TraceWriter::create(&path, &controller.ranges().names()),
            "Error creating trace {}: {}",
            path.display()
        );
        controller = controller.with_trace(trace);
    }

    let output = die!(controller.run(), "Search failed: {}");

    if opts.json {
        let out = TuneJson {
            best: output.best.iter().map(|(n, v)| (n.as_str(), *v)).collect(),
            log_spectrum: output.comparisons.log_spectrum,
            itakura_saito: output.comparisons.itakura_saito,
            iterations: output.iterations,
            evaluations: output.evaluations,
            cache_hits: output.cache_hits,
        };
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return;
    }

    println!("Best configuration:");
    for (name, value) in &output.best {
        println!("  {name} = {value}");
    }
    println!(
        "log_spectrum = {:.6}, itakura_saito = {:.6}",
        output.comparisons.log_spectrum, output.comparisons.itakura_saito
    );
    println!(
        "{} iterations, {} evaluations, {} cache hits",
        output.iterations, output.evaluations, output.cache_hits
    );
}
