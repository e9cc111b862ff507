use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use usyn_core::corpus::{CorpusBundle, Utterance};
use usyn_core::crf::Crf;
use usyn_core::report::{self, SelectedUnit};
use usyn_core::tuning::{cepstral_distance, ValueCache};

use super::config_ops::load_settings;
use super::tune_ops::build_model;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum AssignmentError {
    #[error("expected NAME=VALUE, got '{0}'")]
    Syntax(String),
    #[error("invalid coefficient '{value}': {source}")]
    Number {
        value: String,
        source: std::num::ParseFloatError,
    },
}

/// Parse a `--set feature=value` argument.
pub fn parse_assignment(s: &str) -> Result<(String, f64), AssignmentError> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| AssignmentError::Syntax(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(AssignmentError::Syntax(s.to_string()));
    }
    let value = value.trim();
    let parsed = value.parse().map_err(|source| AssignmentError::Number {
        value: value.to_string(),
        source,
    })?;
    Ok((name.to_string(), parsed))
}

pub struct DecodeOptions<'a> {
    pub config: Option<&'a str>,
    /// Start from the best point recorded in the configured value cache.
    pub from_cache: bool,
    pub assignments: &'a [(String, f64)],
    pub item: Option<usize>,
    pub json: bool,
}

#[derive(Serialize)]
struct ItemJson<'a> {
    index: usize,
    file: &'a str,
    target: String,
    runs: String,
    score: f64,
    distance: f64,
    units: Vec<SelectedUnit>,
}

pub fn decode(bundle_file: &str, opts: &DecodeOptions) {
    let settings = load_settings(opts.config);
    let bundle = die!(
        CorpusBundle::open(Path::new(bundle_file)),
        "Error opening {bundle_file}: {}"
    );
    let mut model = build_model(&settings, Arc::new(bundle.alphabet));

    if opts.from_cache {
        let cache = die!(
            ValueCache::open(&settings.cache.path, settings.ranges.len()),
            "Error opening cache: {}"
        );
        let metric = settings.search.metric;
        let best = cache.entries().iter().min_by(|a, b| {
            a.result
                .value(metric)
                .total_cmp(&b.result.value(metric))
        });
        match best {
            Some(entry) => {
                for (spec, &value) in settings.ranges.iter().zip(&entry.values) {
                    die!(model.set(&spec.feature, value), "Error: {}");
                }
            }
            None => eprintln!(
                "Warning: {} holds no entries, using defaults",
                settings.cache.path.display()
            ),
        }
    }
    for (name, value) in opts.assignments {
        die!(model.set(name, *value), "Error: {}");
    }

    let items: Vec<(usize, &Utterance)> = match opts.item {
        Some(index) => match bundle.test.get(index) {
            Some(u) => vec![(index, u)],
            None => {
                eprintln!(
                    "Error: item {index} out of range ({} test items)",
                    bundle.test.len()
                );
                std::process::exit(1);
            }
        },
        None => bundle.test.iter().enumerate().collect(),
    };

    if !opts.json {
        let coefficients: Vec<String> = model
            .coefficients()
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect();
        println!("# {}", coefficients.join(" "));
    }

    let mut out = Vec::with_capacity(items.len());
    for (index, utterance) in items {
        let item = decode_item(&model, index, utterance);
        if opts.json {
            out.push(item);
            continue;
        }
        println!(
            "[{index}] {} {} -> {}  score {:.4}  distance {:.4}",
            item.file, item.target, item.runs, item.score, item.distance
        );
        for unit in &item.units {
            println!("  {unit}");
        }
    }
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    }
}

fn decode_item<'a>(model: &Crf, index: usize, utterance: &'a Utterance) -> ItemJson<'a> {
    let best = die!(
        model.best_path(&utterance.input),
        "Error decoding {}: {}",
        utterance.file
    );
    let alphabet = model.alphabet();
    let runs = die!(report::run_lengths(alphabet, &best.labels), "Error: {}");
    let units = die!(
        report::selection(alphabet, &best.labels, &utterance.input),
        "Error: {}"
    );
    let selected = die!(alphabet.to_phonemes(&best.labels), "Error: {}");
    ItemJson {
        index,
        file: &utterance.file,
        target: utterance.labels(),
        runs,
        score: best.score,
        distance: cepstral_distance(&selected, &utterance.input),
        units,
    }
}
