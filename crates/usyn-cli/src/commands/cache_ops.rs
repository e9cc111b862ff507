use std::path::Path;

use serde::Serialize;

use usyn_core::tuning::ValueCache;

use super::config_ops::load_settings;

#[derive(Serialize)]
struct EntryJson<'a> {
    values: &'a [f64],
    log_spectrum: f64,
    itakura_saito: f64,
}

/// Print a value cache. Its dimensionality comes from the configuration's
/// ranges, which also name the columns.
pub fn cache_dump(cache_file: &str, config: Option<&str>, json: bool) {
    let settings = load_settings(config);
    let names: Vec<&str> = settings.ranges.iter().map(|r| r.feature.as_str()).collect();
    let cache = die!(
        ValueCache::open(Path::new(cache_file), names.len()),
        "Error opening cache: {}"
    );

    if json {
        let entries: Vec<EntryJson> = cache
            .entries()
            .iter()
            .map(|e| EntryJson {
                values: &e.values,
                log_spectrum: e.result.log_spectrum,
                itakura_saito: e.result.itakura_saito,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return;
    }

    println!("{cache_file}: {} entries", cache.len());
    println!("{},log_spectrum,itakura_saito", names.join(","));
    for e in cache.entries() {
        let values: Vec<String> = e.values.iter().map(f64::to_string).collect();
        println!(
            "{},{},{}",
            values.join(","),
            e.result.log_spectrum,
            e.result.itakura_saito
        );
    }
}
