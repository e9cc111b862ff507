use std::fs;

use usyn_core::settings::{self, TuningSettings};

pub fn config_export() {
    print!("{}", settings::default_toml());
}

pub fn config_validate(file: &str) {
    let s = load_settings(Some(file));
    println!(
        "OK: strategy={:?}, passes={}, threads={}, {} ranges",
        s.search.strategy,
        s.search.passes,
        s.search.threads,
        s.ranges.len()
    );
    for r in &s.ranges {
        println!("  {}: {}..={} step {}", r.feature, r.from, r.to, r.step);
    }
}

/// The configuration at `file`, or the embedded default.
pub fn load_settings(file: Option<&str>) -> TuningSettings {
    match file {
        Some(file) => {
            let content = die!(fs::read_to_string(file), "Error reading {file}: {}");
            die!(settings::parse_tuning_toml(&content), "Error in {file}: {}")
        }
        None => die!(TuningSettings::embedded(), "Error in built-in settings: {}"),
    }
}
