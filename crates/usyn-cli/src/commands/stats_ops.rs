use std::path::Path;

use serde::Serialize;

use usyn_core::tuning::TraceStats;

#[derive(Serialize)]
struct ColumnJson<'a> {
    name: &'a str,
    mean: f64,
    std_dev: f64,
}

#[derive(Serialize)]
struct StatsJson<'a> {
    rows: usize,
    columns: Vec<ColumnJson<'a>>,
}

pub fn stats(trace_file: &str, json: bool) {
    let stats = die!(
        TraceStats::open(Path::new(trace_file)),
        "Error reading {trace_file}: {}"
    );

    if json {
        let out = StatsJson {
            rows: stats.rows,
            columns: stats
                .columns
                .iter()
                .map(|c| ColumnJson {
                    name: &c.name,
                    mean: c.mean,
                    std_dev: c.std_dev,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return;
    }

    println!("{} rows", stats.rows);
    let width = stats
        .columns
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0);
    for c in &stats.columns {
        println!(
            "  {:<width$}  mean {:>12.4}  sd {:>12.4}",
            c.name, c.mean, c.std_dev
        );
    }
}
