const DEFAULT_TUNING: &str = "src/default_tuning.toml";

fn main() {
    println!("cargo:rerun-if-changed={DEFAULT_TUNING}");
    check_tuning(include_str!("src/default_tuning.toml"));
}

/// Shape check of the embedded defaults; value checks run in `settings`.
fn check_tuning(content: &str) {
    let value: toml::Table = match content.parse() {
        Ok(v) => v,
        Err(e) => panic!("{DEFAULT_TUNING} contains invalid TOML: {e}"),
    };
    for table in ["search", "cache"] {
        if !value.get(table).is_some_and(toml::Value::is_table) {
            panic!("{DEFAULT_TUNING} lacks a [{table}] table");
        }
    }
    let ranges = value
        .get("range")
        .and_then(toml::Value::as_array)
        .map_or(0, Vec::len);
    if ranges == 0 {
        panic!("{DEFAULT_TUNING} declares no [[range]]");
    }
}
