use std::fs;
use std::path::Path;

use usyn_core::corpus::{CorpusBundle, CorpusSource};

pub fn import(source_file: &str, output_file: &str) {
    let text = die!(
        fs::read_to_string(source_file),
        "Error reading {source_file}: {}"
    );
    let source: CorpusSource = die!(
        serde_json::from_str(&text),
        "Error parsing {source_file}: {}"
    );
    let recordings = source.train.len();
    let bundle = die!(
        CorpusBundle::from_source(source),
        "Error building corpus: {}"
    );
    die!(
        bundle.save(Path::new(output_file)),
        "Error writing {output_file}: {}"
    );

    let file_size = fs::metadata(output_file).map(|m| m.len()).unwrap_or(0);
    eprintln!(
        "Wrote {output_file}: {} units from {recordings} recordings, {} test items ({:.1} KB)",
        bundle.alphabet.len(),
        bundle.test.len(),
        file_size as f64 / 1024.0
    );
}
