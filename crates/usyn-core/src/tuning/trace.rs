//! CSV trace of visited grid points, and summary statistics over one.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

/// Column name of the score in a trace.
pub const VALUE_COLUMN: &str = "value";

/// Appends one line per visited point: dimension values then the score.
/// Every line is flushed as it is written.
pub struct TraceWriter {
    out: BufWriter<File>,
    columns: usize,
}

impl TraceWriter {
    /// Create (truncating) the trace file and write the header.
    pub fn create(path: &Path, names: &[String]) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        let mut header = names.join(",");
        if !header.is_empty() {
            header.push(',');
        }
        header.push_str(VALUE_COLUMN);
        writeln!(out, "{header}")?;
        out.flush()?;
        Ok(Self {
            out,
            columns: names.len(),
        })
    }

    pub fn append(&mut self, values: &[f64], score: f64) -> io::Result<()> {
        debug_assert_eq!(values.len(), self.columns);
        for v in values {
            write!(self.out, "{v},")?;
        }
        writeln!(self.out, "{score}")?;
        self.out.flush()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("trace has no header")]
    Empty,

    #[error("line {line}: expected {expected} columns, found {found}")]
    Width {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}, column {column}: not a number: {text:?}")]
    Number {
        line: usize,
        column: String,
        text: String,
    },
}

/// Per-column summary of a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for fewer than two rows.
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceStats {
    pub rows: usize,
    pub columns: Vec<ColumnStats>,
}

impl TraceStats {
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        let file = File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, TraceError> {
        let mut lines = reader.lines();
        let header = lines.next().ok_or(TraceError::Empty)??;
        let names: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();

        // Welford running mean and sum of squared deviations per column.
        let mut means = vec![0.0; names.len()];
        let mut m2 = vec![0.0; names.len()];
        let mut rows = 0usize;
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != names.len() {
                return Err(TraceError::Width {
                    line: i + 2,
                    expected: names.len(),
                    found: fields.len(),
                });
            }
            rows += 1;
            let n = rows as f64;
            for (c, field) in fields.iter().enumerate() {
                let v: f64 = field.trim().parse().map_err(|_| TraceError::Number {
                    line: i + 2,
                    column: names[c].clone(),
                    text: field.to_string(),
                })?;
                let delta = v - means[c];
                means[c] += delta / n;
                m2[c] += delta * (v - means[c]);
            }
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(c, name)| {
                let mean = means[c];
                let std_dev = if rows < 2 {
                    0.0
                } else {
                    (m2[c] / (rows - 1) as f64).sqrt()
                };
                ColumnStats {
                    name,
                    mean,
                    std_dev,
                }
            })
            .collect();
        Ok(Self { rows, columns })
    }
}
