use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Distance figures for one synthesized item, or an aggregate of several.
/// Lower is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparisons {
    pub log_spectrum: f64,
    /// Declared for perceptual scoring; oracles may leave it at 0.
    pub itakura_saito: f64,
}

impl Comparisons {
    pub fn new(log_spectrum: f64, itakura_saito: f64) -> Self {
        Self {
            log_spectrum,
            itakura_saito,
        }
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::LogSpectrum => self.log_spectrum,
            Metric::ItakuraSaito => self.itakura_saito,
        }
    }

    /// Strictly better under `metric`. NaN is never better.
    pub fn better_than(&self, other: &Comparisons, metric: Metric) -> bool {
        self.value(metric) < other.value(metric)
    }

    pub fn divided(self, n: usize) -> Self {
        let n = n as f64;
        Self {
            log_spectrum: self.log_spectrum / n,
            itakura_saito: self.itakura_saito / n,
        }
    }
}

impl Add for Comparisons {
    type Output = Comparisons;

    fn add(self, rhs: Comparisons) -> Comparisons {
        Comparisons {
            log_spectrum: self.log_spectrum + rhs.log_spectrum,
            itakura_saito: self.itakura_saito + rhs.itakura_saito,
        }
    }
}

impl AddAssign for Comparisons {
    fn add_assign(&mut self, rhs: Comparisons) {
        *self = *self + rhs;
    }
}

/// Which figure orders `Comparisons`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    #[default]
    LogSpectrum,
    ItakuraSaito,
}

/// How per-item results fold into one score for a grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
    /// The item with the greatest distance under the metric.
    Worst,
}

impl Aggregation {
    /// `None` when there is nothing to aggregate.
    pub fn aggregate(self, items: &[Comparisons], metric: Metric) -> Option<Comparisons> {
        if items.is_empty() {
            return None;
        }
        let total = || items.iter().fold(Comparisons::default(), |acc, &c| acc + c);
        Some(match self {
            Aggregation::Sum => total(),
            Aggregation::Mean => total().divided(items.len()),
            Aggregation::Worst => items
                .iter()
                .copied()
                .reduce(|worst, c| {
                    if worst.better_than(&c, metric) {
                        c
                    } else {
                        worst
                    }
                })
                .unwrap_or_default(),
        })
    }
}
