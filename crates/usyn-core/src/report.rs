//! Human-readable renderings of a decoded unit selection.

use std::fmt;

use serde::Serialize;

use crate::alphabet::{AlphabetError, PhonemeAlphabet};
use crate::phoneme::{LabelId, PhonemeInstance};

/// Labels of the selection, with `|` wherever consecutive units were not
/// adjacent in their original recording. `"ab|c"` means `a` and `b` were
/// cut from one run of audio and `c` from somewhere else.
pub fn run_lengths(alphabet: &PhonemeAlphabet, ids: &[LabelId]) -> Result<String, AlphabetError> {
    let mut out = String::with_capacity(ids.len() * 2);
    let mut prev: Option<(LabelId, &str)> = None;
    for &id in ids {
        let old = alphabet.old_id(id)?;
        let file = alphabet.file_of(id)?;
        if let Some((p, f)) = prev {
            if p + 1 != old || f != file {
                out.push('|');
            }
        }
        out.push(alphabet.get(id)?.label);
        prev = Some((old, file));
    }
    Ok(out)
}

/// One selected unit next to what the target asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedUnit {
    pub file: String,
    pub start: f64,
    pub end: f64,
    pub label: char,
    /// Mean pitch of the target phoneme's frames, in Hz.
    pub desired_pitch: f64,
    pub desired_duration: f64,
}

impl fmt::Display for SelectedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.3} {:.3} {} {:.1} {:.3}",
            self.file, self.start, self.end, self.label, self.desired_pitch, self.desired_duration
        )
    }
}

/// Pair each selected id with its target phoneme. Extra entries on either
/// side are ignored.
pub fn selection(
    alphabet: &PhonemeAlphabet,
    ids: &[LabelId],
    targets: &[PhonemeInstance],
) -> Result<Vec<SelectedUnit>, AlphabetError> {
    ids.iter()
        .zip(targets)
        .map(|(&id, target)| {
            let unit = alphabet.get(id)?;
            Ok(SelectedUnit {
                file: alphabet.file_of(id)?.to_string(),
                start: unit.start,
                end: unit.end,
                label: unit.label,
                desired_pitch: target.mean_pitch(),
                desired_duration: target.duration(),
            })
        })
        .collect()
}

/// `selection` rendered one unit per line.
pub fn selection_lines(
    alphabet: &PhonemeAlphabet,
    ids: &[LabelId],
    targets: &[PhonemeInstance],
) -> Result<Vec<String>, AlphabetError> {
    Ok(selection(alphabet, ids, targets)?
        .iter()
        .map(SelectedUnit::to_string)
        .collect())
}
