//! Label alphabet: every phoneme instance of the unit database, grouped into
//! classes by symbolic label.
//!
//! Instance ids are dense. `optimize()` regroups them so each class occupies
//! a contiguous id range, keeping a back-mapping to the original ids for
//! reporting.


use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::phoneme::{LabelId, PhonemeInstance};

#[derive(Debug, thiserror::Error)]
pub enum AlphabetError {
    #[error("phoneme id {id} out of range (alphabet has {len} instances)")]
    IdOutOfRange { id: LabelId, len: usize },

    #[error("label {0:?} has no instances in the alphabet")]
    UnknownLabel(char),

    #[error("file index {index} out of range ({len} files)")]
    FileOutOfRange { index: usize, len: usize },

    #[error("instance at position {position} carries id {id}")]
    MisplacedId { position: usize, id: LabelId },

    #[error("{table} table has {found} rows for {expected} instances")]
    TableLength {
        table: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhonemeAlphabet {
    phonemes: Vec<PhonemeInstance>,
    /// label → ids sharing that label, ascending
    #[serde(skip)]
    classes: BTreeMap<char, Vec<LabelId>>,
    /// old_ids[id] = id the instance had before the last `optimize()`
    old_ids: Vec<LabelId>,
    files: Vec<String>,
    /// file_indices[id] = index into `files`
    file_indices: Vec<usize>,
}

impl PhonemeAlphabet {
    /// Build from instances in load order. Ids are reassigned to positions.
    pub fn new(phonemes: Vec<PhonemeInstance>) -> Self {
        let len = phonemes.len();
        Self::with_files(phonemes, Vec::new(), vec![0; len])
    }

    /// Build with a file table; `file_indices[i]` names the file of instance `i`.
    pub fn with_files(
        mut phonemes: Vec<PhonemeInstance>,
        files: Vec<String>,
        file_indices: Vec<usize>,
    ) -> Self {
        for (id, p) in phonemes.iter_mut().enumerate() {
            p.id = id;
        }
        let mut alphabet = Self {
            old_ids: (0..phonemes.len()).collect(),
            phonemes,
            classes: BTreeMap::new(),
            files,
            file_indices,
        };
        alphabet.build_classes();
        alphabet
    }

    /// Check that ids are dense positions and the side tables cover every
    /// instance. Run on anything deserialized before handing it to a model.
    pub fn validate(&self) -> Result<(), AlphabetError> {
        let len = self.phonemes.len();
        if let Some((position, p)) = self.phonemes.iter().enumerate().find(|(i, p)| p.id != *i) {
            return Err(AlphabetError::MisplacedId { position, id: p.id });
        }
        for (table, found) in [
            ("old id", self.old_ids.len()),
            ("file index", self.file_indices.len()),
        ] {
            if found != len {
                return Err(AlphabetError::TableLength {
                    table,
                    expected: len,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Rebuild the label → ids map. Must run after deserialization.
    pub fn build_classes(&mut self) {
        self.classes.clear();
        for p in &self.phonemes {
            self.classes.entry(p.label).or_default().push(p.id);
        }
    }

    pub fn len(&self) -> usize {
        self.phonemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phonemes.is_empty()
    }

    pub fn phonemes(&self) -> &[PhonemeInstance] {
        &self.phonemes
    }

    /// Labels present in the alphabet, in class order.
    pub fn labels(&self) -> impl Iterator<Item = char> + '_ {
        self.classes.keys().copied()
    }

    pub fn get(&self, id: LabelId) -> Result<&PhonemeInstance, AlphabetError> {
        self.phonemes.get(id).ok_or(AlphabetError::IdOutOfRange {
            id,
            len: self.phonemes.len(),
        })
    }

    /// Ids of every instance carrying `label`, ascending. Empty if unseen.
    pub fn class_of(&self, label: char) -> &[LabelId] {
        self.classes.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Lowest id in the class of `label`.
    pub fn first_of(&self, label: char) -> Result<LabelId, AlphabetError> {
        self.class_of(label)
            .first()
            .copied()
            .ok_or(AlphabetError::UnknownLabel(label))
    }

    pub fn to_phonemes(&self, ids: &[LabelId]) -> Result<Vec<PhonemeInstance>, AlphabetError> {
        ids.iter().map(|&id| self.get(id).cloned()).collect()
    }

    /// Seed a target sequence from a string of symbolic labels, one char each.
    pub fn to_sequence(&self, labels: &str) -> Result<Vec<PhonemeInstance>, AlphabetError> {
        labels
            .chars()
            .map(|c| self.first_of(c).and_then(|id| self.get(id).cloned()))
            .collect()
    }

    /// Id the instance had in load order, before any `optimize()`.
    pub fn old_id(&self, id: LabelId) -> Result<LabelId, AlphabetError> {
        self.old_ids
            .get(id)
            .copied()
            .ok_or(AlphabetError::IdOutOfRange {
                id,
                len: self.old_ids.len(),
            })
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn file_of(&self, id: LabelId) -> Result<&str, AlphabetError> {
        let index = *self
            .file_indices
            .get(id)
            .ok_or(AlphabetError::IdOutOfRange {
                id,
                len: self.file_indices.len(),
            })?;
        self.files
            .get(index)
            .map(String::as_str)
            .ok_or(AlphabetError::FileOutOfRange {
                index,
                len: self.files.len(),
            })
    }

    /// Ids of the instances recorded in file `file_index`, ascending.
    pub fn phonemes_of_file(&self, file_index: usize) -> Vec<LabelId> {
        self.file_indices
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f == file_index)
            .map(|(id, _)| id)
            .collect()
    }

    /// Regroup instances by label class and reassign dense ids in class order.
    ///
    /// Classes are laid out in label order; within a class the current id
    /// order is kept. The back-mapping composes across calls, so `old_id`
    /// always answers in load-order ids. Calling this twice is a no-op.
    pub fn optimize(&mut self) {
        self.build_classes();
        let order: Vec<LabelId> = self.classes.values().flatten().copied().collect();

        let mut phonemes = Vec::with_capacity(order.len());
        let mut old_ids = Vec::with_capacity(order.len());
        let mut file_indices = Vec::with_capacity(order.len());
        for (new_id, &cur) in order.iter().enumerate() {
            let mut p = self.phonemes[cur].clone();
            p.id = new_id;
            phonemes.push(p);
            old_ids.push(self.old_ids[cur]);
            file_indices.push(self.file_indices.get(cur).copied().unwrap_or(0));
        }

        self.phonemes = phonemes;
        self.old_ids = old_ids;
        self.file_indices = file_indices;
        self.build_classes();
    }
}
