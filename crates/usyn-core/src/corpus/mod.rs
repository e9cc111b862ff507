//! Training alphabet and held-out test corpus, bundled into one binary file.
//!
//! Layout: `USCB` magic, version byte, CRC32 of the body (u32 LE), then the
//! bincode-encoded body.

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alphabet::{AlphabetError, PhonemeAlphabet};
use crate::phoneme::{fill_unvoiced_pitch, PhonemeInstance};

pub const MAGIC: &[u8; 4] = b"USCB";
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic bytes (expected USCB)")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },

    #[error("serialization error: {0}")]
    Serialize(bincode::Error),

    #[error("deserialization error: {0}")]
    Deserialize(bincode::Error),

    #[error("recording {0} has no phonemes")]
    EmptyRecording(String),

    #[error("test recording {file}: label {label:?} never occurs in training data")]
    UnknownLabel { file: String, label: char },

    #[error(transparent)]
    Alphabet(#[from] AlphabetError),
}

/// One recording as it comes out of the external label/pitch/MFCC parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub file: String,
    pub phonemes: Vec<PhonemeInstance>,
}

/// Import form: training recordings feed the alphabet, test recordings the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSource {
    pub train: Vec<Recording>,
    pub test: Vec<Recording>,
}

/// One held-out test item. `input` is both the decode target and the
/// reference the selection is scored against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub file: String,
    pub input: Vec<PhonemeInstance>,
}

impl Utterance {
    pub fn labels(&self) -> String {
        self.input.iter().map(|p| p.label).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    utterances: Vec<Utterance>,
}

impl Corpus {
    pub fn new(utterances: Vec<Utterance>) -> Self {
        Self { utterances }
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Utterance> {
        self.utterances.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utterance> {
        self.utterances.iter()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusBundle {
    pub alphabet: PhonemeAlphabet,
    pub test: Corpus,
}

/// Fill unvoiced pitch and record each phoneme's left neighbour.
fn prepare(recording: &mut Recording) -> Result<(), CorpusError> {
    if recording.phonemes.is_empty() {
        return Err(CorpusError::EmptyRecording(recording.file.clone()));
    }
    fill_unvoiced_pitch(&mut recording.phonemes);
    let mut prev = None;
    for p in recording.phonemes.iter_mut() {
        p.ctx_left = prev;
        prev = Some(p.label);
    }
    Ok(())
}

impl CorpusBundle {
    pub fn build(train: Vec<Recording>, test: Vec<Recording>) -> Result<Self, CorpusError> {
        let mut files = Vec::with_capacity(train.len());
        let mut file_indices = Vec::new();
        let mut phonemes = Vec::new();
        for (file_index, mut recording) in train.into_iter().enumerate() {
            prepare(&mut recording)?;
            file_indices.extend(std::iter::repeat(file_index).take(recording.phonemes.len()));
            phonemes.extend(recording.phonemes);
            files.push(recording.file);
        }

        let mut alphabet = PhonemeAlphabet::with_files(phonemes, files, file_indices);
        alphabet.optimize();

        let mut utterances = Vec::with_capacity(test.len());
        for mut recording in test {
            prepare(&mut recording)?;
            if let Some(p) = recording
                .phonemes
                .iter()
                .find(|p| alphabet.class_of(p.label).is_empty())
            {
                return Err(CorpusError::UnknownLabel {
                    file: recording.file,
                    label: p.label,
                });
            }
            for (id, p) in recording.phonemes.iter_mut().enumerate() {
                p.id = id;
            }
            utterances.push(Utterance {
                file: recording.file,
                input: recording.phonemes,
            });
        }

        info!(
            instances = alphabet.len(),
            files = alphabet.files().len(),
            test_items = utterances.len(),
            "corpus bundle built"
        );
        Ok(Self {
            alphabet,
            test: Corpus::new(utterances),
        })
    }

    pub fn from_source(source: CorpusSource) -> Result<Self, CorpusError> {
        Self::build(source.train, source.test)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CorpusError> {
        let body = bincode::serialize(self).map_err(CorpusError::Serialize)?;
        let crc = crc32fast::hash(&body);

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CorpusError> {
        if bytes.len() < HEADER_LEN {
            return Err(CorpusError::InvalidHeader);
        }
        if &bytes[0..4] != MAGIC {
            return Err(CorpusError::InvalidMagic);
        }
        if bytes[4] != VERSION {
            return Err(CorpusError::UnsupportedVersion(bytes[4]));
        }
        let stored = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let body = &bytes[HEADER_LEN..];
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(CorpusError::Checksum { stored, computed });
        }

        let mut bundle: Self = bincode::deserialize(body).map_err(CorpusError::Deserialize)?;
        bundle.alphabet.validate()?;
        bundle.alphabet.build_classes();
        Ok(bundle)
    }

    /// Atomic write: write to .tmp then rename.
    pub fn save(&self, path: &Path) -> Result<(), CorpusError> {
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}
