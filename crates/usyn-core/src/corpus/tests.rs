use super::*;
use crate::phoneme::Frame;

fn phon(label: char, start: f64, pitch: f64) -> PhonemeInstance {
    PhonemeInstance::new(
        label,
        start,
        start + 0.1,
        vec![Frame::new(pitch), Frame::new(pitch)],
    )
}

fn recording(file: &str, labels: &str) -> Recording {
    Recording {
        file: file.to_string(),
        phonemes: labels
            .chars()
            .enumerate()
            .map(|(i, c)| phon(c, i as f64 * 0.1, 100.0 + i as f64))
            .collect(),
    }
}

fn sample() -> CorpusBundle {
    CorpusBundle::build(
        vec![recording("one.wav", "bab"), recording("two.wav", "ca")],
        vec![recording("test.wav", "abc")],
    )
    .unwrap()
}

#[test]
fn test_build_optimizes_and_keeps_files() {
    let bundle = sample();
    let alphabet = &bundle.alphabet;
    let labels: String = alphabet.phonemes().iter().map(|p| p.label).collect();
    assert_eq!(labels, "aabbc");
    assert_eq!(alphabet.files(), &["one.wav".to_string(), "two.wav".to_string()]);

    // 'a' from one.wav (old 1) then 'a' from two.wav (old 4)
    assert_eq!(alphabet.old_id(0).unwrap(), 1);
    assert_eq!(alphabet.old_id(1).unwrap(), 4);
    assert_eq!(alphabet.file_of(0).unwrap(), "one.wav");
    assert_eq!(alphabet.file_of(1).unwrap(), "two.wav");
}

#[test]
fn test_build_sets_left_context_per_recording() {
    let bundle = sample();
    let by_old: Vec<Option<char>> = {
        let a = &bundle.alphabet;
        let mut v = vec![None; a.len()];
        for p in a.phonemes() {
            v[a.old_id(p.id).unwrap()] = p.ctx_left;
        }
        v
    };
    // one.wav: b a b, two.wav: c a
    assert_eq!(by_old, vec![None, Some('b'), Some('a'), None, Some('c')]);

    let test = bundle.test.get(0).unwrap();
    assert_eq!(test.labels(), "abc");
    assert_eq!(test.input[0].ctx_left, None);
    assert_eq!(test.input[2].ctx_left, Some('b'));
}

#[test]
fn test_build_rejects_unknown_test_label() {
    let err = CorpusBundle::build(
        vec![recording("one.wav", "ab")],
        vec![recording("test.wav", "abz")],
    )
    .unwrap_err();
    assert!(matches!(err, CorpusError::UnknownLabel { label: 'z', .. }));
}

#[test]
fn test_build_rejects_empty_recording() {
    let err = CorpusBundle::build(vec![recording("empty.wav", "")], Vec::new()).unwrap_err();
    assert!(matches!(err, CorpusError::EmptyRecording(ref f) if f == "empty.wav"));
}

#[test]
fn test_build_fills_unvoiced_pitch() {
    let mut rec = recording("one.wav", "ab");
    rec.phonemes[0].frames[0].pitch = 0.0;
    let bundle = CorpusBundle::build(vec![rec], Vec::new()).unwrap();
    let a = bundle.alphabet.get(bundle.alphabet.first_of('a').unwrap()).unwrap();
    assert_eq!(a.frames[0].pitch, 100.0);
    assert!((a.pitch_contour.start - 100.0f64.ln()).abs() < 1e-12);
}

#[test]
fn test_bytes_round_trip() {
    let bundle = sample();
    let bytes = bundle.to_bytes().unwrap();
    assert_eq!(&bytes[0..4], MAGIC);
    assert_eq!(bytes[4], VERSION);

    let loaded = CorpusBundle::from_bytes(&bytes).unwrap();
    assert_eq!(loaded.alphabet.phonemes(), bundle.alphabet.phonemes());
    assert_eq!(loaded.test, bundle.test);
    // classes are rebuilt after decoding
    assert_eq!(loaded.alphabet.class_of('b'), &[2, 3]);
    assert_eq!(loaded.alphabet.old_id(1).unwrap(), 4);
}

#[test]
fn test_from_bytes_rejects_damage() {
    let bytes = sample().to_bytes().unwrap();

    assert!(matches!(
        CorpusBundle::from_bytes(&bytes[..4]),
        Err(CorpusError::InvalidHeader)
    ));

    let mut bad = bytes.clone();
    bad[0] = b'X';
    assert!(matches!(
        CorpusBundle::from_bytes(&bad),
        Err(CorpusError::InvalidMagic)
    ));

    let mut bad = bytes.clone();
    bad[4] = 99;
    assert!(matches!(
        CorpusBundle::from_bytes(&bad),
        Err(CorpusError::UnsupportedVersion(99))
    ));

    let mut bad = bytes.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    assert!(matches!(
        CorpusBundle::from_bytes(&bad),
        Err(CorpusError::Checksum { .. })
    ));
}

#[test]
fn test_from_bytes_rejects_misplaced_ids() {
    let mut bundle = sample();
    let mut alphabet = serde_json::to_value(&bundle.alphabet).unwrap();
    alphabet["phonemes"][0]["id"] = serde_json::json!(99);
    bundle.alphabet = serde_json::from_value(alphabet).unwrap();

    // well-formed bytes with a valid checksum, but ids no longer match positions
    let bytes = bundle.to_bytes().unwrap();
    let err = CorpusBundle::from_bytes(&bytes).err().unwrap();
    assert!(matches!(
        err,
        CorpusError::Alphabet(AlphabetError::MisplacedId { position: 0, id: 99 })
    ));
}

#[test]
fn test_save_and_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("corpus.uscb");
    let bundle = sample();
    bundle.save(&path).unwrap();
    assert!(!path.with_extension("tmp").exists());

    let loaded = CorpusBundle::open(&path).unwrap();
    assert_eq!(loaded.alphabet.len(), 5);
    assert_eq!(loaded.test.len(), 1);
}

#[test]
fn test_open_missing_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CorpusBundle::open(&dir.path().join("missing.uscb")).unwrap_err();
    assert!(matches!(err, CorpusError::Io(_)));
}

#[test]
fn test_source_from_json() {
    let json = r#"{
        "train": [{"file": "one.wav", "phonemes": [
            {"label": "a", "start": 0.0, "end": 0.1,
             "frames": [{"pitch": 110.0, "mfcc": [0,0,0,0,0,0,0,0,0,0,0,0]}]}
        ]}],
        "test": []
    }"#;
    let source: CorpusSource = serde_json::from_str(json).unwrap();
    let bundle = CorpusBundle::from_source(source).unwrap();
    assert_eq!(bundle.alphabet.len(), 1);
    assert!((bundle.alphabet.phonemes()[0].pitch_contour.end - 110.0f64.ln()).abs() < 1e-12);
}
