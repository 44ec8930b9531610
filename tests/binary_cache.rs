#![cfg(feature = "binary-cache")]

use statute::serial::DeserializeError;
use statute::{LawContext, LawParser, RuleIndex, Subject};

const LAWS: &str = "Пользователь член партии голосовать\nПравитель не модерировать\nПользователь с рейтингом > 10; создавать законы";

fn build_index() -> RuleIndex {
    let parser = LawParser::default();
    let laws: Vec<(String, &str)> = LAWS
        .lines()
        .enumerate()
        .map(|(i, text)| (format!("law-{i}"), text))
        .collect();
    RuleIndex::from_laws(&parser, laws.iter().map(|(n, t)| (n.as_str(), *t))).unwrap()
}

#[test]
fn round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.stat");

    let index = build_index();
    index.to_binary_file(&path, Some(LAWS)).unwrap();
    let restored = RuleIndex::from_binary_file(&path).unwrap();
    assert_eq!(restored, index);

    let ctx = LawContext::default();
    let member = Subject::new(1, "a").with_party(2, "Зелёные").with_rating(20);
    let ruler = Subject::new(2, "b").with_admin(true);
    for (subject, action) in [
        (&member, "vote"),
        (&member, "create_law"),
        (&ruler, "moderate"),
        (&ruler, "vote"),
    ] {
        assert_eq!(
            restored.check_permission(Some(subject), action, &ctx),
            index.check_permission(Some(subject), action, &ctx),
            "{action}"
        );
    }
}

#[test]
fn staleness_is_detected_from_the_digest() {
    let index = build_index();
    let bytes = index.to_bytes(Some(LAWS)).unwrap();
    assert!(RuleIndex::is_current(&bytes, LAWS).unwrap());
    assert!(!RuleIndex::is_current(&bytes, "Пользователь голосовать").unwrap());

    let undigested = index.to_bytes(None).unwrap();
    assert!(!RuleIndex::is_current(&undigested, LAWS).unwrap());
}

#[test]
fn corrupted_payload_is_rejected() {
    let mut bytes = build_index().to_bytes(None).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(matches!(
        RuleIndex::from_bytes(&bytes),
        Err(DeserializeError::ChecksumMismatch)
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuleIndex::from_binary_file(dir.path().join("absent.stat")).unwrap_err();
    assert!(matches!(err, DeserializeError::Io(_)));
}

#[test]
fn empty_index_round_trips() {
    let bytes = RuleIndex::new().to_bytes(None).unwrap();
    assert!(RuleIndex::from_bytes(&bytes).unwrap().is_empty());
}
