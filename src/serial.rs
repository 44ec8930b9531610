//! Binary cache for compiled rule indexes.
//!
//! Rebuilding an index means re-parsing every law, so a host may keep the
//! compiled [`RuleIndex`](crate::RuleIndex) on disk instead. A blob is a
//! fixed 32-byte header and then a bincode payload:
//!
//! ```text
//! bytes   meaning
//! 0..4    b"STAT"
//! 4..6    layout revision, u16 LE (must equal ours)
//! 6..8    writer revision, u16 LE (ignored on read)
//! 8..12   zero, reserved
//! 12..16  payload byte count, u32 LE
//! 16..32  first half of the payload's BLAKE3 hash
//! 32..    payload
//! ```
//!
//! When the index is encoded together with its law texts, the payload also
//! records [`source_digest`] of those texts so a stale cache can be spotted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionRule, CompareOp, Condition, RuleIndex, SubjectKind, Value};

const MAGIC: [u8; 4] = *b"STAT";
const LAYOUT_REVISION: u16 = 1;
const WRITER_REVISION: u16 = 1;
const HEADER_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("bincode could not encode the index: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("encoded index is {0} bytes, more than a u32 length can describe")]
    TooLarge(usize),

    #[error("could not write rule cache: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("blob does not start with the STAT marker")]
    BadMagic,

    #[error("blob uses layout v{blob}, this build reads v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("payload hash does not match the header")]
    ChecksumMismatch,

    #[error("blob truncated: needed {expected} bytes, found {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("bincode could not decode the index: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("cached index is inconsistent: {0}")]
    Validation(String),

    #[error("could not read rule cache: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed-size prefix of every blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    layout: u16,
    payload_len: u32,
    checksum: [u8; 16],
}

impl Header {
    fn for_payload(payload: &[u8]) -> Result<Self, SerializeError> {
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| SerializeError::TooLarge(payload.len()))?;
        Ok(Header {
            layout: LAYOUT_REVISION,
            payload_len,
            checksum: checksum(payload),
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.layout.to_le_bytes());
        out.extend_from_slice(&WRITER_REVISION.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.checksum);
    }

    fn read_from(bytes: &[u8]) -> Result<Self, DeserializeError> {
        let Some(raw) = bytes.get(..HEADER_LEN) else {
            return Err(DeserializeError::LengthMismatch {
                expected: HEADER_LEN as u32,
                actual: bytes.len(),
            });
        };
        if raw[..4] != MAGIC {
            return Err(DeserializeError::BadMagic);
        }
        let mut checksum = [0; 16];
        checksum.copy_from_slice(&raw[16..]);
        Ok(Header {
            layout: u16::from_le_bytes([raw[4], raw[5]]),
            payload_len: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            checksum,
        })
    }
}

fn checksum(payload: &[u8]) -> [u8; 16] {
    let mut out = [0; 16];
    out.copy_from_slice(&blake3::hash(payload).as_bytes()[..16]);
    out
}

/// BLAKE3 digest of law texts, as embedded by [`RuleIndex::to_bytes`].
#[must_use]
pub fn source_digest(source_text: &str) -> [u8; 32] {
    *blake3::hash(source_text.as_bytes()).as_bytes()
}

// Payload shapes. `Condition` and `Value` use tagged/untagged JSON forms that
// bincode cannot read back, so they get plain mirrors here.

#[derive(Debug, Serialize, Deserialize)]
struct CachedIndex {
    action_count: usize,
    rule_count: usize,
    source_digest: Option<[u8; 32]>,
    actions: Vec<CachedAction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedAction {
    name: String,
    rules: Vec<CachedRule>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRule {
    subject_type: String,
    subject_kind: SubjectKind,
    conditions: Vec<CachedCondition>,
    allow: bool,
    priority: u32,
    source_law: String,
}

#[derive(Debug, Serialize, Deserialize)]
enum CachedCondition {
    HasParty(bool),
    HasBasePermission,
    Rating(CompareOp, i64),
    UsernameEquals(String),
    PartyNameEquals(String),
    NumberValue(i64),
    Other(String, CachedValue),
}

#[derive(Debug, Serialize, Deserialize)]
enum CachedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&Value> for CachedValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CachedValue::Null,
            Value::Bool(v) => CachedValue::Bool(*v),
            Value::Int(v) => CachedValue::Int(*v),
            Value::Float(v) => CachedValue::Float(*v),
            Value::String(v) => CachedValue::String(v.clone()),
        }
    }
}

impl From<CachedValue> for Value {
    fn from(value: CachedValue) -> Self {
        match value {
            CachedValue::Null => Value::Null,
            CachedValue::Bool(v) => Value::Bool(v),
            CachedValue::Int(v) => Value::Int(v),
            CachedValue::Float(v) => Value::Float(v),
            CachedValue::String(v) => Value::String(v),
        }
    }
}

impl From<&Condition> for CachedCondition {
    fn from(condition: &Condition) -> Self {
        match condition {
            Condition::HasParty(v) => CachedCondition::HasParty(*v),
            Condition::HasBasePermission => CachedCondition::HasBasePermission,
            Condition::Rating { op, threshold } => CachedCondition::Rating(*op, *threshold),
            Condition::UsernameEquals(s) => CachedCondition::UsernameEquals(s.clone()),
            Condition::PartyNameEquals(s) => CachedCondition::PartyNameEquals(s.clone()),
            Condition::NumberValue(n) => CachedCondition::NumberValue(*n),
            Condition::Other { kind, value } => CachedCondition::Other(kind.clone(), value.into()),
        }
    }
}

impl From<CachedCondition> for Condition {
    fn from(condition: CachedCondition) -> Self {
        match condition {
            CachedCondition::HasParty(v) => Condition::HasParty(v),
            CachedCondition::HasBasePermission => Condition::HasBasePermission,
            CachedCondition::Rating(op, threshold) => Condition::Rating { op, threshold },
            CachedCondition::UsernameEquals(s) => Condition::UsernameEquals(s),
            CachedCondition::PartyNameEquals(s) => Condition::PartyNameEquals(s),
            CachedCondition::NumberValue(n) => Condition::NumberValue(n),
            CachedCondition::Other(kind, value) => Condition::Other {
                kind,
                value: value.into(),
            },
        }
    }
}

impl CachedIndex {
    fn capture(index: &RuleIndex, source_text: Option<&str>) -> Self {
        let mut names: Vec<&String> = index.rules.keys().collect();
        names.sort_unstable();

        let actions: Vec<CachedAction> = names
            .into_iter()
            .map(|name| CachedAction {
                name: name.clone(),
                rules: index.rules[name]
                    .iter()
                    .map(|rule| CachedRule {
                        subject_type: rule.subject_type.clone(),
                        subject_kind: rule.subject_kind,
                        conditions: rule.conditions.iter().map(CachedCondition::from).collect(),
                        allow: rule.allow,
                        priority: rule.priority,
                        source_law: rule.source_law.clone(),
                    })
                    .collect(),
            })
            .collect();

        CachedIndex {
            action_count: actions.len(),
            rule_count: index.len(),
            source_digest: source_text.map(source_digest),
            actions,
        }
    }

    /// Reject payloads whose counts or ordering could not have come from
    /// [`CachedIndex::capture`].
    fn check(&self) -> Result<(), DeserializeError> {
        let invalid = |msg: String| -> Result<(), DeserializeError> {
            Err(DeserializeError::Validation(msg))
        };

        if self.action_count != self.actions.len() {
            return invalid(format!(
                "header lists {} actions, payload holds {}",
                self.action_count,
                self.actions.len()
            ));
        }
        let rule_count: usize = self.actions.iter().map(|a| a.rules.len()).sum();
        if self.rule_count != rule_count {
            return invalid(format!(
                "header lists {} rules, payload holds {rule_count}",
                self.rule_count
            ));
        }
        if let Some(pair) = self.actions.windows(2).find(|w| w[0].name >= w[1].name) {
            return invalid(format!("action '{}' repeated or unsorted", pair[1].name));
        }
        for action in &self.actions {
            if action.name.is_empty() {
                return invalid("action with an empty name".to_owned());
            }
            if action.rules.windows(2).any(|w| w[0].priority < w[1].priority) {
                return invalid(format!("rules of '{}' are not highest-priority first", action.name));
            }
        }
        Ok(())
    }

    fn restore(self) -> Result<RuleIndex, DeserializeError> {
        self.check()?;

        let mut rules = HashMap::with_capacity(self.actions.len());
        for CachedAction { name, rules: cached } in self.actions {
            let list: Vec<ActionRule> = cached
                .into_iter()
                .map(|rule| ActionRule {
                    action_name: name.clone(),
                    subject_type: rule.subject_type,
                    subject_kind: rule.subject_kind,
                    conditions: rule.conditions.into_iter().map(Condition::from).collect(),
                    allow: rule.allow,
                    priority: rule.priority,
                    source_law: rule.source_law,
                })
                .collect();
            rules.insert(name, list);
        }
        Ok(RuleIndex { rules })
    }
}

pub(crate) fn encode(index: &RuleIndex, source_text: Option<&str>) -> Result<Vec<u8>, SerializeError> {
    let cached = CachedIndex::capture(index, source_text);
    let payload = bincode::serde::encode_to_vec(&cached, bincode::config::standard())?;
    let header = Header::for_payload(&payload)?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    header.write_to(&mut out);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn open(bytes: &[u8]) -> Result<CachedIndex, DeserializeError> {
    let header = Header::read_from(bytes)?;
    if header.layout != LAYOUT_REVISION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: header.layout,
            supported: LAYOUT_REVISION,
        });
    }

    let body = &bytes[HEADER_LEN..];
    let Some(payload) = body.get(..header.payload_len as usize) else {
        return Err(DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: body.len(),
        });
    };
    if checksum(payload) != header.checksum {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (cached, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    Ok(cached)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<RuleIndex, DeserializeError> {
    open(bytes)?.restore()
}

/// The source digest stored in a blob, if one was embedded.
pub(crate) fn stored_digest(bytes: &[u8]) -> Result<Option<[u8; 32]>, DeserializeError> {
    Ok(open(bytes)?.source_digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: &str, allow: bool, conditions: Vec<Condition>) -> ActionRule {
        ActionRule {
            action_name: action.into(),
            subject_type: "Пользователь".into(),
            subject_kind: SubjectKind::Ordinary,
            conditions,
            allow,
            priority: u32::from(!allow),
            source_law: "law".into(),
        }
    }

    fn sample() -> RuleIndex {
        let mut index = RuleIndex::new();
        index.insert(rule("vote", true, vec![Condition::HasParty(true)]));
        index.insert(rule(
            "vote",
            false,
            vec![Condition::Rating {
                op: CompareOp::Lt,
                threshold: 3,
            }],
        ));
        index.insert(rule(
            "create_party",
            true,
            vec![Condition::Other {
                kind: "registered_before".into(),
                value: Value::String("2020-01-01".into()),
            }],
        ));
        index
    }

    #[test]
    fn index_survives_encoding() {
        let index = sample();
        let bytes = encode(&index, Some("law text")).unwrap();
        assert_eq!(decode(&bytes).unwrap(), index);
        assert_eq!(stored_digest(&bytes).unwrap(), Some(source_digest("law text")));
    }

    #[test]
    fn untagged_values_survive_encoding() {
        let mut index = RuleIndex::new();
        for value in [
            Value::Null,
            Value::Int(1),
            Value::Float(0.5),
            Value::Bool(true),
            Value::String("x".into()),
        ] {
            index.insert(rule(
                "vote",
                true,
                vec![Condition::Other {
                    kind: "custom".into(),
                    value,
                }],
            ));
        }
        let bytes = encode(&index, None).unwrap();
        assert_eq!(decode(&bytes).unwrap(), index);
        assert_eq!(stored_digest(&bytes).unwrap(), None);
    }

    #[test]
    fn output_is_deterministic() {
        let index = sample();
        assert_eq!(encode(&index, None).unwrap(), encode(&index.clone(), None).unwrap());
    }

    #[test]
    fn header_layout() {
        let payload = b"some payload";
        let header = Header::for_payload(payload).unwrap();
        let mut buf = Vec::new();
        header.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..4], b"STAT");
        assert_eq!(Header::read_from(&buf).unwrap(), header);
        assert_eq!(header.payload_len as usize, payload.len());
    }

    #[test]
    fn foreign_blob_is_rejected() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[..4].copy_from_slice(b"BAAD");
        assert!(matches!(Header::read_from(&buf), Err(DeserializeError::BadMagic)));
        assert!(matches!(
            Header::read_from(&buf[..10]),
            Err(DeserializeError::LengthMismatch { expected: 32, actual: 10 })
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = encode(&sample(), None).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DeserializeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = encode(&sample(), None).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode(&bytes), Err(DeserializeError::ChecksumMismatch)));
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = encode(&sample(), None).unwrap();
        bytes[4] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(DeserializeError::IncompatibleVersion { blob: 9, supported: 1 })
        ));
    }

    #[test]
    fn check_rejects_priority_inversion() {
        let mut ser = CachedIndex::capture(&sample(), None);
        let vote = ser.actions.iter_mut().find(|a| a.name == "vote").unwrap();
        vote.rules.reverse();
        assert!(matches!(ser.check(), Err(DeserializeError::Validation(_))));
    }

    #[test]
    fn check_rejects_count_mismatch() {
        let mut ser = CachedIndex::capture(&sample(), None);
        ser.rule_count += 1;
        assert!(matches!(ser.check(), Err(DeserializeError::Validation(_))));
    }

    #[test]
    fn check_rejects_duplicate_actions() {
        let mut ser = CachedIndex::capture(&sample(), None);
        ser.actions[1].name = ser.actions[0].name.clone();
        assert!(matches!(ser.check(), Err(DeserializeError::Validation(_))));
    }
}
