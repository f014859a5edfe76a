//! Key-value entries as a closed set of value types
//!
//! A key's type tag is read once and decides both the read accessor and the
//! write commands. Every branch is an exhaustive `match`, so a new variant
//! cannot be forgotten on either side.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{MigrationError, Result};

/// Binary-safe key, value, member or field
///
/// Serialized as a plain string when the bytes are valid UTF-8 and as
/// `{"hex": "..."}` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Blob(Vec<u8>);

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<String> for Blob {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&str> for Blob {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl PartialEq<str> for Blob {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Blob {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

/// Lossy text form, for logs and error messages
impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EncodedBlob {
    Text(String),
    Hex { hex: String },
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => EncodedBlob::Hex {
                hex: hex::encode(&self.0),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match EncodedBlob::deserialize(deserializer)? {
            EncodedBlob::Text(text) => Ok(Self(text.into_bytes())),
            EncodedBlob::Hex { hex } => hex::decode(hex).map(Self).map_err(serde::de::Error::custom),
        }
    }
}

/// Type tag of a key as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    List,
    Set,
    Hash,
    SortedSet,
}

impl KeyType {
    /// Parse a `TYPE` reply; `none` means the key no longer exists
    pub fn from_type_name(key: &Blob, type_name: &str) -> Result<Option<Self>> {
        match type_name {
            "string" => Ok(Some(KeyType::String)),
            "list" => Ok(Some(KeyType::List)),
            "set" => Ok(Some(KeyType::Set)),
            "hash" => Ok(Some(KeyType::Hash)),
            "zset" => Ok(Some(KeyType::SortedSet)),
            "none" => Ok(None),
            other => Err(MigrationError::UnsupportedKeyType {
                key: key.to_string(),
                type_name: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Hash => "hash",
            KeyType::SortedSet => "zset",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorted-set member with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: Blob,
    pub score: f64,
}

/// A key's value in its type-native shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum KeyValue {
    String(Blob),
    List(Vec<Blob>),
    /// Members in ascending byte order
    Set(Vec<Blob>),
    /// Field/value pairs in ascending field order
    Hash(Vec<(Blob, Blob)>),
    #[serde(rename = "zset")]
    SortedSet(Vec<ScoredMember>),
}

impl KeyValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::String(_) => KeyType::String,
            KeyValue::List(_) => KeyType::List,
            KeyValue::Set(_) => KeyType::Set,
            KeyValue::Hash(_) => KeyType::Hash,
            KeyValue::SortedSet(_) => KeyType::SortedSet,
        }
    }
}

/// One key ready to transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: Blob,
    #[serde(flatten)]
    pub value: KeyValue,
    /// Remaining time-to-live in milliseconds; `None` for persistent keys
    #[serde(rename = "ttlMs")]
    pub ttl_ms: Option<u64>,
}

/// Single write command against a key-value store
#[derive(Debug, Clone, PartialEq)]
pub enum KeyWrite {
    Delete { key: Blob },
    Set { key: Blob, value: Blob },
    RightPush { key: Blob, items: Vec<Blob> },
    SetAdd { key: Blob, members: Vec<Blob> },
    HashSet { key: Blob, fields: Vec<(Blob, Blob)> },
    SortedSetAdd { key: Blob, members: Vec<ScoredMember> },
    ExpireMillis { key: Blob, millis: u64 },
}

impl KeyEntry {
    /// Commands that reproduce this entry on a target
    ///
    /// Lists, sets and sorted sets replace the target key (delete, then
    /// repopulate) so a previous partial run leaves no stale elements.
    /// Strings and hashes are written as overwrite/upsert. Any TTL is
    /// applied after the value write; a key the source reports with 0 ms
    /// left still gets the shortest expiry instead of becoming persistent.
    pub fn write_ops(&self) -> Vec<KeyWrite> {
        let key = self.key.clone();
        let mut ops = Vec::with_capacity(3);

        match &self.value {
            KeyValue::String(value) => ops.push(KeyWrite::Set {
                key: key.clone(),
                value: value.clone(),
            }),
            KeyValue::List(items) => {
                ops.push(KeyWrite::Delete { key: key.clone() });
                if !items.is_empty() {
                    ops.push(KeyWrite::RightPush {
                        key: key.clone(),
                        items: items.clone(),
                    });
                }
            },
            KeyValue::Set(members) => {
                ops.push(KeyWrite::Delete { key: key.clone() });
                if !members.is_empty() {
                    ops.push(KeyWrite::SetAdd {
                        key: key.clone(),
                        members: members.clone(),
                    });
                }
            },
            KeyValue::Hash(fields) => {
                if !fields.is_empty() {
                    ops.push(KeyWrite::HashSet {
                        key: key.clone(),
                        fields: fields.clone(),
                    });
                }
            },
            KeyValue::SortedSet(members) => {
                ops.push(KeyWrite::Delete { key: key.clone() });
                if !members.is_empty() {
                    ops.push(KeyWrite::SortedSetAdd {
                        key: key.clone(),
                        members: members.clone(),
                    });
                }
            },
        }

        if let Some(millis) = self.ttl_ms {
            ops.push(KeyWrite::ExpireMillis {
                key,
                millis: millis.max(1),
            });
        }

        ops
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(value: KeyValue, ttl_ms: Option<u64>) -> KeyEntry {
        KeyEntry {
            key: Blob::from("k"),
            value,
            ttl_ms,
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(KeyType::from_type_name(&Blob::from("k"), "zset").unwrap(), Some(KeyType::SortedSet));
        assert_eq!(KeyType::from_type_name(&Blob::from("k"), "none").unwrap(), None);

        let err = KeyType::from_type_name(&Blob::from("events"), "stream").unwrap_err();
        assert!(matches!(
            err,
            MigrationError::UnsupportedKeyType { ref type_name, .. } if type_name == "stream"
        ));
    }

    #[test]
    fn test_string_overwrites_without_delete() {
        let ops = entry(KeyValue::String("v".into()), None).write_ops();
        assert_eq!(
            ops,
            vec![KeyWrite::Set {
                key: "k".into(),
                value: "v".into()
            }]
        );
    }

    #[test]
    fn test_collections_replace_target_key() {
        let list = entry(KeyValue::List(vec!["a".into(), "b".into()]), None).write_ops();
        assert!(matches!(list[0], KeyWrite::Delete { .. }));
        assert!(matches!(list[1], KeyWrite::RightPush { ref items, .. } if items.len() == 2));

        let set = entry(KeyValue::Set(vec!["x".into()]), None).write_ops();
        assert!(matches!(set[0], KeyWrite::Delete { .. }));

        let zset = entry(
            KeyValue::SortedSet(vec![ScoredMember {
                member: "m".into(),
                score: 1.5,
            }]),
            None,
        )
        .write_ops();
        assert!(matches!(zset[0], KeyWrite::Delete { .. }));
        assert!(matches!(zset[1], KeyWrite::SortedSetAdd { .. }));
    }

    #[test]
    fn test_hash_upserts_without_delete() {
        let fields = vec![("a".into(), "1".into()), ("b".into(), "2".into())];
        let ops = entry(KeyValue::Hash(fields), None).write_ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], KeyWrite::HashSet { ref fields, .. } if fields.len() == 2));
    }

    #[test]
    fn test_ttl_is_applied_last() {
        let ops = entry(KeyValue::List(vec!["a".into()]), Some(600_000)).write_ops();
        assert_eq!(
            ops.last(),
            Some(&KeyWrite::ExpireMillis {
                key: "k".into(),
                millis: 600_000
            })
        );

        let ops = entry(KeyValue::String("v".into()), None).write_ops();
        assert!(!ops.iter().any(|op| matches!(op, KeyWrite::ExpireMillis { .. })));
    }

    #[test]
    fn test_expiring_key_never_becomes_persistent() {
        let ops = entry(KeyValue::String("v".into()), Some(350)).write_ops();
        assert_eq!(ops.last(), Some(&KeyWrite::ExpireMillis { key: "k".into(), millis: 350 }));

        // PTTL reports 0 in the last millisecond before expiry
        let ops = entry(KeyValue::String("v".into()), Some(0)).write_ops();
        assert_eq!(ops.last(), Some(&KeyWrite::ExpireMillis { key: "k".into(), millis: 1 }));
    }

    #[test]
    fn test_empty_collection_only_deletes() {
        let ops = entry(KeyValue::Set(Vec::new()), None).write_ops();
        assert_eq!(ops, vec![KeyWrite::Delete { key: "k".into() }]);
    }

    #[test]
    fn test_inventory_shape() {
        let json = serde_json::to_value(entry(KeyValue::SortedSet(vec![]), Some(30_000))).unwrap();
        assert_eq!(json["key"], "k");
        assert_eq!(json["type"], "zset");
        assert_eq!(json["ttlMs"], 30_000);
        assert!(json["value"].is_array());
    }

    #[test]
    fn test_binary_payloads_survive_the_inventory() {
        let original = KeyEntry {
            key: Blob::from(vec![0x6b, 0xff]),
            value: KeyValue::Hash(vec![
                (Blob::from(vec![0xfe, 0x00]), Blob::from("plain")),
                (Blob::from("name"), Blob::from(vec![0x80, 0x81, 0x82])),
            ]),
            ttl_ms: None,
        };

        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["key"]["hex"], "6bff");
        assert_eq!(json["value"][0][0]["hex"], "fe00");
        assert_eq!(json["value"][0][1], "plain");

        let restored: KeyEntry = serde_json::from_value(json).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_invalid_hex_is_rejected() {
        let err = serde_json::from_str::<Blob>(r#"{"hex":"zz"}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid character"));
    }
}
