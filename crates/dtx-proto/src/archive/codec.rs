//! Keyed-archive encode/decode: the `NSKeyedArchiver`-shaped object graph
//! layered on top of [`super::bplist`].
//!
//! Every archived message is a top-level plist dict with `$archiver`,
//! `$version`, `$top` (a `{"root": UID}` pointer) and `$objects` (the flat
//! object table all `UID`s index into). Containers (`NSArray`,
//! `NSDictionary`) and any other class are themselves object-table entries
//! carrying a `$class` `UID` that points at a small class-metadata object
//! (`$classname`/`$classes`). This module builds that table on encode and
//! walks it on decode, dispatching unrecognized classes through a
//! [`ClassRegistry`].

use std::collections::HashMap;

use super::{
    bplist::{self, PNode},
    registry::ClassRegistry,
    value::Value,
};
use crate::error::{ProtocolError, Result};

const ARCHIVER_NAME: &str = "NSKeyedArchiver";
const ARCHIVER_VERSION: i64 = 100_000;
const NULL_OBJECT_INDEX: u64 = 0;

/// Encode a [`Value`] as a complete keyed-archive plist.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut builder = Builder::new();
    let root = builder.encode_value(value)?;

    let top = PNode::Dict(vec![
        (PNode::String("$archiver".to_string()), PNode::String(ARCHIVER_NAME.to_string())),
        (PNode::String("$version".to_string()), PNode::Int(ARCHIVER_VERSION)),
        (
            PNode::String("$top".to_string()),
            PNode::Dict(vec![(PNode::String("root".to_string()), PNode::Uid(root))]),
        ),
        (PNode::String("$objects".to_string()), PNode::Array(builder.objects)),
    ]);

    Ok(bplist::encode(&top))
}

/// Decode a keyed-archive plist produced by [`encode`] (or received from a
/// device), dispatching any non-primitive class through `registry`.
pub fn decode(bytes: &[u8], registry: &ClassRegistry) -> Result<Value> {
    let root = bplist::decode(bytes)?;
    let top = dict_field_map(&root)?;

    let Some(objects_node) = top.get("$objects") else {
        // Not a keyed archive at all (e.g. a bare selector string from a
        // minimal producer) — decode it as a standalone plist value.
        return leaf_to_value(&root);
    };
    let PNode::Array(objects) = objects_node else {
        return Err(ProtocolError::ArchiveDecode("$objects is not an array".to_string()));
    };

    let root_index = match top.get("$top") {
        Some(PNode::Dict(pairs)) => pairs
            .iter()
            .find(|(k, _)| matches!(k, PNode::String(s) if s == "root"))
            .and_then(|(_, v)| if let PNode::Uid(idx) = v { Some(*idx) } else { None })
            .ok_or_else(|| ProtocolError::ArchiveDecode("$top missing root UID".to_string()))?,
        _ => return Err(ProtocolError::ArchiveDecode("missing $top".to_string())),
    };

    let resolver = Resolver { objects, registry };
    resolver.resolve(root_index as usize)
}

/// Incrementally builds the flat `$objects` table while encoding a [`Value`]
/// graph, deduplicating class-metadata entries by class name.
struct Builder {
    objects: Vec<PNode>,
    class_index: HashMap<String, u64>,
}

impl Builder {
    fn new() -> Self {
        // Index 0 is always the archiver's null placeholder.
        Self { objects: vec![PNode::String("$null".to_string())], class_index: HashMap::new() }
    }

    fn push(&mut self, node: PNode) -> u64 {
        self.objects.push(node);
        (self.objects.len() - 1) as u64
    }

    fn class_entry(&mut self, class: &str, hierarchy: &[&str]) -> u64 {
        if let Some(&idx) = self.class_index.get(class) {
            return idx;
        }
        let classes = hierarchy.iter().map(|c| PNode::String((*c).to_string())).collect();
        let idx = self.push(PNode::Dict(vec![
            (PNode::String("$classes".to_string()), PNode::Array(classes)),
            (PNode::String("$classname".to_string()), PNode::String(class.to_string())),
        ]));
        self.class_index.insert(class.to_string(), idx);
        idx
    }

    fn encode_value(&mut self, value: &Value) -> Result<u64> {
        match value {
            Value::Null => Ok(NULL_OBJECT_INDEX),
            Value::Bool(b) => Ok(self.push(PNode::Bool(*b))),
            Value::Int(i) => Ok(self.push(PNode::Int(*i))),
            Value::Double(d) => Ok(self.push(PNode::Real(*d))),
            Value::String(s) => Ok(self.push(PNode::String(s.clone()))),
            Value::Date(d) => Ok(self.push(PNode::Date(*d))),
            Value::Array(items) => {
                let class = self.class_entry("NSArray", &["NSArray", "NSObject"]);
                let item_refs = items
                    .iter()
                    .map(|item| self.encode_value(item))
                    .collect::<Result<Vec<_>>>()?;
                let idx = self.push(PNode::Dict(vec![
                    (PNode::String("$class".to_string()), PNode::Uid(class)),
                    (
                        PNode::String("NS.objects".to_string()),
                        PNode::Array(item_refs.into_iter().map(PNode::Uid).collect()),
                    ),
                ]));
                Ok(idx)
            },
            Value::Dict(pairs) => {
                let class = self.class_entry("NSDictionary", &["NSDictionary", "NSObject"]);
                let key_refs = pairs
                    .iter()
                    .map(|(k, _)| self.encode_value(&Value::String(k.clone())))
                    .collect::<Result<Vec<_>>>()?;
                let value_refs = pairs
                    .iter()
                    .map(|(_, v)| self.encode_value(v))
                    .collect::<Result<Vec<_>>>()?;
                let idx = self.push(PNode::Dict(vec![
                    (PNode::String("$class".to_string()), PNode::Uid(class)),
                    (
                        PNode::String("NS.keys".to_string()),
                        PNode::Array(key_refs.into_iter().map(PNode::Uid).collect()),
                    ),
                    (
                        PNode::String("NS.objects".to_string()),
                        PNode::Array(value_refs.into_iter().map(PNode::Uid).collect()),
                    ),
                ]));
                Ok(idx)
            },
            Value::Opaque { class, plist } => {
                let class_ref = self.class_entry(class, &[class.as_str(), "NSObject"]);
                let mut fields = vec![(PNode::String("$class".to_string()), PNode::Uid(class_ref))];
                if let Value::Dict(pairs) = plist.as_ref() {
                    for (key, value) in pairs {
                        let value_ref = self.encode_value(value)?;
                        fields.push((PNode::String(key.clone()), PNode::Uid(value_ref)));
                    }
                } else {
                    let value_ref = self.encode_value(plist)?;
                    fields.push((PNode::String("NS.data".to_string()), PNode::Uid(value_ref)));
                }
                Ok(self.push(PNode::Dict(fields)))
            },
        }
    }
}

struct Resolver<'a> {
    objects: &'a [PNode],
    registry: &'a ClassRegistry,
}

impl<'a> Resolver<'a> {
    fn resolve(&self, index: usize) -> Result<Value> {
        let node = self
            .objects
            .get(index)
            .ok_or_else(|| ProtocolError::ArchiveDecode(format!("object index {index} out of range")))?;

        match node {
            PNode::String(s) if s == "$null" => Ok(Value::Null),
            PNode::Dict(pairs) => self.resolve_dict(pairs),
            other => leaf_to_value(other),
        }
    }

    fn resolve_dict(&self, pairs: &[(PNode, PNode)]) -> Result<Value> {
        let fields = dict_pairs_map(pairs);

        let Some(PNode::Uid(class_idx)) = fields.get("$class") else {
            // No class metadata: decode as a plain inline dict (defensive
            // fallback for producers that skip the archiver envelope).
            let mut out = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let PNode::String(key) = key else {
                    return Err(ProtocolError::ArchiveDecode("dict key is not a string".to_string()));
                };
                out.push((key.clone(), self.resolve_field(value)?));
            }
            return Ok(Value::Dict(out));
        };

        let class_name = self.class_name(*class_idx)?;

        match class_name.as_str() {
            "NSDictionary" | "NSMutableDictionary" => {
                let keys = self.resolve_uid_array(fields.get("NS.keys"))?;
                let values = self.resolve_uid_array(fields.get("NS.objects"))?;
                let mut out = Vec::with_capacity(keys.len());
                for (key, value) in keys.into_iter().zip(values) {
                    let Value::String(key) = key else {
                        return Err(ProtocolError::ArchiveDecode(
                            "NSDictionary key did not decode to a string".to_string(),
                        ));
                    };
                    out.push((key, value));
                }
                Ok(Value::Dict(out))
            },
            "NSArray" | "NSMutableArray" | "NSSet" | "NSMutableSet" => {
                Ok(Value::Array(self.resolve_uid_array(fields.get("NS.objects"))?))
            },
            other_class => {
                let mut body_fields = Vec::new();
                for (key, value) in pairs {
                    let PNode::String(key) = key else { continue };
                    if key == "$class" {
                        continue;
                    }
                    body_fields.push((key.clone(), self.resolve_field(value)?));
                }
                let body = Value::Dict(body_fields);

                self.registry.decode(other_class, body).ok_or_else(|| {
                    ProtocolError::ArchiveClassMissing {
                        class: other_class.to_string(),
                        plist_dump: format!("{pairs:?}"),
                    }
                })
            },
        }
    }

    /// Resolve a field value that may be a `UID` reference into the object
    /// table, or (for defensively-decoded inline dicts) a plain leaf.
    fn resolve_field(&self, node: &PNode) -> Result<Value> {
        match node {
            PNode::Uid(idx) => self.resolve(*idx as usize),
            other => leaf_to_value(other),
        }
    }

    fn resolve_uid_array(&self, node: Option<&PNode>) -> Result<Vec<Value>> {
        let Some(PNode::Array(refs)) = node else {
            return Err(ProtocolError::ArchiveDecode("expected an array of object references".to_string()));
        };
        refs.iter().map(|r| self.resolve_field(r)).collect()
    }

    fn class_name(&self, class_idx: u64) -> Result<String> {
        let node = self
            .objects
            .get(class_idx as usize)
            .ok_or_else(|| ProtocolError::ArchiveDecode("class metadata index out of range".to_string()))?;
        let PNode::Dict(pairs) = node else {
            return Err(ProtocolError::ArchiveDecode("class metadata is not a dict".to_string()));
        };
        let fields = dict_pairs_map(pairs);
        match fields.get("$classname") {
            Some(PNode::String(name)) => Ok(name.clone()),
            _ => Err(ProtocolError::ArchiveDecode("class metadata missing $classname".to_string())),
        }
    }
}

fn dict_field_map(node: &PNode) -> Result<HashMap<String, PNode>> {
    let PNode::Dict(pairs) = node else {
        return Err(ProtocolError::ArchiveDecode("archive root is not a dict".to_string()));
    };
    Ok(dict_pairs_map(pairs))
}

fn dict_pairs_map(pairs: &[(PNode, PNode)]) -> HashMap<String, PNode> {
    pairs
        .iter()
        .filter_map(|(k, v)| if let PNode::String(key) = k { Some((key.clone(), v.clone())) } else { None })
        .collect()
}

fn leaf_to_value(node: &PNode) -> Result<Value> {
    match node {
        PNode::Null => Ok(Value::Null),
        PNode::Bool(b) => Ok(Value::Bool(*b)),
        PNode::Int(i) => Ok(Value::Int(*i)),
        PNode::Real(r) => Ok(Value::Double(*r)),
        PNode::Date(d) => Ok(Value::Date(*d)),
        PNode::String(s) if s == "$null" => Ok(Value::Null),
        PNode::String(s) => Ok(Value::String(s.clone())),
        other => Err(ProtocolError::ArchiveDecode(format!("unsupported leaf plist node: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn round_trip_null() {
        let registry = ClassRegistry::with_builtins();
        let encoded = encode(&Value::Null).unwrap();
        assert_eq!(decode(&encoded, &registry).unwrap(), Value::Null);
    }

    #[test]
    fn round_trip_string() {
        let registry = ClassRegistry::with_builtins();
        let value = Value::String("_notifyOfPublishedCapabilities:".to_string());
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded, &registry).unwrap(), value);
    }

    #[test]
    fn round_trip_nested_dict_and_array() {
        let registry = ClassRegistry::with_builtins();
        let value = Value::Dict(vec![
            ("pid".to_string(), Value::Int(1234)),
            (
                "args".to_string(),
                Value::Array(vec![Value::String("-x".to_string()), Value::Bool(true), Value::Null]),
            ),
        ]);
        let encoded = encode(&value).unwrap();
        assert_eq!(decode(&encoded, &registry).unwrap(), value);
    }

    #[test]
    fn shared_class_metadata_is_deduplicated() {
        let value = Value::Array(vec![
            Value::Dict(vec![("a".to_string(), Value::Int(1))]),
            Value::Dict(vec![("b".to_string(), Value::Int(2))]),
        ]);
        let mut builder = Builder::new();
        builder.encode_value(&value).unwrap();
        let class_entries =
            builder.objects.iter().filter(|o| matches!(o, PNode::Dict(p) if p.iter().any(|(k, _)| matches!(k, PNode::String(s) if s == "$classname")))).count();
        // NSArray + NSDictionary metadata, each created once despite two dicts.
        assert_eq!(class_entries, 2);
    }

    #[test]
    fn unregistered_class_is_an_error() {
        let registry = ClassRegistry::new();
        let value = Value::Opaque {
            class: "DTSomeUnknownClass".to_string(),
            plist: Box::new(Value::Dict(vec![("x".to_string(), Value::Int(1))])),
        };
        let encoded = encode(&value).unwrap();
        let err = decode(&encoded, &registry).unwrap_err();
        assert!(matches!(err, ProtocolError::ArchiveClassMissing { class, .. } if class == "DTSomeUnknownClass"));
    }

    #[test]
    fn sysmon_class_decodes_through_registry() {
        let registry = ClassRegistry::with_builtins();
        let value = Value::Opaque {
            class: "DTSysmonTapMessage".to_string(),
            plist: Box::new(Value::Dict(vec![("CPUCount".to_string(), Value::Int(8))])),
        };
        let encoded = encode(&value).unwrap();
        let decoded = decode(&encoded, &registry).unwrap();
        assert_eq!(decoded, Value::Dict(vec![("CPUCount".to_string(), Value::Int(8))]));
    }

    fn arbitrary_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|i| Value::Int(i64::from(i))),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,8}", inner), 0..4).prop_map(Value::Dict),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_value_round_trip(value in arbitrary_value()) {
            let registry = ClassRegistry::with_builtins();
            let encoded = encode(&value).expect("encode should succeed");
            let decoded = decode(&encoded, &registry).expect("decode should succeed");
            prop_assert_eq!(decoded, value);
        }
    }
}
