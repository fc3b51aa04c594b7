//! `application/x-www-form-urlencoded` via `url::form_urlencoded`.
//!
//! Nested maps use bracket keys (`owner[id]=42`). List items use an empty
//! bracket (`tag[]=a&tag[]=b`), or an index when the item is itself a
//! container (`items[0][sku]=x`). Empty containers are written as bare keys
//! with no `=`: `tag[]` for an empty list, `owner{}` for an empty map.
//!
//! Form bodies carry no scalar types. Every scalar decodes as a string
//! (`42` comes back as `"42"`, `true` as `"true"`) and nulls are dropped, so
//! only trees of strings round-trip exactly. A plain key repeated without
//! brackets (`tag=a&tag=b`, as browsers send it) decodes as a list.
//! An empty or decimal bracket key followed by further brackets is read as a
//! list position, so a map keyed `"0"` holding a container decodes as a list.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::message::codec::{ValueReader, ValueWriter};
use crate::value::Value;

const EMPTY_LIST: &str = "[]";
const EMPTY_MAP: &str = "{}";

#[derive(Debug, Clone, Copy, Default)]
pub struct FormCodec;

type Serializer<'a> = form_urlencoded::Serializer<'a, String>;

/// Encode a map as a form body.
pub fn encode(value: &Value) -> Result<String> {
    let mut serializer = Serializer::new(String::new());
    match value {
        Value::Null => {}
        Value::Map(members) => {
            for (key, member) in members {
                flatten(&mut serializer, key.clone(), member);
            }
        }
        other => {
            return Err(Error::codec(format!(
                "form: top-level value must be an object, not {}",
                other.type_name()
            )))
        }
    }
    Ok(serializer.finish())
}

fn flatten(serializer: &mut Serializer<'_>, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Map(members) if members.is_empty() => {
            serializer.append_key_only(&format!("{}{}", key, EMPTY_MAP));
        }
        Value::Map(members) => {
            for (sub, member) in members {
                flatten(serializer, format!("{}[{}]", key, sub), member);
            }
        }
        Value::List(items) if items.is_empty() => {
            serializer.append_key_only(&format!("{}{}", key, EMPTY_LIST));
        }
        Value::List(items) => {
            // nulls are skipped, so positions count emitted items only
            let mut position = 0usize;
            for item in items {
                match item {
                    Value::Null => continue,
                    Value::Map(_) | Value::List(_) => {
                        flatten(serializer, format!("{}[{}]", key, position), item)
                    }
                    scalar => {
                        let text = scalar.to_scalar_string().unwrap_or_default();
                        serializer.append_pair(&format!("{}[]", key), &text);
                    }
                }
                position += 1;
            }
        }
        scalar => {
            serializer.append_pair(&key, &scalar.to_scalar_string().unwrap_or_default());
        }
    }
}

/// What a single form pair puts at the end of its key path.
enum Leaf {
    Text(String),
    EmptyList,
    EmptyMap,
}

/// Decode a form body into a map.
pub fn decode(body: &[u8]) -> Result<Value> {
    let mut root = Value::Map(BTreeMap::new());
    for raw in body.split(|b| *b == b'&').filter(|raw| !raw.is_empty()) {
        let Some((key, value)) = form_urlencoded::parse(raw).next() else {
            continue;
        };
        let bare = !raw.contains(&b'=');

        let (key, leaf) = if bare && key.ends_with(EMPTY_MAP) {
            (&key[..key.len() - EMPTY_MAP.len()], Leaf::EmptyMap)
        } else if bare && key.ends_with(EMPTY_LIST) {
            (&key[..key.len() - EMPTY_LIST.len()], Leaf::EmptyList)
        } else {
            (&key[..], Leaf::Text(value.into_owned()))
        };
        if key.is_empty() {
            continue;
        }
        insert_path(&mut root, &split_key(key), leaf)?;
    }
    Ok(root)
}

/// `a[b][c]` → `["a", "b", "c"]`. Malformed brackets keep the key literal.
fn split_key(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    if open == 0 || !key.ends_with(']') {
        return vec![key.to_string()];
    }
    let mut path = vec![key[..open].to_string()];
    for part in key[open + 1..key.len() - 1].split("][") {
        if part.contains('[') || part.contains(']') {
            return vec![key.to_string()];
        }
        path.push(part.to_string());
    }
    path
}

fn is_position(segment: &str) -> bool {
    segment.is_empty() || segment.bytes().all(|b| b.is_ascii_digit())
}

/// Container created for the first segment of `rest`.
fn container_for(rest: &[String], leaf: &Leaf) -> Value {
    match rest {
        [] => match leaf {
            Leaf::EmptyList => Value::List(Vec::new()),
            _ => Value::Map(BTreeMap::new()),
        },
        [only] if only.is_empty() => Value::List(Vec::new()),
        // only containers are written at an index
        [only] if is_position(only) && !matches!(leaf, Leaf::Text(_)) => Value::List(Vec::new()),
        [_] => Value::Map(BTreeMap::new()),
        [first, ..] if is_position(first) => Value::List(Vec::new()),
        _ => Value::Map(BTreeMap::new()),
    }
}

fn insert_path(node: &mut Value, path: &[String], leaf: Leaf) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };

    match node {
        Value::Map(members) if rest.is_empty() => place(members, head, leaf),
        Value::Map(members) => {
            let child = members
                .entry(head.clone())
                .or_insert_with(|| container_for(rest, &leaf));
            insert_path(child, rest, leaf)
        }
        Value::List(items) if head.is_empty() => match (rest.is_empty(), leaf) {
            (true, Leaf::Text(text)) => {
                items.push(Value::String(text));
                Ok(())
            }
            // `tag[]` with no value: the list itself is the leaf
            (true, Leaf::EmptyList) => Ok(()),
            _ => Err(conflict(head)),
        },
        Value::List(items) if is_position(head) => {
            let index: usize = head.parse().map_err(|_| conflict(head))?;
            if index == items.len() {
                items.push(match (rest.is_empty(), &leaf) {
                    (true, Leaf::Text(_)) => Value::Null,
                    _ => container_for(rest, &leaf),
                });
            }
            let Some(child) = items.get_mut(index) else {
                return Err(conflict(head));
            };
            match (rest.is_empty(), leaf) {
                (true, Leaf::Text(text)) => {
                    *child = Value::String(text);
                    Ok(())
                }
                (true, Leaf::EmptyList) if matches!(child, Value::List(_)) => Ok(()),
                (true, Leaf::EmptyMap) if matches!(child, Value::Map(_)) => Ok(()),
                (true, _) => Err(conflict(head)),
                (false, leaf) => insert_path(child, rest, leaf),
            }
        }
        _ => Err(conflict(head)),
    }
}

/// Put `leaf` directly under `key` in a map.
fn place(members: &mut BTreeMap<String, Value>, key: &str, leaf: Leaf) -> Result<()> {
    match (members.get_mut(key), leaf) {
        (None, Leaf::Text(text)) => {
            members.insert(key.to_string(), Value::String(text));
        }
        (None, Leaf::EmptyList) => {
            members.insert(key.to_string(), Value::List(Vec::new()));
        }
        (None, Leaf::EmptyMap) => {
            members.insert(key.to_string(), Value::Map(BTreeMap::new()));
        }
        (Some(Value::List(items)), Leaf::Text(text)) => items.push(Value::String(text)),
        (Some(existing @ Value::String(_)), Leaf::Text(text)) => {
            let first = std::mem::take(existing);
            *existing = Value::List(vec![first, Value::String(text)]);
        }
        (Some(Value::List(_)), Leaf::EmptyList) | (Some(Value::Map(_)), Leaf::EmptyMap) => {}
        _ => return Err(conflict(key)),
    }
    Ok(())
}

fn conflict(key: &str) -> Error {
    Error::codec(format!("form: key {:?} is used with two different shapes", key))
}

impl ValueWriter for FormCodec {
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()> {
        out.write_all(encode(value)?.as_bytes())?;
        Ok(())
    }
}

impl ValueReader for FormCodec {
    fn read_value(&self, input: &mut dyn Read) -> Result<Value> {
        let mut body = Vec::new();
        input.read_to_end(&mut body)?;
        decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Value {
        Value::list(items.iter().map(|s| Value::from(*s)).collect::<Vec<_>>())
    }

    #[test]
    fn encodes_nested_and_list_keys() {
        let value = Value::map([
            ("q", Value::from("a b&c")),
            ("tag", strings(&["x", "y"])),
            ("owner", Value::map([("id", Value::from(42))])),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            "owner%5Bid%5D=42&q=a+b%26c&tag%5B%5D=x&tag%5B%5D=y"
        );
    }

    #[test]
    fn short_and_empty_lists_keep_their_shape() {
        let value = Value::map([
            ("none", Value::list(vec![])),
            ("one", strings(&["x"])),
            ("blank", strings(&[""])),
            ("meta", Value::map([("labels", Value::list(vec![]))])),
        ]);
        let body = encode(&value).unwrap();
        assert_eq!(decode(body.as_bytes()).unwrap(), value, "{body}");
    }

    #[test]
    fn empty_maps_and_containers_in_lists_roundtrip() {
        let value = Value::map([
            ("empty", Value::map::<&str, _>([])),
            (
                "items",
                Value::list(vec![
                    Value::map([("sku", Value::from("a1")), ("opts", strings(&["big"]))]),
                    Value::from("loose"),
                    Value::list(vec![Value::list(vec![]), strings(&["deep"])]),
                    Value::map::<&str, _>([]),
                ]),
            ),
        ]);
        let body = encode(&value).unwrap();
        assert_eq!(decode(body.as_bytes()).unwrap(), value, "{body}");
    }

    #[test]
    fn scalars_decode_as_strings() {
        let value = decode(b"n=1&flag=true&owner[id]=42").unwrap();
        assert_eq!(value.get("n"), Some(&Value::from("1")));
        assert_eq!(value.get("owner").and_then(|o| o.get("id")), Some(&Value::from("42")));
    }

    #[test]
    fn repeated_plain_keys_become_a_list() {
        let value = decode(b"tag=a&tag=b&solo=c").unwrap();
        assert_eq!(value.get("tag"), Some(&strings(&["a", "b"])));
        assert_eq!(value.get("solo"), Some(&Value::from("c")));
    }

    #[test]
    fn malformed_brackets_stay_literal() {
        assert_eq!(split_key("a[b"), vec!["a[b"]);
        assert_eq!(split_key("[x]"), vec!["[x]"]);
        assert_eq!(split_key("a[b][c]"), vec!["a", "b", "c"]);
    }

    #[test]
    fn conflicting_shapes_rejected() {
        assert!(matches!(decode(b"a=1&a[b]=2"), Err(Error::Codec(_))));
        assert!(matches!(decode(b"a[]=1&a[b]=2"), Err(Error::Codec(_))));
        assert!(matches!(decode(b"a[0][x]=1&a[5][x]=2"), Err(Error::Codec(_))));
    }

    #[test]
    fn non_map_top_level_rejected() {
        assert!(encode(&Value::from("x")).is_err());
        assert_eq!(encode(&Value::Null).unwrap(), "");
        assert_eq!(decode(b"").unwrap(), Value::Map(BTreeMap::new()));
    }
}
