//! Key-sorted JSON encoding used for every text field of a cache row.
//!
//! The layout (`", "` between items, `": "` after keys) matches the rows
//! already present in existing databases, so lookups stay byte-exact.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io;

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serializes a [`Value`] with object keys in sorted order, regardless of
/// how the underlying map was built.
struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Sorted(item))?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut entries: Vec<_> = entries.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, &Sorted(value))?;
                }
                map.end()
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Encode `value` as key-sorted JSON with spaced separators.
pub fn to_canonical_string<T>(value: &T) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    Sorted(&value).serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(<serde_json::Error as serde::ser::Error>::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn keys_are_sorted_with_spaced_separators() {
        let value = json!({"b": true, "a": 1, "c": [1, 2]});
        assert_eq!(
            to_canonical_string(&value).unwrap(),
            r#"{"a": 1, "b": true, "c": [1, 2]}"#
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut first = HashMap::new();
        first.insert("tile", 4);
        first.insert("unroll", 2);
        let mut second = HashMap::new();
        second.insert("unroll", 2);
        second.insert("tile", 4);
        assert_eq!(
            to_canonical_string(&first).unwrap(),
            to_canonical_string(&second).unwrap()
        );
    }

    #[test]
    fn nested_objects_are_sorted() {
        let value = json!([{"z": 0, "y": {"q": 1, "p": 2}}]);
        assert_eq!(
            to_canonical_string(&value).unwrap(),
            r#"[{"y": {"p": 2, "q": 1}, "z": 0}]"#
        );
    }
}
