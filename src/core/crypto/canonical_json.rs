// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! A single canonical JSON serialization used everywhere this crate needs
//! byte-identical hashing: the audit chain's `chainHash`, the JWT header
//! and payload, and the RFC 7638 JWK thumbprint. One implementation shared
//! by all three call sites means they cannot silently drift from each
//! other.
//!
//! Canonical form: object keys sorted bytewise ascending, no insignificant
//! whitespace, integers printed without exponents or trailing `.0`, and no
//! floating-point values (this domain has none). `null` is a valid value
//! when written explicitly, but optional fields should be omitted by
//! callers rather than serialized as `null`.

use serde_json::Value;

/// Serialize `value` to its canonical byte form.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &serde_json::Number, out: &mut String) {
    // This domain only ever canonicalizes integers (seqNum, timestamps,
    // counters). Render via the shortest round-tripping decimal form
    // serde_json already produces for integers; floats are rejected by
    // convention at call sites, not representable in this codebase's data.
    out.push_str(&n.to_string());
}

fn write_string(s: &str, out: &mut String) {
    // serde_json's string `Display`/`to_string` for a `Value::String`
    // already produces a minimal, correctly escaped JSON string literal;
    // reuse it rather than re-implementing JSON string escaping.
    let quoted = serde_json::to_string(s).expect("string serialization cannot fail");
    out.push_str(&quoted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let v = json!({"b": 1, "a": 2, "c": 3});
        assert_eq!(canonicalize(&v), r#"{"a":2,"b":1,"c":3}"#);
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let v = json!({"outer": {"z": 1, "a": {"y": 2, "x": 1}}});
        assert_eq!(canonicalize(&v), r#"{"outer":{"a":{"x":1,"y":2},"z":1}}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonicalize(&v), "[3,1,2]");
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"k": "a\"b\\c\n"});
        assert_eq!(canonicalize(&v), r#"{"k":"a\"b\\c\n"}"#);
    }

    #[test]
    fn is_deterministic_across_insertion_order() {
        let a = json!({"x": 1, "y": 2});
        let mut map2 = serde_json::Map::new();
        map2.insert("y".to_string(), json!(2));
        map2.insert("x".to_string(), json!(1));
        let b = Value::Object(map2);
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn no_insignificant_whitespace() {
        let v = json!({"a": [1, 2, {"b": "c"}]});
        let out = canonicalize(&v);
        assert!(!out.contains(' '));
        assert!(!out.contains('\n'));
    }
}
