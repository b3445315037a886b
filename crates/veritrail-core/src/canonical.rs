//! # Canonical JSON Bytes
//!
//! Deterministic byte serialization of JSON values — the single sanctioned
//! input to every digest computation in the workspace.
//!
//! ## Canonical Form
//!
//! - Object keys sorted lexicographically by Unicode code point, at every
//!   nesting level.
//! - Separators `","` and `":"` with no whitespace.
//! - UTF-8 output; non-ASCII characters are emitted raw, never `\u`-escaped.
//! - Control characters use the conventional short escapes (`\n`, `\t`,
//!   `\r`, `\b`, `\f`) and lowercase `\u00xx` for the rest; `"` and `\` are
//!   escaped.
//! - Integers rendered verbatim; floats in their shortest round-trip form.
//! - `null` is retained, never dropped.
//!
//! Any independent implementation that follows these rules produces
//! bit-identical bytes for the same semantic value. Verification across
//! deployments depends on this: a digest recomputed elsewhere must match
//! byte-for-byte.
//!
//! ## Construction Invariant
//!
//! [`CanonicalBytes`] can only be built through [`CanonicalBytes::new`],
//! so every digest in the system is guaranteed to have passed through the
//! same canonicalization path.

use serde_json::Value;

/// Canonically serialized JSON bytes.
///
/// The newtype is the proof that canonicalization happened: hashing
/// functions accept `CanonicalBytes`, not raw `&[u8]`, wherever a JSON
/// value is being fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Canonicalize a JSON value.
    pub fn new(value: &Value) -> Self {
        let mut out = String::new();
        write_canonical(value, &mut out);
        Self(out.into_bytes())
    }

    /// The canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The canonical form as a string (always valid UTF-8 by construction).
    pub fn as_str(&self) -> &str {
        // Built from a String in `new`.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json renders integers verbatim and floats via shortest
        // round-trip formatting, matching the canonical-form contract.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            // Non-ASCII passes through unescaped.
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: &Value) -> String {
        CanonicalBytes::new(v).as_str().to_string()
    }

    #[test]
    fn keys_sorted_at_every_level() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": 3});
        assert_eq!(canon(&v), r#"{"a":3,"z":{"a":2,"b":1}}"#);
    }

    #[test]
    fn no_whitespace_separators() {
        let v = json!({"a": [1, 2, 3], "b": true});
        assert_eq!(canon(&v), r#"{"a":[1,2,3],"b":true}"#);
    }

    #[test]
    fn null_is_retained() {
        let v = json!({"user_id": null});
        assert_eq!(canon(&v), r#"{"user_id":null}"#);
    }

    #[test]
    fn non_ascii_unescaped() {
        let v = json!({"note": "café", "n": 1.5});
        assert_eq!(canon(&v), "{\"n\":1.5,\"note\":\"café\"}");
    }

    #[test]
    fn control_characters_escaped() {
        let v = json!({"s": "a\nb\tc\u{1}"});
        assert_eq!(canon(&v), r#"{"s":"a\nb\tc\u0001"}"#);
    }

    #[test]
    fn quotes_and_backslashes_escaped() {
        let v = json!({"s": "he said \"hi\" \\ bye"});
        assert_eq!(canon(&v), r#"{"s":"he said \"hi\" \\ bye"}"#);
    }

    #[test]
    fn integers_verbatim() {
        let v = json!({"big": 9007199254740993i64, "neg": -42});
        assert_eq!(canon(&v), r#"{"big":9007199254740993,"neg":-42}"#);
    }

    #[test]
    fn float_shortest_roundtrip() {
        let v = json!({"x": 0.1});
        assert_eq!(canon(&v), r#"{"x":0.1}"#);
    }

    #[test]
    fn key_order_does_not_affect_output() {
        let v1 = json!({"z": 1, "a": 2, "m": 3});
        let v2 = json!({"m": 3, "z": 1, "a": 2});
        assert_eq!(canon(&v1), canon(&v2));
    }

    #[test]
    fn empty_object_and_array() {
        assert_eq!(canon(&json!({})), "{}");
        assert_eq!(canon(&json!([])), "[]");
    }

    #[test]
    fn deterministic_across_calls() {
        let v = json!({
            "decision_id": "dec_4f2a9b1c8d3e",
            "scores": [0.25, 0.75],
            "labels": {"primary": "approve", "secondary": null}
        });
        assert_eq!(canon(&v), canon(&v));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 àé☃]{0,12}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn canonical_bytes_are_deterministic(v in arb_value()) {
                let a = CanonicalBytes::new(&v);
                let b = CanonicalBytes::new(&v);
                prop_assert_eq!(a.as_bytes(), b.as_bytes());
            }

            #[test]
            fn canonical_form_reparses_to_same_value(v in arb_value()) {
                let bytes = CanonicalBytes::new(&v);
                let reparsed: Value = serde_json::from_slice(bytes.as_bytes()).unwrap();
                prop_assert_eq!(reparsed, v);
            }
        }
    }
}
