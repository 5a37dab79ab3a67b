//! Deterministic argument signatures.
//!
//! Two calls with semantically identical arguments must map to the same
//! composite key regardless of map-key insertion order, so the signature is a
//! canonical JSON rendering of the serialized argument value: object keys are
//! emitted in sorted order at every nesting level, arrays keep their order.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Render a stable signature string for an argument value.
pub fn argument_signature<A: Serialize>(args: &A) -> Result<String> {
    let value = serde_json::to_value(args)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles string escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct AlphaFirst {
        alpha: u32,
        beta: String,
    }

    #[derive(Serialize)]
    struct BetaFirst {
        beta: String,
        alpha: u32,
    }

    #[test]
    fn field_declaration_order_does_not_matter() {
        let a = AlphaFirst {
            alpha: 42,
            beta: "x".into(),
        };
        let b = BetaFirst {
            beta: "x".into(),
            alpha: 42,
        };
        assert_eq!(
            argument_signature(&a).unwrap(),
            argument_signature(&b).unwrap()
        );
    }

    #[test]
    fn nested_maps_are_sorted_at_every_level() {
        let mut inner = serde_json::Map::new();
        inner.insert("z".into(), serde_json::json!(1));
        inner.insert("a".into(), serde_json::json!([1, 2, 3]));
        let mut outer = serde_json::Map::new();
        outer.insert("nested".into(), Value::Object(inner));
        outer.insert("flag".into(), Value::Bool(true));

        let sig = argument_signature(&Value::Object(outer)).unwrap();
        assert_eq!(sig, r#"{"flag":true,"nested":{"a":[1,2,3],"z":1}}"#);
    }

    #[test]
    fn arrays_keep_their_order() {
        let a = argument_signature(&vec![1, 2, 3]).unwrap();
        let b = argument_signature(&vec![3, 2, 1]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn null_and_scalars_render_as_json() {
        assert_eq!(argument_signature(&Value::Null).unwrap(), "null");
        assert_eq!(argument_signature(&7u8).unwrap(), "7");
        assert_eq!(argument_signature(&"a\"b").unwrap(), r#""a\"b""#);
    }

    #[test]
    fn different_arguments_produce_different_signatures() {
        let a = argument_signature(&serde_json::json!({"id": 42})).unwrap();
        let b = argument_signature(&serde_json::json!({"id": 43})).unwrap();
        assert_ne!(a, b);
    }
}
