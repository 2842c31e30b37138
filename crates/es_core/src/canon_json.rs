use crate::app_error::{AppError, AppResult};
use serde_json::Value;

fn encode_error(what: &str) -> AppError {
    AppError::new(
        "ES_CANON_JSON_ENCODE_FAILED",
        "canon_json",
        "failed to encode canonical json",
        false,
        serde_json::json!({ "what": what }),
    )
}

fn write_canonical(value: &Value, out: &mut String) -> AppResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) if n.is_f64() => {
            return Err(AppError::new(
                "ES_CANON_JSON_FLOAT_FORBIDDEN",
                "canon_json",
                "floats are forbidden in canonical json",
                false,
                serde_json::json!({ "value": n.to_string() }),
            ));
        }
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).map_err(|_| encode_error("string"))?)
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).map_err(|_| encode_error("key"))?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Sorted-key, whitespace-free JSON. Floats are rejected so output is stable.
pub fn to_canonical_string(value: &Value) -> AppResult<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}
