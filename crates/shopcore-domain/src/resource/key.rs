//! Deterministic hashing of request arguments.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{DomainError, DomainResult};

/// Derives a stable de-duplication key for `argument`.
///
/// The argument is serialized to JSON with object keys sorted at every
/// level, then hashed with SHA-256. Two arguments that are equal by value
/// produce the same key regardless of map insertion order.
pub fn stable_key<T>(argument: &T) -> DomainResult<String>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(argument).map_err(|err| DomainError::KeyEncoding {
        message: err.to_string(),
    })?;

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
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
