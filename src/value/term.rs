//! Conversion between policy-engine terms and [`NativeValue`].

use super::{Mapping, NativeValue};
use crate::registration::TermType;
use crate::{Error, Result};

use regorus::Value as Term;

/// Name of a term's kind as a policy author would write it.
pub fn term_kind(term: &Term) -> &'static str {
    match term {
        Term::Null => "null",
        Term::Bool(_) => "boolean",
        Term::Number(_) => "number",
        Term::String(_) => "string",
        Term::Array(_) => "array",
        Term::Set(_) => "set",
        Term::Object(_) => "object",
        _ => "undefined",
    }
}

/// Decode the argument at `position` (1-based) and check it has the
/// declared shape.
pub fn decode_argument(term: &Term, expected: &TermType, position: usize) -> Result<NativeValue> {
    let value = from_term(term).map_err(|err| match err {
        Error::Type { message, .. } => Error::argument(position, message),
        other => other,
    })?;

    if !expected.accepts(&value) {
        return Err(Error::argument(
            position,
            format!("expected {}, got {}", expected, term_kind(term)),
        ));
    }

    Ok(value)
}

/// Decode a policy term into a native value.
///
/// Sets become sequences in set order. Objects must have string keys.
pub fn from_term(term: &Term) -> Result<NativeValue> {
    Ok(match term {
        Term::Null => NativeValue::Null,
        Term::Bool(b) => NativeValue::Boolean(*b),
        Term::Number(_) => decode_number(term)?,
        Term::String(s) => NativeValue::String(s.to_string()),
        Term::Array(items) => {
            NativeValue::Sequence(items.iter().map(from_term).collect::<Result<_>>()?)
        }
        Term::Set(items) => {
            NativeValue::Sequence(items.iter().map(from_term).collect::<Result<_>>()?)
        }
        Term::Object(fields) => {
            let mut map = Mapping::new();
            for (key, value) in fields.iter() {
                let key = match key {
                    Term::String(k) => k.to_string(),
                    other => {
                        return Err(Error::type_error(format!(
                            "object keys must be strings, got {} key",
                            term_kind(other)
                        )))
                    }
                };
                map.insert(key, from_term(value)?);
            }
            NativeValue::Mapping(map)
        }
        other => {
            return Err(Error::type_error(format!(
                "cannot use {} value",
                term_kind(other)
            )))
        }
    })
}

fn decode_number(term: &Term) -> Result<NativeValue> {
    let number = match serde_json::to_value(term)? {
        serde_json::Value::Number(n) => n,
        other => {
            return Err(Error::type_error(format!(
                "number is not representable, serialized as {}",
                other
            )))
        }
    };

    if let Some(n) = number.as_i64() {
        Ok(NativeValue::Integer(n))
    } else if number.is_u64() {
        Err(Error::type_error(format!(
            "integer {} is out of the 64-bit signed range",
            number
        )))
    } else {
        number
            .as_f64()
            .map(NativeValue::Float)
            .ok_or_else(|| Error::type_error(format!("number {} is not representable", number)))
    }
}

/// Encode a native value as a policy term.
pub fn encode_result(value: &NativeValue) -> Result<Term> {
    let json = value.to_json()?;
    serde_json::from_value(json)
        .map_err(|e| Error::encoding(format!("policy engine rejected value: {}", e), "<root>"))
}
