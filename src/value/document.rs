//! Conversion between [`NativeValue`] and BSON documents.
//!
//! Filters are passed to the store verbatim: no field renaming and no
//! operator rewriting. On the way back, `ObjectId` becomes its hex string
//! and `DateTime` an RFC 3339 string with millisecond precision; dates
//! outside the representable range are refused. Every other
//! store-specific type is refused with an encoding error.

use super::{child_path, display_path, Mapping, NativeValue, ResultSet};
use crate::{Error, Result};

use bson::{Bson, Document};
use chrono::{DateTime, SecondsFormat};

/// Build a store filter from a decoded filter mapping.
pub fn to_filter(filter: &Mapping) -> Document {
    filter
        .iter()
        .map(|(key, value)| (key.clone(), to_bson(value)))
        .collect()
}

/// Convert a native value to BSON.
pub fn to_bson(value: &NativeValue) -> Bson {
    match value {
        NativeValue::Null => Bson::Null,
        NativeValue::Boolean(b) => Bson::Boolean(*b),
        NativeValue::Integer(n) => Bson::Int64(*n),
        NativeValue::Float(n) => Bson::Double(*n),
        NativeValue::String(s) => Bson::String(s.clone()),
        NativeValue::Sequence(items) => Bson::Array(items.iter().map(to_bson).collect()),
        NativeValue::Mapping(map) => Bson::Document(to_filter(map)),
    }
}

/// Decode every document of a query result.
pub fn from_documents(documents: &[Document]) -> Result<ResultSet> {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| from_document_at(doc, &i.to_string()))
        .collect()
}

/// Decode a single store document.
pub fn from_document(document: &Document) -> Result<Mapping> {
    from_document_at(document, "")
}

fn from_document_at(document: &Document, path: &str) -> Result<Mapping> {
    document
        .iter()
        .map(|(key, value)| {
            let field = child_path(path, key);
            Ok((key.clone(), from_bson_at(value, &field)?))
        })
        .collect()
}

/// Decode a BSON value.
pub fn from_bson(value: &Bson) -> Result<NativeValue> {
    from_bson_at(value, "")
}

fn from_bson_at(value: &Bson, path: &str) -> Result<NativeValue> {
    Ok(match value {
        Bson::Null => NativeValue::Null,
        Bson::Boolean(b) => NativeValue::Boolean(*b),
        Bson::Int32(n) => NativeValue::Integer(i64::from(*n)),
        Bson::Int64(n) => NativeValue::Integer(*n),
        Bson::Double(n) if n.is_finite() => NativeValue::Float(*n),
        Bson::Double(n) => {
            return Err(Error::encoding(
                format!("non-finite double {}", n),
                display_path(path),
            ))
        }
        Bson::String(s) => NativeValue::String(s.clone()),
        Bson::Array(items) => NativeValue::Sequence(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| from_bson_at(item, &child_path(path, &i.to_string())))
                .collect::<Result<_>>()?,
        ),
        Bson::Document(doc) => NativeValue::Mapping(from_document_at(doc, path)?),
        Bson::ObjectId(oid) => NativeValue::String(oid.to_hex()),
        Bson::DateTime(dt) => match DateTime::from_timestamp_millis(dt.timestamp_millis()) {
            Some(utc) => NativeValue::String(utc.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => {
                return Err(Error::encoding(
                    format!("datetime {}ms is outside the representable range", dt.timestamp_millis()),
                    display_path(path),
                ))
            }
        },
        other => {
            return Err(Error::encoding(
                format!("unsupported store type {:?}", other.element_type()),
                display_path(path),
            ))
        }
    })
}
