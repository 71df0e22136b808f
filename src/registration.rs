//! Static registration records for external policy functions.
//!
//! A [`FunctionRegistration`] tells the policy host how to type-check calls
//! to a function and how long its results may be reused.

use crate::value::NativeValue;
use crate::{Error, Result};

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Shape of a function argument or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermType {
    /// Any value
    Any,
    /// A string
    String,
    /// A string-keyed object
    Object,
    /// An array whose elements all have the given shape
    Array(&'static TermType),
}

impl TermType {
    /// Check whether `value` has this shape.
    pub fn accepts(&self, value: &NativeValue) -> bool {
        match (self, value) {
            (TermType::Any, _) => true,
            (TermType::String, NativeValue::String(_)) => true,
            (TermType::Object, NativeValue::Mapping(_)) => true,
            (TermType::Array(element), NativeValue::Sequence(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermType::Any => f.write_str("any"),
            TermType::String => f.write_str("string"),
            TermType::Object => f.write_str("object"),
            TermType::Array(element) => write!(f, "array<{}>", element),
        }
    }
}

/// Whether a function's result depends only on its arguments.
///
/// Informational for the policy engine; the host memoizes per evaluation
/// regardless of the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determinism {
    /// Same arguments always give the same result.
    Deterministic,
    /// The result depends on external state.
    Nondeterministic,
}

/// Metadata the policy host reads before installing a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRegistration {
    /// Dotted name policies call the function by
    pub name: &'static str,
    /// Argument shapes, in call order
    pub args: &'static [TermType],
    /// Result shape
    pub result: TermType,
    /// Determinism class
    pub determinism: Determinism,
    /// Reuse results for identical arguments within one evaluation
    pub memoize: bool,
}

/// `mongodb.query(collection: string, filter: object) -> array<object>`
pub const MONGODB_QUERY: FunctionRegistration = FunctionRegistration {
    name: "mongodb.query",
    args: &[TermType::String, TermType::Object],
    result: TermType::Array(&TermType::Object),
    determinism: Determinism::Nondeterministic,
    memoize: true,
};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("function name pattern is valid")
    })
}

impl FunctionRegistration {
    /// Number of declared arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Validate the record before it is handed to the policy engine.
    pub fn validate(&self) -> Result<()> {
        if !name_pattern().is_match(self.name) {
            return Err(Error::registration(
                self.name,
                "name must be a dotted sequence of identifiers",
            ));
        }
        if self.args.len() > usize::from(u8::MAX) {
            return Err(Error::registration(
                self.name,
                format!("too many arguments ({})", self.args.len()),
            ));
        }
        Ok(())
    }

    /// Declaration in the form `name(string, object) -> array<object>`.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        format!("{}({}) -> {}", self.name, args.join(", "), self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Mapping;

    #[test]
    fn test_mongodb_query_contract() {
        assert!(MONGODB_QUERY.validate().is_ok());
        assert_eq!(MONGODB_QUERY.arity(), 2);
        assert_eq!(MONGODB_QUERY.determinism, Determinism::Nondeterministic);
        assert!(MONGODB_QUERY.memoize);
        assert_eq!(
            MONGODB_QUERY.signature(),
            "mongodb.query(string, object) -> array<object>"
        );
    }

    #[test]
    fn test_result_shape() {
        let doc = NativeValue::Mapping(Mapping::new());
        assert!(MONGODB_QUERY.result.accepts(&NativeValue::Sequence(vec![doc.clone()])));
        assert!(MONGODB_QUERY.result.accepts(&NativeValue::Sequence(vec![])));
        assert!(!MONGODB_QUERY
            .result
            .accepts(&NativeValue::Sequence(vec![doc, NativeValue::from(1i64)])));
        assert!(!MONGODB_QUERY.result.accepts(&NativeValue::Null));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "mongodb.", "9lives", "mongo db.query", "a..b"] {
            let registration = FunctionRegistration {
                name,
                ..MONGODB_QUERY
            };
            assert!(registration.validate().is_err(), "{:?} should be rejected", name);
        }
    }
}
