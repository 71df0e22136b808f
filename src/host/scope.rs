//! Per-evaluation state shared with installed functions.
//!
//! The memo never outlives the evaluation that filled it.

use super::{CallContext, EvaluationSignal};
use crate::value::NativeValue;
use crate::{Error, Result};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Compute the memo key of a call.
///
/// Arguments are hashed in their canonical JSON form; mappings are sorted
/// by key, so equal arguments always give equal keys.
pub(crate) fn call_key(function: &str, args: &[NativeValue]) -> Result<String> {
    let args = args
        .iter()
        .map(NativeValue::to_json)
        .collect::<Result<Vec<_>>>()?;
    let json = serde_json::to_string(&args)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(function.as_bytes());
    hasher.update(&[0]);
    hasher.update(json.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}

struct ActiveEvaluation {
    context: CallContext,
    memo: HashMap<String, NativeValue>,
    failure: Option<Error>,
}

/// State of the evaluation currently running on a policy host.
///
/// The memo and the recorded failure exist only between
/// [`EvaluationScope::begin`] and the drop of the returned guard.
#[derive(Default)]
pub(crate) struct EvaluationScope {
    active: Mutex<Option<ActiveEvaluation>>,
}

impl EvaluationScope {
    pub(crate) fn begin(self: &Arc<Self>, signal: EvaluationSignal) -> Result<ScopeGuard> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(Error::internal("an evaluation is already running on this host"));
        }

        let id = Uuid::new_v4();
        *active = Some(ActiveEvaluation {
            context: CallContext {
                evaluation_id: id,
                signal,
            },
            memo: HashMap::new(),
            failure: None,
        });

        Ok(ScopeGuard {
            scope: Arc::clone(self),
            id,
        })
    }

    pub(crate) fn context(&self) -> Result<CallContext> {
        self.active
            .lock()
            .as_ref()
            .map(|active| active.context.clone())
            .ok_or_else(|| Error::internal("external function called outside an evaluation"))
    }

    pub(crate) fn memoized(&self, key: &str) -> Option<NativeValue> {
        self.active
            .lock()
            .as_ref()
            .and_then(|active| active.memo.get(key).cloned())
    }

    pub(crate) fn memoize(&self, key: String, value: NativeValue) {
        if let Some(active) = self.active.lock().as_mut() {
            active.memo.insert(key, value);
        }
    }

    /// Keep the first failure; later ones are usually consequences of it.
    pub(crate) fn record_failure(&self, error: Error) {
        if let Some(active) = self.active.lock().as_mut() {
            active.failure.get_or_insert(error);
        }
    }

    pub(crate) fn memo_len(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |active| active.memo.len())
    }
}

/// Ends the evaluation when dropped.
pub(crate) struct ScopeGuard {
    scope: Arc<EvaluationScope>,
    id: Uuid,
}

impl ScopeGuard {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Take the first failure recorded by an external call.
    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.scope
            .active
            .lock()
            .as_mut()
            .and_then(|active| active.failure.take())
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.active.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Mapping;

    fn filter(active: bool) -> NativeValue {
        let mut map = Mapping::new();
        map.insert("active".into(), active.into());
        NativeValue::Mapping(map)
    }

    #[test]
    fn test_call_key_is_stable() {
        let args = vec![NativeValue::from("users"), filter(true)];
        assert_eq!(
            call_key("mongodb.query", &args).unwrap(),
            call_key("mongodb.query", &args).unwrap()
        );
        assert_ne!(
            call_key("mongodb.query", &args).unwrap(),
            call_key("mongodb.query", &[NativeValue::from("users"), filter(false)]).unwrap()
        );
        assert_ne!(
            call_key("mongodb.query", &args).unwrap(),
            call_key("other.fn", &args).unwrap()
        );
    }

    #[test]
    fn test_call_key_rejects_unencodable_arguments() {
        let err = call_key("f", &[NativeValue::Float(f64::NAN)]).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }), "{}", err);
        assert_ne!(
            call_key("f", &[NativeValue::Null]).unwrap(),
            call_key("f", &[NativeValue::Float(0.0)]).unwrap()
        );
    }

    #[test]
    fn test_memo_is_dropped_with_guard() {
        let scope = Arc::new(EvaluationScope::default());
        {
            let _guard = scope.begin(EvaluationSignal::new()).unwrap();
            scope.memoize("k".into(), NativeValue::from(1i64));
            assert_eq!(scope.memoized("k"), Some(NativeValue::from(1i64)));
            assert_eq!(scope.memo_len(), 1);
        }
        assert!(scope.memoized("k").is_none());
        assert!(scope.context().is_err());

        let _guard = scope.begin(EvaluationSignal::new()).unwrap();
        assert_eq!(scope.memo_len(), 0);
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let scope = Arc::new(EvaluationScope::default());
        let guard = scope.begin(EvaluationSignal::new()).unwrap();
        assert!(scope.begin(EvaluationSignal::new()).is_err());
        assert_eq!(scope.context().unwrap().evaluation_id, guard.id());
    }

    #[test]
    fn test_first_failure_wins() {
        let scope = Arc::new(EvaluationScope::default());
        let guard = scope.begin(EvaluationSignal::new()).unwrap();
        scope.record_failure(Error::type_error("first"));
        scope.record_failure(Error::type_error("second"));

        let failure = guard.take_failure().unwrap();
        assert!(failure.to_string().contains("first"));
        assert!(guard.take_failure().is_none());
    }
}
