//! Policy host.
//!
//! Wraps the Rego engine and installs external functions according to
//! their [`FunctionRegistration`]: argument shapes are checked before the
//! function runs, results are checked and encoded after it returns, and
//! memoized functions are called at most once per distinct argument list
//! within one evaluation. Results are never kept across evaluations.

mod scope;
mod signal;

pub use signal::EvaluationSignal;

use crate::registration::FunctionRegistration;
use crate::telemetry::Telemetry;
use crate::value::{term, NativeValue};
use crate::{Error, Result};

use scope::{call_key, EvaluationScope};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// What an external function knows about the call it is serving.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Evaluation the call belongs to
    pub evaluation_id: Uuid,
    /// Fires when the evaluation is canceled
    pub signal: EvaluationSignal,
}

/// A function callable from policy code.
///
/// `call` runs on the evaluating thread and may block it. Arguments have
/// already been checked against [`FunctionRegistration::args`].
pub trait ExternalFunction: Send + Sync {
    /// Static registration record.
    fn registration(&self) -> &FunctionRegistration;

    /// Run the function.
    fn call(&self, context: &CallContext, args: Vec<NativeValue>) -> Result<NativeValue>;
}

/// An installed function and everything a call needs.
struct CallSite {
    function: Arc<dyn ExternalFunction>,
    registration: FunctionRegistration,
    scope: Arc<EvaluationScope>,
    telemetry: Arc<Telemetry>,
}

impl CallSite {
    fn invoke(&self, args: Vec<regorus::Value>) -> anyhow::Result<regorus::Value> {
        match self.call(args) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.telemetry.record_call_failure(err.category());
                warn!(function = self.registration.name, error = %err, "External call failed");
                let message = format!("{}: {}", self.registration.name, err);
                self.scope.record_failure(err);
                Err(anyhow::anyhow!(message))
            }
        }
    }

    fn call(&self, args: Vec<regorus::Value>) -> Result<regorus::Value> {
        let registration = &self.registration;
        let context = self.scope.context()?;

        if args.len() != registration.arity() {
            return Err(Error::type_error(format!(
                "{} expects {} arguments, got {}",
                registration.name,
                registration.arity(),
                args.len()
            )));
        }

        let decoded = args
            .iter()
            .zip(registration.args)
            .enumerate()
            .map(|(i, (arg, expected))| term::decode_argument(arg, expected, i + 1))
            .collect::<Result<Vec<_>>>()?;

        if !registration.memoize {
            let result = self.run(&context, decoded)?;
            return term::encode_result(&result);
        }

        let key = call_key(registration.name, &decoded)?;
        if let Some(hit) = self.scope.memoized(&key) {
            self.telemetry.record_memo_hit();
            debug!(function = registration.name, "Memoized result reused");
            return term::encode_result(&hit);
        }

        let result = self.run(&context, decoded)?;
        let encoded = term::encode_result(&result)?;
        self.scope.memoize(key, result);
        Ok(encoded)
    }

    fn run(&self, context: &CallContext, args: Vec<NativeValue>) -> Result<NativeValue> {
        let result = self.function.call(context, args)?;
        if !self.registration.result.accepts(&result) {
            return Err(Error::encoding(
                format!(
                    "{} returned {}, declared {}",
                    self.registration.name,
                    result.kind(),
                    self.registration.result
                ),
                "<root>",
            ));
        }
        Ok(result)
    }
}

/// A Rego engine with external functions installed.
pub struct PolicyHost {
    engine: regorus::Engine,
    scope: Arc<EvaluationScope>,
    telemetry: Arc<Telemetry>,
    registrations: Vec<FunctionRegistration>,
}

impl PolicyHost {
    /// Create a host with no policies and no external functions.
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            engine: regorus::Engine::new(),
            scope: Arc::new(EvaluationScope::default()),
            telemetry,
            registrations: Vec::new(),
        }
    }

    /// Install an external function.
    ///
    /// Names must be unique within the host.
    pub fn register(&mut self, function: Arc<dyn ExternalFunction>) -> Result<()> {
        let registration = *function.registration();
        registration.validate()?;

        if self.registrations.iter().any(|r| r.name == registration.name) {
            return Err(Error::registration(registration.name, "already registered"));
        }

        let arity = u8::try_from(registration.arity())
            .map_err(|_| Error::registration(registration.name, "too many arguments"))?;

        let site = Arc::new(CallSite {
            function,
            registration,
            scope: Arc::clone(&self.scope),
            telemetry: Arc::clone(&self.telemetry),
        });
        let extension = move |args: Vec<regorus::Value>| site.invoke(args);

        self.engine
            .add_extension(registration.name.to_string(), arity, Box::new(extension))
            .map_err(|e| Error::registration(registration.name, e.to_string()))?;

        info!(
            function = registration.name,
            signature = %registration.signature(),
            determinism = ?registration.determinism,
            memoize = registration.memoize,
            "Registered external function"
        );
        self.registrations.push(registration);
        Ok(())
    }

    /// Registration records of every installed function.
    pub fn registrations(&self) -> &[FunctionRegistration] {
        &self.registrations
    }

    /// Shared telemetry.
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Add a Rego module. `path` is only used in error messages.
    pub fn add_policy(&mut self, path: &str, rego: &str) -> Result<()> {
        self.engine
            .add_policy(path.to_string(), rego.to_string())
            .map_err(|e| Error::evaluation(format!("failed to load policy {}: {}", path, e)))?;
        Ok(())
    }

    /// Add a Rego module from a file.
    pub fn add_policy_file(&mut self, path: &Path) -> Result<()> {
        let rego = std::fs::read_to_string(path)?;
        self.add_policy(&path.display().to_string(), &rego)
    }

    /// Merge a JSON document into `data`.
    pub fn add_data_json(&mut self, json: &str) -> Result<()> {
        let data = regorus::Value::from_json_str(json)
            .map_err(|e| Error::evaluation(format!("invalid data document: {}", e)))?;
        self.engine
            .add_data(data)
            .map_err(|e| Error::evaluation(format!("failed to add data: {}", e)))
    }

    /// Set `input` for subsequent evaluations.
    pub fn set_input_json(&mut self, json: &str) -> Result<()> {
        let input = regorus::Value::from_json_str(json)
            .map_err(|e| Error::evaluation(format!("invalid input document: {}", e)))?;
        self.engine.set_input(input);
        Ok(())
    }

    /// Evaluate a query and return the engine's full result document.
    pub fn evaluate(&mut self, query: &str, signal: &EvaluationSignal) -> Result<serde_json::Value> {
        let results = self.run_query(query, signal)?;
        Ok(serde_json::to_value(&results)?)
    }

    /// Evaluate a query and return the value of its first expression, or
    /// `None` when the query is undefined.
    pub fn evaluate_value(
        &mut self,
        query: &str,
        signal: &EvaluationSignal,
    ) -> Result<Option<serde_json::Value>> {
        let results = self.run_query(query, signal)?;
        results
            .result
            .first()
            .and_then(|r| r.expressions.first())
            .map(|expr| serde_json::to_value(&expr.value).map_err(Error::from))
            .transpose()
    }

    fn run_query(
        &mut self,
        query: &str,
        signal: &EvaluationSignal,
    ) -> Result<regorus::QueryResults> {
        let guard = self.scope.begin(signal.clone())?;
        let span = info_span!("evaluation", id = %guard.id());
        let _entered = span.enter();

        self.telemetry.record_evaluation();
        debug!(query, "Evaluating query");

        // A failed external call fails the evaluation even if the engine
        // would have treated it as undefined.
        let outcome = self.engine.eval_query(query.to_string(), false);
        let failure = match (outcome, guard.take_failure()) {
            (Ok(results), None) => return Ok(results),
            (_, Some(failure)) => failure,
            (Err(err), None) => Error::evaluation(err.to_string()),
        };
        warn!(error = %failure, "Evaluation failed");
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::{Determinism, TermType, MONGODB_QUERY};
    use crate::value::Mapping;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ECHO: FunctionRegistration = FunctionRegistration {
        name: "test.echo",
        args: &[TermType::String],
        result: TermType::Any,
        determinism: Determinism::Nondeterministic,
        memoize: true,
    };

    struct Echo {
        registration: FunctionRegistration,
        calls: AtomicUsize,
    }

    impl Echo {
        fn new(registration: FunctionRegistration) -> Arc<Self> {
            Arc::new(Self {
                registration,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ExternalFunction for Echo {
        fn registration(&self) -> &FunctionRegistration {
            &self.registration
        }

        fn call(&self, _context: &CallContext, mut args: Vec<NativeValue>) -> Result<NativeValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.remove(0))
        }
    }

    struct WrongShape;

    impl ExternalFunction for WrongShape {
        fn registration(&self) -> &FunctionRegistration {
            &MONGODB_QUERY
        }

        fn call(&self, _context: &CallContext, _args: Vec<NativeValue>) -> Result<NativeValue> {
            Ok(NativeValue::Mapping(Mapping::new()))
        }
    }

    const POLICY: &str = r#"
package demo

import rego.v1

twice := [test.echo("a"), test.echo("a"), test.echo("b")]
"#;

    fn host() -> PolicyHost {
        let mut host = PolicyHost::new(Arc::new(Telemetry::new()));
        host.add_policy("demo.rego", POLICY).unwrap();
        host
    }

    #[test]
    fn test_memoized_within_one_evaluation() {
        let echo = Echo::new(ECHO);
        let mut host = host();
        host.register(echo.clone()).unwrap();

        let value = host
            .evaluate_value("data.demo.twice", &EvaluationSignal::new())
            .unwrap();
        assert_eq!(value, Some(serde_json::json!(["a", "a", "b"])));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);

        host.evaluate_value("data.demo.twice", &EvaluationSignal::new())
            .unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_memo_never_spans_evaluations() {
        let echo = Echo::new(FunctionRegistration {
            determinism: Determinism::Deterministic,
            ..ECHO
        });
        let mut host = host();
        host.register(echo.clone()).unwrap();

        host.evaluate_value("data.demo.twice", &EvaluationSignal::new())
            .unwrap();
        host.evaluate_value("data.demo.twice", &EvaluationSignal::new())
            .unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut host = host();
        host.register(Echo::new(ECHO)).unwrap();

        let err = host.register(Echo::new(ECHO)).unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert_eq!(host.registrations().len(), 1);
    }

    #[test]
    fn test_argument_type_error_surfaces_from_evaluation() {
        let echo = Echo::new(ECHO);
        let mut host = PolicyHost::new(Arc::new(Telemetry::new()));
        host.add_policy(
            "bad.rego",
            "package bad\n\nimport rego.v1\n\nx := test.echo(42)\n",
        )
        .unwrap();
        host.register(echo.clone()).unwrap();

        let err = host
            .evaluate_value("data.bad.x", &EvaluationSignal::new())
            .unwrap_err();
        assert!(matches!(err, Error::Type { position: Some(1), .. }), "{}", err);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(host.telemetry().metrics().call_failures.get("type"), Some(&1));
    }

    #[test]
    fn test_result_shape_is_enforced() {
        let mut host = PolicyHost::new(Arc::new(Telemetry::new()));
        host.add_policy(
            "shape.rego",
            "package shape\n\nimport rego.v1\n\nx := mongodb.query(\"users\", {})\n",
        )
        .unwrap();
        host.register(Arc::new(WrongShape)).unwrap();

        let err = host
            .evaluate_value("data.shape.x", &EvaluationSignal::new())
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }), "{}", err);
    }

    #[test]
    fn test_input_and_data_documents() {
        let mut host = PolicyHost::new(Arc::new(Telemetry::new()));
        host.add_policy(
            "io.rego",
            "package io\n\nimport rego.v1\n\nallow if input.user == data.owner\n",
        )
        .unwrap();
        host.add_data_json(r#"{"owner": "alice"}"#).unwrap();
        host.set_input_json(r#"{"user": "alice"}"#).unwrap();

        let value = host
            .evaluate_value("data.io.allow", &EvaluationSignal::new())
            .unwrap();
        assert_eq!(value, Some(serde_json::json!(true)));

        assert!(host.set_input_json("{not json").is_err());
    }
}
