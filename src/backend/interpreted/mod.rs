//! Interpreted runtime: sandboxed S-expression programs
//!
//! A program is source text loaded fresh for every call. It must define:
//! - `(GetStates)` returning the program state as bytes (or a string)
//! - `(SetStates s)` restoring state from those bytes
//!
//! Calls arrive as JSON `{"function": "Name", "args": [...]}`. Every evaluation step burns
//! one unit of fuel and nesting is bounded, so a hostile program fails instead of hanging.
//! The call context is visible to programs as the globals `self`, `caller`, `block-number`
//! and `block-time`.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use eval::{Interpreter, DEFAULT_FUEL};
pub use value::Value;

use super::{BackendError, CallResult, Deployment, Execution, ExecutionContext, TouchedProgram};
use log::debug;
use serde::Deserialize;

/// Accessor returning the serialized program state
pub const GET_STATES: &str = "GetStates";

/// Accessor restoring the program state
pub const SET_STATES: &str = "SetStates";

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("Syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unbound symbol: {0}")]
    Unbound(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    Overflow(String),

    #[error("Out of fuel")]
    OutOfFuel,

    #[error("Nesting deeper than {0}")]
    DepthExceeded(usize),

    #[error("Program does not define {0}")]
    MissingFunction(String),

    #[error("Program raised: {0}")]
    Raised(String),

    #[error("Invalid call input: {0}")]
    Input(String),
}

/// Call input as sent by clients
#[derive(Debug, Clone, Deserialize)]
pub struct CallInput {
    pub function: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl CallInput {
    pub fn parse(input: &[u8]) -> Result<Self, InterpretError> {
        serde_json::from_slice(input).map_err(|e| InterpretError::Input(e.to_string()))
    }
}

/// A loaded program instance.
pub struct Program {
    interpreter: Interpreter,
}

impl Program {
    /// Parse and evaluate every top-level form of `source`
    pub fn load(source: &[u8], fuel: u64) -> Result<Self, InterpretError> {
        let source = std::str::from_utf8(source)
            .map_err(|_| InterpretError::Type("program source is not UTF-8".into()))?;
        let mut interpreter = Interpreter::new(fuel);
        for form in parser::parse(source)? {
            interpreter.eval_top(&form)?;
        }
        for accessor in [GET_STATES, SET_STATES] {
            if !matches!(interpreter.global(accessor), Some(Value::Lambda(_))) {
                return Err(InterpretError::MissingFunction(accessor.to_string()));
            }
        }
        Ok(Self { interpreter })
    }

    pub fn bind_context(&mut self, ctx: &ExecutionContext) {
        self.interpreter
            .set_global("self", Value::Str(ctx.program_address.to_string()));
        self.interpreter
            .set_global("caller", Value::Str(ctx.caller.to_string()));
        self.interpreter
            .set_global("block-number", Value::Int(saturating_int(ctx.block_number)));
        self.interpreter
            .set_global("block-time", Value::Int(saturating_int(ctx.block_time)));
    }

    pub fn call(&mut self, function: &str, args: Vec<Value>) -> Result<Value, InterpretError> {
        self.interpreter.call_global(function, args)
    }

    pub fn get_states(&mut self) -> Result<Vec<u8>, InterpretError> {
        match self.call(GET_STATES, Vec::new())? {
            Value::Bytes(bytes) => Ok(bytes),
            Value::Str(text) => Ok(text.into_bytes()),
            Value::Nil => Ok(Vec::new()),
            other => Err(InterpretError::Type(format!(
                "{} must return bytes, got {}",
                GET_STATES,
                other.type_name()
            ))),
        }
    }

    pub fn set_states(&mut self, state: &[u8]) -> Result<(), InterpretError> {
        self.call(SET_STATES, vec![Value::Bytes(state.to_vec())])?;
        Ok(())
    }

    pub fn remaining_fuel(&self) -> u64 {
        self.interpreter.fuel()
    }
}

fn saturating_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl From<Value> for CallResult {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => CallResult::Nil,
            Value::Bool(b) => CallResult::Bool(b),
            Value::Int(n) => CallResult::Integer(n),
            Value::Str(s) => CallResult::Text(s),
            Value::Bytes(b) => CallResult::Bytes(b),
            other => CallResult::Structured(other),
        }
    }
}

/// Backend running interpreted programs.
#[derive(Debug, Clone)]
pub struct InterpretedBackend {
    fuel: u64,
}

impl Default for InterpretedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_FUEL)
    }
}

impl InterpretedBackend {
    pub fn new(fuel: u64) -> Self {
        Self { fuel }
    }

    /// Load the program and read its initial state. Code is stored as given.
    pub fn deploy(&self, code: &[u8]) -> Result<Deployment, BackendError> {
        let mut program = Program::load(code, self.fuel)?;
        let state = program.get_states()?;
        Ok(Deployment {
            state,
            code: code.to_vec(),
        })
    }

    /// Restore state, run the named function and snapshot the new state. Only the target
    /// program is touched.
    pub fn execute(
        &self,
        code: &[u8],
        state: &[u8],
        input: &[u8],
        ctx: &ExecutionContext,
    ) -> Result<Execution, BackendError> {
        let call = CallInput::parse(input)?;
        let args = call
            .args
            .iter()
            .map(Value::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        let mut program = Program::load(code, self.fuel)?;
        program.bind_context(ctx);
        program.set_states(state)?;
        let result = program.call(&call.function, args)?;
        let new_state = program.get_states()?;
        debug!(
            "{}({}) on {} used {} fuel",
            call.function,
            call.args.len(),
            ctx.program_address,
            self.fuel - program.remaining_fuel()
        );

        Ok(Execution {
            touched: vec![TouchedProgram {
                address: ctx.program_address,
                state: new_state,
                code: code.to_vec(),
            }],
            result: result.into(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::Address;

    pub(crate) const COUNTER: &str = r#"
        ; a counter with a per-caller tally
        (define count 0)
        (define callers (dict))

        (define (GetStates)
          (bytes (json-encode (dict "count" count "callers" callers))))

        (define (SetStates s)
          (let ((decoded (json-decode s)))
            (set! count (get decoded "count" 0))
            (set! callers (get decoded "callers" (dict)))))

        (define (Increment n)
          (set! count (+ count n))
          (set! callers (put callers caller (+ 1 (get callers caller 0))))
          count)

        (define (Snapshot) (dict "count" count "at" block-number))
        (define (Echo x) x)
    "#;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            program_address: Address::repeat_byte(1),
            caller: Address::repeat_byte(2),
            block_number: 12_965_001,
            block_time: 1_700_000_000,
        }
    }

    fn input(function: &str, args: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "function": function, "args": args })).unwrap()
    }

    #[test]
    fn test_deploy_reads_initial_state() {
        let backend = InterpretedBackend::default();
        let deployment = backend.deploy(COUNTER.as_bytes()).unwrap();
        assert_eq!(deployment.code, COUNTER.as_bytes());
        let state: serde_json::Value = serde_json::from_slice(&deployment.state).unwrap();
        assert_eq!(state["count"], 0);
    }

    #[test]
    fn test_execute_updates_state() {
        let backend = InterpretedBackend::default();
        let state = backend.deploy(COUNTER.as_bytes()).unwrap().state;

        let first = backend
            .execute(COUNTER.as_bytes(), &state, &input("Increment", serde_json::json!([5])), &ctx())
            .unwrap();
        assert_eq!(first.touched.len(), 1);
        assert_eq!(first.touched[0].address, ctx().program_address);
        assert_eq!(first.result, CallResult::Integer(5));

        let second = backend
            .execute(
                COUNTER.as_bytes(),
                &first.touched[0].state,
                &input("Increment", serde_json::json!([2])),
                &ctx(),
            )
            .unwrap();
        assert_eq!(second.result, CallResult::Integer(7));
        let state: serde_json::Value = serde_json::from_slice(&second.touched[0].state).unwrap();
        assert_eq!(state["callers"][ctx().caller.to_string()], 2);
    }

    #[test]
    fn test_structured_result() {
        let backend = InterpretedBackend::default();
        let state = backend.deploy(COUNTER.as_bytes()).unwrap().state;
        let out = backend
            .execute(COUNTER.as_bytes(), &state, &input("Snapshot", serde_json::json!([])), &ctx())
            .unwrap();
        let CallResult::Structured(value) = out.result else {
            panic!("expected a structured result");
        };
        assert_eq!(
            value.to_json().unwrap(),
            serde_json::json!({"count": 0, "at": 12_965_001})
        );
    }

    #[test]
    fn test_missing_accessors_rejected() {
        let backend = InterpretedBackend::default();
        let err = backend.deploy(b"(define (GetStates) \"\")").unwrap_err();
        assert!(matches!(
            err,
            BackendError::Interpreted(InterpretError::MissingFunction(ref name)) if name == SET_STATES
        ));
    }

    #[test]
    fn test_bad_input_and_unknown_function() {
        let backend = InterpretedBackend::default();
        let state = backend.deploy(COUNTER.as_bytes()).unwrap().state;
        assert!(backend
            .execute(COUNTER.as_bytes(), &state, b"not json", &ctx())
            .is_err());
        assert!(backend
            .execute(COUNTER.as_bytes(), &state, &input("Nope", serde_json::json!([])), &ctx())
            .is_err());
    }

    #[test]
    fn test_runaway_program_fails() {
        let src = r#"(define (GetStates) "") (define (SetStates s) nil) (define (Spin) (while true nil))"#;
        let backend = InterpretedBackend::new(10_000);
        let err = backend
            .execute(src.as_bytes(), b"", &input("Spin", serde_json::json!([])), &ctx())
            .unwrap_err();
        assert!(matches!(err, BackendError::Interpreted(InterpretError::OutOfFuel)));
    }

    #[test]
    fn test_deeply_nested_source_rejected() {
        let src = format!("{}{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = InterpretedBackend::default().deploy(src.as_bytes()).unwrap_err();
        assert!(matches!(err, BackendError::Interpreted(InterpretError::DepthExceeded(_))));
    }

    #[test]
    fn test_deep_value_fails_call() {
        let src = r#"
            (define (GetStates) "")
            (define (SetStates s) nil)
            (define (Deep n)
              (let ((x nil) (i 0))
                (while (< i n) (set! x (list x)) (set! i (+ i 1)))
                x))
        "#;
        let err = InterpretedBackend::default()
            .execute(src.as_bytes(), b"", &input("Deep", serde_json::json!([80000])), &ctx())
            .unwrap_err();
        assert!(matches!(err, BackendError::Interpreted(InterpretError::DepthExceeded(_))));
    }

    #[test]
    fn test_context_integers_saturate() {
        let mut program = Program::load(COUNTER.as_bytes(), DEFAULT_FUEL).unwrap();
        program.bind_context(&ExecutionContext {
            block_number: u64::MAX,
            block_time: u64::MAX,
            ..ctx()
        });
        let snapshot = program.call("Snapshot", Vec::new()).unwrap();
        assert_eq!(snapshot.to_json().unwrap()["at"], i64::MAX);
    }
}
