use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Map;
use tracing::{debug, warn};

use super::api::{DataSource, LawApi};
use super::ast::{Stmt, StmtKind};
use super::error::RuntimeError;
use super::format::{repr, to_str};
use super::interp::{Interpreter, Scope};
use super::validate::compile_script;
use super::value::{Dict, Object, Val};
use crate::types::{
    DEFAULT_DENY_REASON, DEFAULT_INFO_MESSAGE, Decision, EngineConfig, ExecutionResult, LawContext,
};

/// Name of the function every script must define.
pub const ENTRY_POINT: &str = "apply";

/// Cooperative cancellation flag shared between a host watchdog and a running
/// script. The interpreter checks it at every loop iteration and call.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Runs law scripts against a context.
///
/// Every call re-validates the script and returns an [`ExecutionResult`];
/// failures are reported in the result, never returned as `Err` or raised.
///
/// ```
/// use std::sync::Arc;
/// use statute::{Decision, EngineConfig, Executor, InMemoryData, LawContext};
///
/// let executor = Executor::new(Arc::new(InMemoryData::new()), &EngineConfig::default());
/// let result = executor.execute(
///     "def apply():\n    return {'action': 'deny', 'reason': 'x'}\n",
///     &LawContext::new("vote"),
/// );
/// assert!(result.success);
/// assert_eq!(result.result, Some(Decision::Deny { reason: "x".into() }));
/// ```
#[derive(Clone)]
pub struct Executor {
    data: Arc<dyn DataSource>,
    max_call_depth: usize,
}

impl Executor {
    pub fn new(data: Arc<dyn DataSource>, config: &EngineConfig) -> Self {
        Self {
            data,
            max_call_depth: config.max_call_depth,
        }
    }

    #[must_use]
    pub fn execute(&self, code: &str, context: &LawContext) -> ExecutionResult {
        self.execute_with(code, context, &Interrupt::new())
    }

    /// Like [`execute`](Self::execute), stopping with "execution interrupted"
    /// once `interrupt` is triggered.
    #[must_use]
    pub fn execute_with(
        &self,
        code: &str,
        context: &LawContext,
        interrupt: &Interrupt,
    ) -> ExecutionResult {
        let program = match compile_script(code) {
            Ok(program) => program,
            Err(err) => {
                debug!(error = %err, "script rejected by validator");
                return ExecutionResult::failed(err.to_string(), Vec::new());
            }
        };
        let mut api = LawApi::new(Arc::clone(&self.data), context.user_id);
        let outcome = run(&program, context, &mut api, interrupt, self.max_call_depth);
        let logs = api.into_logs();
        match outcome {
            Ok(decision) => ExecutionResult::ok(decision, logs),
            Err(err) => {
                warn!(action = %context.action, error = %err, "script execution failed");
                ExecutionResult::failed(err.to_string(), logs)
            }
        }
    }
}

fn run(
    program: &[Stmt],
    context: &LawContext,
    api: &mut LawApi,
    interrupt: &Interrupt,
    max_depth: usize,
) -> Result<Decision, RuntimeError> {
    run_in(&Scope::root(), program, context, api, interrupt, max_depth)
}

/// Run `program` with `globals` as its module scope. Everything the script
/// left in scopes and containers is released when the interpreter drops, so
/// `def` closures cannot keep `globals` alive.
fn run_in(
    globals: &Rc<Scope>,
    program: &[Stmt],
    context: &LawContext,
    api: &mut LawApi,
    interrupt: &Interrupt,
    max_depth: usize,
) -> Result<Decision, RuntimeError> {
    let definitions = program
        .iter()
        .filter(|s| matches!(&s.kind, StmtKind::FunctionDef(def) if def.name == ENTRY_POINT))
        .count();
    if definitions > 1 {
        return Err(RuntimeError::DuplicateEntryPoint);
    }

    globals.set("api", Val::Api);
    globals.set("context", context_object(context));

    let mut interpreter = Interpreter::new(api, interrupt, max_depth);
    interpreter.run(program, globals)?;

    let entry = globals
        .get_local(ENTRY_POINT)
        .ok_or(RuntimeError::MissingEntryPoint)?;
    match &entry {
        Val::Function(f) if f.def.params.iter().all(|p| p.default.is_some()) => {}
        _ => return Err(RuntimeError::EntryPointSignature),
    }
    let value = interpreter.call(&entry, Vec::new(), Vec::new())?;
    decision_from(&value)
}

fn context_object(context: &LawContext) -> Val {
    let session = context.session.as_ref().map_or(Val::None, Val::from_json);
    Val::Object(Rc::new(Object {
        type_name: "LawContext",
        fields: vec![
            ("user_id", context.user_id.map_or(Val::None, Val::Int)),
            ("action", Val::str(context.action.as_str())),
            ("timestamp", Val::DateTime(context.timestamp.naive_utc())),
            ("data", Val::from_json(&serde_json::Value::Object(context.data.clone()))),
            ("session", session),
        ],
    }))
}

fn text_field(dict: &Dict, key: &str, default: &str) -> Result<String, RuntimeError> {
    Ok(match dict.get(&Val::str(key))? {
        None | Some(Val::None) => default.to_owned(),
        Some(v) => to_str(v),
    })
}

/// Map the value returned by the entry point onto a [`Decision`].
fn decision_from(value: &Val) -> Result<Decision, RuntimeError> {
    let Val::Dict(dict) = value else {
        return Err(RuntimeError::InvalidDecision(format!(
            "expected a dict, got {}",
            value.type_name()
        )));
    };
    let dict = dict.borrow();
    let action = match dict.get(&Val::str("action"))? {
        Some(Val::Str(action)) => action.clone(),
        Some(other) => {
            return Err(RuntimeError::InvalidDecision(format!(
                "unknown action {}",
                repr(other)
            )));
        }
        None => return Err(RuntimeError::InvalidDecision("missing 'action'".to_owned())),
    };
    Ok(match &*action {
        "allow" => Decision::Allow,
        "deny" => Decision::Deny {
            reason: text_field(&dict, "reason", DEFAULT_DENY_REASON)?,
        },
        "info" => Decision::Info {
            message: text_field(&dict, "message", DEFAULT_INFO_MESSAGE)?,
        },
        "modify" => Decision::Modify {
            changes: match dict.get(&Val::str("changes"))? {
                None | Some(Val::None) => Map::new(),
                Some(changes @ Val::Dict(_)) => match changes.to_json()? {
                    serde_json::Value::Object(map) => map,
                    _ => Map::new(),
                },
                Some(other) => {
                    return Err(RuntimeError::InvalidDecision(format!(
                        "'changes' must be a dict, got {}",
                        other.type_name()
                    )));
                }
            },
        },
        "no_action" => Decision::NoAction,
        other => {
            return Err(RuntimeError::InvalidDecision(format!(
                "unknown action '{other}'"
            )));
        }
    })
}
