//! Pluggable cell evaluation and the Rhai implementation.
//!
//! The grid model depends only on the [`Evaluator`] trait. Each call receives
//! an [`Environment`]: the cell's key, a [`GridHandle`] for cross-cell reads
//! and the grid's own [`Namespace`] of names bound by assignments and macros.
//! [`RhaiEvaluator`] runs cell code and macros on an embedded Rhai engine with
//! a cooperative wall-clock deadline.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use tracing::{debug, trace};

use super::deadline::Deadline;
use super::key::{Key, Shape};
use super::source::{Statement, classify};
use super::value::{CellValue, EvalError, EvalResult};

/// Names every evaluation defines for itself. They never land in the
/// namespace.
pub const RESERVED_NAMES: &[&str] = &["X", "Y", "Z", "R", "C", "T", "S"];

/// Read access to the grid for code running inside a cell.
pub trait GridAccess: Send + Sync {
    /// Evaluated value of a cell. `Ok(None)` for an empty cell.
    fn value(&self, key: Key) -> Result<Option<CellValue>, EvalError>;
    /// Source text of a cell.
    fn code(&self, key: Key) -> Option<String>;
    fn shape(&self) -> Shape;
}

/// Handle to the grid, exposed to cell code as `S`.
///
/// Holds a weak reference so values stored in the namespace cannot keep a
/// grid alive.
#[derive(Clone)]
pub struct GridHandle {
    grid: Weak<dyn GridAccess>,
    sheet: usize,
}

impl GridHandle {
    /// `sheet` is the default sheet for two-coordinate lookups.
    pub fn new(grid: Weak<dyn GridAccess>, sheet: usize) -> Self {
        GridHandle { grid, sheet }
    }

    pub fn sheet(&self) -> usize {
        self.sheet
    }

    fn upgrade(&self) -> Result<Arc<dyn GridAccess>, EvalError> {
        self.grid
            .upgrade()
            .ok_or_else(|| EvalError::runtime("Grid is no longer available."))
    }

    pub fn value(&self, key: Key) -> Result<Option<CellValue>, EvalError> {
        self.upgrade()?.value(key)
    }

    pub fn code(&self, key: Key) -> Result<Option<String>, EvalError> {
        Ok(self.upgrade()?.code(key))
    }

    pub fn shape(&self) -> Result<Shape, EvalError> {
        Ok(self.upgrade()?.shape())
    }
}

/// Names bound by cell assignments and macros for one grid.
#[derive(Clone, Default)]
pub struct Namespace {
    globals: BTreeMap<String, Dynamic>,
    functions: Option<AST>,
    revision: u64,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.globals.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Dynamic) {
        self.globals.insert(name.into(), value);
        self.revision += 1;
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dynamic)> {
        self.globals.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Script-defined functions available to every evaluation.
    pub fn functions(&self) -> Option<&AST> {
        self.functions.as_ref()
    }

    pub fn set_functions(&mut self, functions: AST) {
        self.functions = Some(functions);
        self.revision += 1;
    }

    /// Counter bumped by every binding. Callers compare it across an
    /// evaluation to learn whether names changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        self.globals.clear();
        self.functions = None;
        self.revision += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.functions.is_none()
    }
}

pub type SharedNamespace = Arc<RwLock<Namespace>>;

/// Everything one evaluation can see.
#[derive(Clone)]
pub struct Environment {
    pub key: Key,
    pub grid: GridHandle,
    pub namespace: SharedNamespace,
}

/// Captured output of a macro run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MacroOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait Evaluator: Send + Sync {
    /// Evaluate one cell's source text.
    ///
    /// A single assignment binds its target in `env.namespace` when the
    /// right-hand side succeeds.
    fn evaluate(&self, source: &str, env: &Environment) -> EvalResult;

    /// Run a whole script against the namespace, capturing its output.
    fn execute(&self, script: &str, env: &Environment) -> MacroOutput;
}

#[derive(Default)]
struct Capture {
    stdout: String,
    stderr: String,
}

type SharedCapture = Arc<Mutex<Option<Capture>>>;

/// [`Evaluator`] backed by a Rhai engine with the spreadsheet builtins.
pub struct RhaiEvaluator {
    engine: Engine,
    timeout: Duration,
    deadline: Arc<Deadline>,
    capture: SharedCapture,
}

impl RhaiEvaluator {
    pub fn new(timeout: Duration) -> Self {
        let mut engine = Engine::new();
        let deadline = Arc::new(Deadline::default());
        crate::builtins::register_builtins(&mut engine, &deadline);

        let progress_deadline = Arc::clone(&deadline);
        engine.on_progress(move |_| {
            if progress_deadline.expired() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let capture: SharedCapture = Arc::default();
        let print_capture = Arc::clone(&capture);
        engine.on_print(move |text| {
            let mut capture = print_capture.lock().unwrap_or_else(PoisonError::into_inner);
            match capture.as_mut() {
                Some(capture) => {
                    capture.stdout.push_str(text);
                    capture.stdout.push('\n');
                }
                None => debug!(target: "tabula::print", "{}", text),
            }
        });
        let debug_capture = Arc::clone(&capture);
        engine.on_debug(move |text, _source, _pos| {
            let mut capture = debug_capture.lock().unwrap_or_else(PoisonError::into_inner);
            match capture.as_mut() {
                Some(capture) => {
                    capture.stderr.push_str(text);
                    capture.stderr.push('\n');
                }
                None => debug!(target: "tabula::debug", "{}", text),
            }
        });

        RhaiEvaluator {
            engine,
            timeout,
            deadline,
            capture,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn scope_for(&self, env: &Environment) -> Scope<'static> {
        let mut scope = Scope::new();
        {
            let namespace = env
                .namespace
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, value) in namespace.iter() {
                scope.push_dynamic(name.to_string(), value.clone());
            }
        }
        let Key { row, col, sheet } = env.key;
        for (names, value) in [(["X", "R"], row), (["Y", "C"], col), (["Z", "T"], sheet)] {
            let value = i64::try_from(value).unwrap_or(i64::MAX);
            for name in names {
                scope.push_constant(name, value);
            }
        }
        scope.push_constant("S", env.grid.clone());
        scope
    }

    fn with_functions(&self, ast: AST, env: &Environment) -> AST {
        let namespace = env
            .namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match namespace.functions() {
            Some(functions) => functions.merge(&ast),
            None => ast,
        }
    }

    fn to_eval_error(&self, err: &EvalAltResult) -> EvalError {
        if self.deadline.expired() {
            return EvalError::timeout(self.timeout.as_secs_f64());
        }
        match root_cause(err) {
            EvalAltResult::ErrorTerminated(..) => EvalError::timeout(self.timeout.as_secs_f64()),
            EvalAltResult::ErrorRuntime(value, _) if value.is::<EvalError>() => {
                value.clone().cast::<EvalError>()
            }
            EvalAltResult::ErrorParsing(..) => EvalError::parse(err.to_string()),
            _ => EvalError::runtime(err.to_string()),
        }
    }

    /// Copy top-level variables and function definitions of a finished
    /// script run into the namespace.
    fn absorb(&self, scope: &Scope, ast: &AST, env: &Environment) {
        let mut namespace = env
            .namespace
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, _, value) in scope.iter() {
            if RESERVED_NAMES.contains(&name) {
                continue;
            }
            namespace.set(name, value);
        }
        namespace.set_functions(ast.clone_functions_only());
    }

    fn traceback(&self, err: &EvalAltResult) -> String {
        if let Some(EvalError { message, .. }) = self.timeout_error(err) {
            return format!("{}\n", message);
        }
        let mut lines = vec!["Traceback (most recent call last):".to_string()];
        let mut current = err;
        while let EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) = current {
            if !pos.is_none() {
                lines.push(format!("  in call to function '{}' ({})", name, pos));
            }
            current = inner;
        }
        lines.push(match current {
            EvalAltResult::ErrorRuntime(value, pos) if value.is::<EvalError>() => {
                format!("{} ({})", value.clone().cast::<EvalError>(), pos)
            }
            other => other.to_string(),
        });
        lines.join("\n") + "\n"
    }

    fn timeout_error(&self, err: &EvalAltResult) -> Option<EvalError> {
        let err = self.to_eval_error(err);
        (err.kind == super::value::EvalErrorKind::Timeout).then_some(err)
    }
}

/// Innermost error behind any chain of function-call frames.
fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

impl Evaluator for RhaiEvaluator {
    fn evaluate(&self, source: &str, env: &Environment) -> EvalResult {
        let (target, expression) = match classify(source)? {
            Statement::Empty => return Ok(Dynamic::UNIT),
            Statement::Assignment { target, expression } => (Some(target), expression),
            Statement::Expression => (None, source),
        };
        trace!(key = %env.key, binding = ?target, "evaluating cell");

        let _guard = self.deadline.enter(self.timeout);
        let ast = self
            .engine
            .compile(expression)
            .map_err(|e| EvalError::parse(e.to_string()))?;
        let ast = self.with_functions(ast, env);
        let mut scope = self.scope_for(env);
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| self.to_eval_error(&e))?;

        if let Some(target) = target {
            env.namespace
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .set(target, value.clone());
        }
        Ok(value)
    }

    fn execute(&self, script: &str, env: &Environment) -> MacroOutput {
        let script = script.replace("\r\n", "\n");
        *self.capture.lock().unwrap_or_else(PoisonError::into_inner) = Some(Capture::default());

        let error = {
            let _guard = self.deadline.enter(self.timeout);
            match self.engine.compile(&script) {
                Err(e) => Some(format!("Traceback (most recent call last):\nSyntax error: {}\n", e)),
                Ok(ast) => {
                    let ast = self.with_functions(ast, env);
                    let mut scope = self.scope_for(env);
                    let result = self.engine.run_ast_with_scope(&mut scope, &ast);
                    self.absorb(&scope, &ast, env);
                    result.err().map(|e| self.traceback(&e))
                }
            }
        };

        let captured = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        let mut stderr = captured.stderr;
        if let Some(error) = error {
            stderr.push_str(&error);
        }
        MacroOutput {
            stdout: captured.stdout,
            stderr,
        }
    }
}
