use std::io::Write;
use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{FunctionKind, Tail, UserFunction, Value};
use crate::builtinops::{OPERATOR_ALIASES, find_native, find_special_form, get_native_ops};
use crate::context::{
    self, AnonymousFunction, Captures, Closure, Context, GlobalTable, Namespace, PRELUDE_PATH,
};
use crate::memory::{Address, Heap, HeapHost, HeapStatus};
use crate::{
    DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_MODULE, Error, EvalError, SyntaxError,
};

/// Evaluator settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Module of the namespace used by [`Evaluator::eval`]
    pub default_module: String,
    /// Bound on nested ordinary and closure calls
    pub max_call_depth: usize,
    /// Largest buffer `builtin.memory` may allocate for one chunk
    pub max_chunk_bytes: usize,
    /// Register the `prelude` operator aliases (`+`, `<`, ...)
    pub operator_aliases: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            default_module: DEFAULT_MODULE.to_owned(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            operator_aliases: true,
        }
    }
}

/// Tree-walking evaluator owning the global table and the heap
///
/// ```
/// use ircore::{Evaluator, Value};
///
/// let mut evaluator = Evaluator::new();
/// let result = evaluator
///     .eval(&Value::from(vec![
///         Value::from("native.i64.add"),
///         Value::from(1),
///         Value::from(2),
///     ]))
///     .unwrap();
/// assert_eq!(result, Value::from(3));
/// ```
pub struct Evaluator {
    globals: GlobalTable,
    heap: Heap,
    config: EvaluatorConfig,
    output: Box<dyn Write>,
    call_depth: usize,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("globals", &self.globals.len())
            .field("heap", &self.heap.status())
            .field("config", &self.config)
            .field("call_depth", &self.call_depth)
            .finish()
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator::with_config(EvaluatorConfig::default())
    }

    /// Create an evaluator with the native catalogue registered
    pub fn with_config(config: EvaluatorConfig) -> Self {
        let mut globals = GlobalTable::new();
        for op in get_native_ops() {
            globals.register(op.id, Value::Native(op));
        }
        if config.operator_aliases {
            for (alias, target) in OPERATOR_ALIASES {
                if let Some(op) = find_native(target) {
                    globals.register(format!("{PRELUDE_PATH}.{alias}"), Value::Native(op));
                }
            }
        }
        debug!(
            "evaluator ready: {} globals, default module {}",
            globals.len(),
            config.default_module
        );

        Evaluator {
            globals,
            heap: Heap::with_max_chunk_bytes(config.max_chunk_bytes),
            config,
            output: Box::new(std::io::stdout()),
            call_depth: 0,
        }
    }

    /// Redirect `builtin.io` output
    #[must_use]
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn status(&self) -> HeapStatus {
        self.heap.status()
    }

    pub fn default_namespace(&self) -> Namespace {
        Namespace::module(&self.config.default_module)
    }

    pub fn create_namespace(&self, module_name: &str, full_path: &str) -> Namespace {
        debug!("creating namespace {full_path} in module {module_name}");
        Namespace::new(module_name, full_path)
    }

    /// Evaluate in the default namespace
    pub fn eval(&mut self, expr: &Value) -> Result<Value, Error> {
        let context = Context::Namespace(self.default_namespace());
        self.eval_in(expr, &context)
    }

    /// Evaluate an expression against an explicit context
    pub fn eval_in(&mut self, expr: &Value, context: &Context) -> Result<Value, Error> {
        match expr {
            Value::Number(_) => Ok(expr.clone()),
            Value::Symbol(name) => self.resolve(name, context),
            Value::List(elements) => self.eval_list(elements, context),
            // already evaluated runtime values
            Value::Native(_) | Value::Function(_) | Value::Tail(_) => Ok(expr.clone()),
        }
    }

    /// Evaluate a single S-expression in the default namespace
    #[cfg(feature = "sexpr")]
    pub fn eval_str(&mut self, source: &str) -> Result<Value, Error> {
        let expr = crate::sexpr::parse_sexpr(source)?;
        self.eval(&expr)
    }

    /// Evaluate a sequence of top-level forms in the default namespace, returning the last value
    #[cfg(feature = "sexpr")]
    pub fn eval_str_multi(&mut self, source: &str) -> Result<Value, Error> {
        let exprs = crate::sexpr::parse_program(source)?;
        let context = Context::Namespace(self.default_namespace());
        self.eval_sequence(&exprs, &context)
    }

    /// Evaluate `source` as the top-level forms of module `module_name`
    #[cfg(feature = "sexpr")]
    pub fn load_module(&mut self, module_name: &str, source: &str) -> Result<Value, Error> {
        let exprs = crate::sexpr::parse_program(source)?;
        self.load_module_exprs(module_name, &exprs)
    }

    #[cfg(feature = "sexpr")]
    pub fn load_module_from_file(
        &mut self,
        module_name: &str,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Value, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| EvalError::Io {
            message: format!("{}: {err}", path.display()),
        })?;
        self.load_module(module_name, &source)
    }

    /// Evaluate already parsed top-level forms inside the root namespace of `module_name`
    pub fn load_module_exprs(&mut self, module_name: &str, exprs: &[Value]) -> Result<Value, Error> {
        debug!("loading module {module_name} ({} forms)", exprs.len());
        let context = Context::Namespace(Namespace::module(module_name));
        self.eval_sequence(exprs, &context)
    }

    /// Invoke the function named `name` with already evaluated arguments
    ///
    /// Unqualified names resolve in the default namespace.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
        let context = Context::Namespace(self.default_namespace());
        let callee = self.resolve(name, &context)?;
        self.apply(&Value::from(name), &callee, args)
    }

    pub(crate) fn write_output(&mut self, text: &str) -> Result<(), Error> {
        self.output
            .write_all(text.as_bytes())
            .and_then(|()| self.output.flush())
            .map_err(|err| {
                EvalError::Io {
                    message: err.to_string(),
                }
                .into()
            })
    }

    fn resolve(&self, name: &str, context: &Context) -> Result<Value, Error> {
        context::resolve(name, context, &self.globals)
    }

    fn eval_sequence(&mut self, exprs: &[Value], context: &Context) -> Result<Value, Error> {
        let mut result = Value::List(vec![]);
        for expr in exprs {
            result = self.eval_in(expr, context)?;
        }
        Ok(result)
    }

    fn eval_list(&mut self, elements: &[Value], context: &Context) -> Result<Value, Error> {
        let Some((head, rest)) = elements.split_first() else {
            return Err(SyntaxError::InvalidExpression {
                expression: "()".to_owned(),
            }
            .into());
        };

        if let Value::Symbol(keyword) = head
            && let Some(form) = find_special_form(keyword)
        {
            form.arity.validate(form.keyword, rest.len())?;
            return (form.eval)(self, rest, context);
        }

        let callee = self.eval_in(head, context)?;
        let args = rest
            .iter()
            .map(|arg| self.eval_in(arg, context))
            .collect::<Result<Vec<_>, _>>()?;
        self.apply(head, &callee, args)
    }

    /// Call an evaluated operator; `callee_expr` names it in error reports
    fn apply(&mut self, callee_expr: &Value, callee: &Value, args: Vec<Value>) -> Result<Value, Error> {
        match callee {
            Value::Native(op) => op.call(self, &args),
            Value::Function(func) => self.call_function(Rc::clone(func), args),
            Value::Number(address) => match callee.as_address().and_then(|a| self.heap.closure(a)) {
                Some(closure) => self.call_closure(closure, args),
                None => Err(EvalError::AddressNotAClosure { address: *address }.into()),
            },
            _ => Err(EvalError::IdentifierNotAFunction {
                name: callee_expr.to_string(),
            }
            .into()),
        }
    }

    fn call_function(&mut self, func: Rc<UserFunction>, args: Vec<Value>) -> Result<Value, Error> {
        check_arity(&func.full_name(), func.params.len(), args.len())?;
        let parent = Context::Namespace(func.namespace.clone());
        self.with_call_frame(|evaluator| match func.kind {
            FunctionKind::Ordinary => {
                let scope = parent.bind(&func.params, args)?;
                evaluator.eval_in(&func.body, &scope)
            }
            FunctionKind::Recursion => {
                evaluator.trampoline(&parent, &func.params, args, &func.body, true)
            }
        })
    }

    /// Closures bind over a scope whose parent is the closure itself
    fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<Value>) -> Result<Value, Error> {
        let template = closure.template();
        check_arity("fn", template.params.len(), args.len())?;
        let parent = Context::Closure(Rc::clone(&closure));
        self.with_call_frame(|evaluator| {
            evaluator.trampoline(&parent, &template.params, args, &template.body, false)
        })
    }

    fn with_call_frame<T>(
        &mut self,
        call: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.call_depth >= self.config.max_call_depth {
            return Err(EvalError::CallDepthExceeded {
                limit: self.config.max_call_depth,
            }
            .into());
        }
        self.call_depth += 1;
        let result = call(self);
        self.call_depth -= 1;
        result
    }

    /// Evaluate `body` under fresh bindings of `params` until it breaks
    ///
    /// With `require_tail` unset, an untagged result ends the iteration as the
    /// call's value; otherwise every iteration must end in `recur` or `break`.
    fn trampoline(
        &mut self,
        parent: &Context,
        params: &[String],
        mut args: Vec<Value>,
        body: &Value,
        require_tail: bool,
    ) -> Result<Value, Error> {
        loop {
            let scope = parent.bind(params, args)?;
            match self.eval_in(body, &scope)? {
                Value::Tail(Tail::Stop(value)) => return Ok(*value),
                Value::Tail(Tail::Continue(values)) => {
                    if values.len() != params.len() {
                        return Err(SyntaxError::IncorrectNumberOfLoopArgs {
                            actual: values.len(),
                            expect: params.len(),
                        }
                        .into());
                    }
                    trace!("recur with {} values", values.len());
                    args = values;
                }
                result if !require_tail => return Ok(result),
                other => {
                    return Err(SyntaxError::RequireRecurOrBreak {
                        found: other.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

impl HeapHost for Evaluator {
    fn heap(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Runs as the ordinary call `(destructor address)`
    fn run_destructor(&mut self, destructor: &str, address: Address) -> Result<(), Error> {
        self.call(destructor, vec![Value::from(address)]).map(|_| ())
    }
}

fn check_arity(name: &str, expect: usize, actual: usize) -> Result<(), Error> {
    if actual == expect {
        Ok(())
    } else {
        Err(SyntaxError::IncorrectNumberOfParameters {
            name: name.to_owned(),
            actual,
            expect,
        }
        .into())
    }
}

fn expect_symbol<'a>(form: &'static str, value: &'a Value) -> Result<&'a str, Error> {
    value
        .as_symbol()
        .ok_or_else(|| Error::invalid_form(form, format!("expected an identifier, got {value}")))
}

/// A parenthesized list of identifiers, e.g. a parameter list
fn symbol_list(form: &'static str, value: &Value) -> Result<Vec<String>, Error> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| expect_symbol(form, item).map(str::to_owned))
            .collect(),
        other => Err(Error::invalid_form(
            form,
            format!("expected a list of identifiers, got {other}"),
        )),
    }
}

fn require_namespace<'a>(form: &'static str, context: &'a Context) -> Result<&'a Namespace, Error> {
    match context {
        Context::Namespace(ns) => Ok(ns),
        _ => Err(Error::invalid_form(
            form,
            "only allowed at namespace level",
        )),
    }
}

//
// Special forms (registered in builtinops)
//

/// `(const name value)`
pub(crate) fn eval_const(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [name, value] = args else {
        return Err(Error::invalid_form("const", "expected a name and a value"));
    };
    let ns = require_namespace("const", context)?;
    let name = expect_symbol("const", name)?;
    let value = evaluator.eval_in(value, context)?;
    evaluator.globals.define(ns.qualify(name), value)
}

/// `(let name value)`
pub(crate) fn eval_let(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [name, value] = args else {
        return Err(Error::invalid_form("let", "expected a name and a value"));
    };
    if !matches!(context, Context::Scope(_)) {
        return Err(Error::invalid_form("let", "only allowed inside a scope"));
    }
    let name = expect_symbol("let", name)?;
    let value = evaluator.eval_in(value, context)?;
    context.define_identifier(name, value)
}

/// `(namespace path body...)`, where an empty path `()` means the module root
pub(crate) fn eval_namespace(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let Some((path, body)) = args.split_first() else {
        return Err(Error::invalid_form("namespace", "missing path"));
    };
    let current = require_namespace("namespace", context)?;
    let ns = match path {
        Value::List(items) if items.is_empty() => current.child(None),
        Value::Symbol(path) => current.child(Some(path)),
        other => {
            return Err(Error::invalid_form(
                "namespace",
                format!("expected a path or (), got {other}"),
            ));
        }
    };
    let ns = evaluator.create_namespace(ns.module_name(), ns.full_path());
    evaluator.eval_sequence(body, &Context::Namespace(ns))
}

/// `(do body...)`
pub(crate) fn eval_do(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    evaluator.eval_sequence(args, &context.child_scope())
}

/// `(if cond then else)`
pub(crate) fn eval_if(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [condition, then_expr, else_expr] = args else {
        return Err(Error::invalid_form("if", "expected condition, then and else"));
    };
    if evaluator.eval_in(condition, context)?.is_truthy() {
        evaluator.eval_in(then_expr, context)
    } else {
        evaluator.eval_in(else_expr, context)
    }
}

/// `(loop params inits body)`
pub(crate) fn eval_loop(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [params, inits, body] = args else {
        return Err(Error::invalid_form("loop", "expected params, inits and body"));
    };
    let params = symbol_list("loop", params)?;
    let Value::List(inits) = inits else {
        return Err(Error::invalid_form(
            "loop",
            format!("expected a list of initial values, got {inits}"),
        ));
    };
    if inits.len() != params.len() {
        return Err(SyntaxError::IncorrectNumberOfLoopArgs {
            actual: inits.len(),
            expect: params.len(),
        }
        .into());
    }
    let values = inits
        .iter()
        .map(|init| evaluator.eval_in(init, context))
        .collect::<Result<Vec<_>, _>>()?;
    evaluator.trampoline(context, &params, values, body, true)
}

/// `(recur v...)`
pub(crate) fn eval_recur(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let values = args
        .iter()
        .map(|arg| evaluator.eval_in(arg, context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Tail(Tail::Continue(values)))
}

/// `(break v)`
pub(crate) fn eval_break(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [value] = args else {
        return Err(SyntaxError::RequireLoopReturnOneValue {
            actual: args.len(),
            expect: 1,
        }
        .into());
    };
    let value = evaluator.eval_in(value, context)?;
    Ok(Value::Tail(Tail::Stop(Box::new(value))))
}

fn define_function(
    evaluator: &mut Evaluator,
    form: &'static str,
    kind: FunctionKind,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [name, params, body] = args else {
        return Err(Error::invalid_form(form, "expected name, params and body"));
    };
    let ns = require_namespace(form, context)?;
    let name = expect_symbol(form, name)?;
    let func = UserFunction {
        name: name.to_owned(),
        kind,
        params: symbol_list(form, params)?,
        body: body.clone(),
        namespace: ns.clone(),
    };
    evaluator
        .globals
        .define(ns.qualify(name), Value::Function(Rc::new(func)))
}

/// `(defn name params body)`
pub(crate) fn eval_defn(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    define_function(evaluator, "defn", FunctionKind::Ordinary, args, context)
}

/// `(defnr name params body)`: the body must end every branch in `recur` or `break`
pub(crate) fn eval_defnr(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    define_function(evaluator, "defnr", FunctionKind::Recursion, args, context)
}

/// `(fn params primitive-captures reference-captures body)`
///
/// Captured values are read from the current context, and the closure is grounded
/// at the nearest enclosing namespace. Evaluates to the closure chunk's address.
pub(crate) fn eval_fn(
    evaluator: &mut Evaluator,
    args: &[Value],
    context: &Context,
) -> Result<Value, Error> {
    let [params, primitives, references, body] = args else {
        return Err(Error::invalid_form(
            "fn",
            "expected params, primitive captures, reference captures and body",
        ));
    };
    let template = AnonymousFunction {
        params: symbol_list("fn", params)?,
        body: body.clone(),
    };

    let mut captures = Captures::new();
    for name in symbol_list("fn", references)? {
        let value = evaluator.resolve(&name, context)?;
        let address = value
            .as_address()
            .ok_or_else(|| Error::type_mismatch("address", &value))?;
        captures = captures.reference(name, address);
    }
    for name in symbol_list("fn", primitives)? {
        let value = evaluator.resolve(&name, context)?;
        captures = captures.primitive(name, value);
    }

    let address = evaluator
        .heap
        .create_closure(template, context.namespace(), captures)?;
    trace!("closure materialized at {address}");
    Ok(Value::from(address))
}

#[cfg(all(test, feature = "sexpr"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::IdentifierError;
    use crate::ast::{nil, val};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with this error code
        Succeeds,                    // Evaluation should succeed (value not checked)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for definitions whose value (a function) is not compared
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, Succeeds)
        };
    }

    /// Captures `builtin.io` output
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run tests in isolated evaluators with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let mut evaluator = Evaluator::new().with_output(SharedBuffer::default());

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &mut evaluator, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(
        input: &str,
        expected: &TestResult,
        evaluator: &mut Evaluator,
        test_id: &str,
    ) {
        match (evaluator.eval_str_multi(input), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(
                    &actual, expected_val,
                    "{test_id}: unexpected value for '{input}'"
                );
            }
            (Ok(_), Succeeds) => {}
            (Err(err), SpecificError(code)) => {
                assert_eq!(err.code(), *code, "{test_id}: '{input}' failed with {err}");
            }
            (Ok(actual), SpecificError(code)) => {
                panic!("{test_id}: expected error {code} for '{input}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?} for '{input}', got error {err}");
            }
            (Err(err), Succeeds) => {
                panic!("{test_id}: expected '{input}' to succeed, got error {err}");
            }
        }
    }

    /// Each case runs in a fresh evaluator
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let mut evaluator = Evaluator::new().with_output(SharedBuffer::default());
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &mut evaluator, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("1.5", success(1.5)),
            ("0x10", success(16)),
            ("7s", success(7)),
            ("()", SpecificError("INVALID_EXPRESSION")),
            // === IDENTIFIERS ===
            ("noSuchThing", SpecificError("IDENTIFIER_NOT_FOUND")),
            ("user.noSuchThing", SpecificError("IDENTIFIER_NOT_FOUND")),
            (
                "native.i64.add",
                success(Value::Native(find_native("native.i64.add").unwrap())),
            ),
            ("+", success(Value::Native(find_native("native.i64.add").unwrap()))),
            // === NATIVE CALLS ===
            ("(native.i64.add 1 2)", success(3)),
            ("(native.i64.sub 10 (native.i64.mul 2 3))", success(4)),
            ("(+ 1 2)", success(3)),
            ("(% 17 5)", success(2)),
            ("(!= 1 2)", success(1)),
            ("(native.f64.sqrt 2.25)", success(1.5)),
            ("(builtin.logic.and (< 1 2) (> 3 2))", success(1)),
            ("(builtin.logic.not (= 1 1))", success(0)),
            ("(native.i64.add 1)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(/ 1 0)", SpecificError("DIVISION_BY_ZERO")),
            ("(native.i64.div_u 4 2)", SpecificError("NOT_IMPLEMENTED")),
            ("(builtin.io.panic 3)", SpecificError("RUNTIME_EXCEPTION")),
            ("(noThisFunction)", SpecificError("IDENTIFIER_NOT_FOUND")),
            // Operator position is evaluated like any other expression
            ("((if 1 + *) 2 3)", success(5)),
            ("((if 0 + *) 2 3)", success(6)),
            ("(1 2)", SpecificError("ADDRESS_NOT_A_CLOSURE")),
            ("((recur) 1)", SpecificError("IDENTIFIER_NOT_A_FUNCTION")),
            // === IF ===
            ("(if 1 10 20)", success(10)),
            ("(if 0 10 20)", success(20)),
            // only the integer 1 is true
            ("(if 2 10 20)", success(20)),
            ("(if (< 1 2) 3 4)", success(3)),
            ("(if 1 2)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(if 1 2 3 4)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            // === CONST ===
            ("(const PI 3)", success(3)),
            ("(const PI 3) PI", success(3)),
            ("(const PI 3) user.PI", success(3)),
            ("(const PI 3) (const PI 4)", SpecificError("IDENTIFIER_ALREADY_EXIST")),
            ("(do (const a 1))", SpecificError("INVALID_CONST_EXPRESSION")),
            ("(const 1 1)", SpecificError("INVALID_CONST_EXPRESSION")),
            ("(const a)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            // === DO AND LET ===
            ("(do)", success(nil())),
            ("(do 1 2 3)", success(3)),
            ("(do (let a 1) (let b 2) (+ a b))", success(3)),
            ("(do (let a 1) (let a 2))", SpecificError("IDENTIFIER_ALREADY_EXIST")),
            ("(do (let a 1) (do (let a 2) a))", success(2)),
            ("(do (let i 1) (do (let j i) j))", success(1)),
            ("(do (do (let i 1)) i)", SpecificError("IDENTIFIER_NOT_FOUND")),
            ("(let a 1)", SpecificError("INVALID_LET_EXPRESSION")),
            ("(do (let a))", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            // === NAMESPACE ===
            ("(namespace () (const x 1))", success(1)),
            ("(namespace math (const PI 3)) user.math.PI", success(3)),
            ("(namespace math)", success(nil())),
            ("(namespace)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(namespace 1 2)", SpecificError("INVALID_NAMESPACE_EXPRESSION")),
            ("(do (namespace a 1))", SpecificError("INVALID_NAMESPACE_EXPRESSION")),
            // === LOOP / RECUR / BREAK ===
            ("(loop (i) (1) (if (< i 10) (recur (+ i 1)) (break i)))", success(10)),
            (
                "(loop (i sum) (1 0) (if (> i 100) (break sum) (recur (+ i 1) (+ sum i))))",
                success(5050),
            ),
            ("(loop () () (break 7))", success(7)),
            (
                "(loop (i) (0) (do (let next (+ i 1)) (if (= next 5) (break next) (recur next))))",
                success(5),
            ),
            ("(loop (i) (1 2) (break i))", SpecificError("INCORRECT_NUMBER_OF_LOOP_ARGS")),
            ("(loop (i) (1) (recur 1 2))", SpecificError("INCORRECT_NUMBER_OF_LOOP_ARGS")),
            ("(loop (i) (1) i)", SpecificError("REQUIRE_RECUR_OR_BREAK")),
            ("(loop (i) (1) (break))", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(loop (i) (1) (break 1 2))", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(loop (i) (1))", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(loop (1) (1) (break 1))", SpecificError("INVALID_LOOP_EXPRESSION")),
            ("(loop (i) 1 (break 1))", SpecificError("INVALID_LOOP_EXPRESSION")),
            ("(recur 1 2)", success(Value::Tail(Tail::Continue(vec![val(1), val(2)])))),
            ("(break 3)", success(Value::Tail(Tail::Stop(Box::new(val(3)))))),
            // the loop scope is gone once the loop returns
            ("(do (loop (i) (1) (break i)) i)", SpecificError("IDENTIFIER_NOT_FOUND")),
            // === DEFN OUTSIDE NAMESPACES ===
            ("(do (defn f (x) x))", SpecificError("INVALID_DEFN_EXPRESSION")),
            ("(do (defnr f (x) (break x)))", SpecificError("INVALID_DEFNR_EXPRESSION")),
            ("(defn f x x)", SpecificError("INVALID_DEFN_EXPRESSION")),
            ("(defn f (x))", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(defnr f (x) (break x) 1)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            // === CLOSURES ===
            ("(fn (i) () () i)", success(0)),
            ("(do (let f (fn (i) () () (native.i64.mul i 3))) (f 7))", success(21)),
            (
                "(do (let f (fn (i) () () i)) (f 1 2))",
                SpecificError("INCORRECT_NUMBER_OF_PARAMETERS"),
            ),
            (
                "(do (let b (builtin.memory.create_bytes 8)) (b 1))",
                SpecificError("ADDRESS_NOT_A_CLOSURE"),
            ),
            ("(do (let f 5) (f))", SpecificError("ADDRESS_NOT_A_CLOSURE")),
            ("(fn () () (nope) 1)", SpecificError("IDENTIFIER_NOT_FOUND")),
            ("(do (let x 5) (fn () () (x) 1))", SpecificError("INVALID_ADDRESS")),
            ("(do (let x 1.5) (fn () () (x) 1))", SpecificError("TYPE_MISMATCH")),
            ("(fn (i) ())", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(fn (x) () ())", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ("(fn x () () 1)", SpecificError("INVALID_FN_EXPRESSION")),
            // closures iterate with recur/break
            (
                "(do
                    (let count (fn (i acc) () ()
                        (if (= i 0) (break acc) (recur (- i 1) (+ acc i)))))
                    (count 100 0))",
                success(5050),
            ),
            // captured values are copies taken at creation time
            (
                "(do (let x 4) (let f (fn () (x) () (* x x))) (do (let x 9) (f)))",
                success(16),
            ),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_definitions_with_shared_state() {
        let test_environments = vec![
            // fibonacci through operator aliases
            TestEnvironment(vec![
                test_setup!(
                    "(defn fib (i) (if (= i 1) 1 (if (= i 2) 2 (+ (fib (- i 1)) (fib (- i 2))))))"
                ),
                ("(fib 8)", success(34)),
                ("(fib 1)", success(1)),
                ("(user.fib 5)", success(8)),
                ("(defn fib (i) i)", SpecificError("IDENTIFIER_ALREADY_EXIST")),
                ("(fib)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
            ]),
            // constants and static scoping
            TestEnvironment(vec![
                ("(const THREE 3)", success(3)),
                test_setup!("(defn five () 5)"),
                ("(five)", success(5)),
                test_setup!("(defn inc (x) (+ THREE x))"),
                ("(inc 4)", success(7)),
                test_setup!("(defn incAndDouble (y) (do (let z (inc y)) (* z 2)))"),
                ("(incAndDouble 2)", success(10)),
                test_setup!("(defn readY () y)"),
                // the caller's locals are invisible to the callee
                ("(do (let y 1) (readY))", SpecificError("IDENTIFIER_NOT_FOUND")),
                // a parameter shadows a global of the same name
                test_setup!("(defn shadow (THREE) THREE)"),
                ("(shadow 9)", success(9)),
            ]),
            // defnr and loop equivalence
            TestEnvironment(vec![
                test_setup!("(defnr countTo (i) (if (< i 10) (recur (+ i 1)) (break i)))"),
                ("(countTo 1)", success(10)),
                (
                    "(= (countTo 1) (loop (i) (1) (if (< i 10) (recur (+ i 1)) (break i))))",
                    success(1),
                ),
                test_setup!(
                    "(defnr sumTo (i acc) (if (> i 100) (break acc) (recur (+ i 1) (+ acc i))))"
                ),
                ("(sumTo 1 0)", success(5050)),
                ("(sumTo 1)", SpecificError("INCORRECT_NUMBER_OF_PARAMETERS")),
                test_setup!("(defnr big (i) (if (= i 100000) (break i) (recur (+ i 1))))"),
                ("(big 0)", success(100_000)),
                test_setup!("(defnr bad (i) i)"),
                ("(bad 1)", SpecificError("REQUIRE_RECUR_OR_BREAK")),
                test_setup!("(defnr wide (i) (recur i i))"),
                ("(wide 1)", SpecificError("INCORRECT_NUMBER_OF_LOOP_ARGS")),
            ]),
            // closures inside functions
            TestEnvironment(vec![
                test_setup!(
                    "(defn foo (i) (do (let bar (fn () (i) () 3)) (let result (+ i (bar))) result))"
                ),
                ("(foo 2)", success(5)),
                test_setup!("(defn makeInc (much) (fn (base) (much) () (+ base much)))"),
                ("(do (let incTwo (makeInc 2)) (incTwo 6))", success(8)),
                test_setup!("(defn execFun (i f) (f i))"),
                ("(do (let pf (fn (i) () () (* i 2))) (execFun 3 pf))", success(6)),
                ("(const K 10)", success(10)),
                ("(do (let f (fn (x) () () (+ x K))) (f 1))", success(11)),
            ]),
            // namespaces
            TestEnvironment(vec![
                ("(namespace math (const PI 3))", success(3)),
                ("user.math.PI", success(3)),
                ("PI", SpecificError("IDENTIFIER_NOT_FOUND")),
                ("(namespace math (defn double (x) (* x 2)) (double PI))", success(6)),
                ("(user.math.double 4)", success(8)),
                ("(namespace math (const PI 4))", SpecificError("IDENTIFIER_ALREADY_EXIST")),
                ("(namespace () (const E 2))", success(2)),
                ("E", success(2)),
                // paths are relative to the module, not to the enclosing namespace
                ("(namespace a (namespace b (const C 1)))", success(1)),
                ("user.b.C", success(1)),
            ]),
            // calling a constant
            TestEnvironment(vec![
                ("(const foo 2)", success(2)),
                ("(foo 1 2)", SpecificError("ADDRESS_NOT_A_CLOSURE")),
            ]),
        ];

        run_tests_in_environment(test_environments);
    }

    #[test]
    fn test_error_payloads() {
        let mut evaluator = Evaluator::new();

        assert_eq!(
            evaluator.eval_str("(native.i64.add 1)").unwrap_err(),
            Error::Syntax(SyntaxError::IncorrectNumberOfParameters {
                name: "native.i64.add".to_owned(),
                actual: 1,
                expect: 2,
            })
        );
        assert_eq!(
            evaluator.eval_str("(noThisFunction)").unwrap_err(),
            Error::Identifier(IdentifierError::NotFound {
                name: "user.noThisFunction".to_owned(),
            })
        );
        assert_eq!(
            evaluator.eval_str("(do (do (let i 1)) i)").unwrap_err(),
            Error::Identifier(IdentifierError::NotFound {
                name: "user.i".to_owned(),
            })
        );

        evaluator.eval_str("(const foo 2)").unwrap();
        assert_eq!(
            evaluator.eval_str("(foo 1 2)").unwrap_err(),
            Error::Eval(EvalError::AddressNotAClosure { address: 2.0 })
        );
        assert_eq!(
            evaluator.eval_str("(loop (i) (1) (break 1 2))").unwrap_err(),
            Error::Syntax(SyntaxError::IncorrectNumberOfParameters {
                name: "break".to_owned(),
                actual: 2,
                expect: 1,
            })
        );
        assert_eq!(
            evaluator.eval_str("(if 1 2)").unwrap_err(),
            Error::Syntax(SyntaxError::IncorrectNumberOfParameters {
                name: "if".to_owned(),
                actual: 2,
                expect: 3,
            })
        );
        assert_eq!(
            evaluator.eval_str("(do (let f (fn (a b) () () a)) (f 1))").unwrap_err(),
            Error::Syntax(SyntaxError::IncorrectNumberOfParameters {
                name: "fn".to_owned(),
                actual: 1,
                expect: 2,
            })
        );
    }

    #[test]
    fn test_struct_teardown() {
        let mut evaluator = Evaluator::new();
        let result = evaluator
            .eval_str(
                "(do
                    (let parent (builtin.memory.create_struct 24 3))
                    (builtin.memory.inc_ref parent)
                    (builtin.memory.add_ref parent 0 (builtin.memory.create_bytes 8))
                    (builtin.memory.add_ref parent 8 (builtin.memory.create_bytes 8))
                    (builtin.memory.write_i64 parent 16 99)
                    (builtin.memory.dec_ref parent))",
            )
            .unwrap();
        assert_eq!(result, val(0));
        assert_eq!(
            evaluator.status(),
            HeapStatus {
                capacity: 3,
                free: 3,
                used: 0
            }
        );

        // freed slots are reused first-fit
        assert_eq!(evaluator.eval_str("(builtin.memory.create_bytes 1)").unwrap(), val(0));
    }

    #[test]
    fn test_shared_child_outlives_first_parent() {
        let mut evaluator = Evaluator::new();
        evaluator
            .eval_str_multi(
                "(const child (builtin.memory.create_bytes 8))
                 (const p1 (builtin.memory.create_struct 8 1))
                 (const p2 (builtin.memory.create_struct 8 1))
                 (builtin.memory.inc_ref p1)
                 (builtin.memory.inc_ref p2)
                 (builtin.memory.add_ref p1 0 child)
                 (builtin.memory.add_ref p2 0 child)",
            )
            .unwrap();
        assert_eq!(evaluator.heap().chunk(0).unwrap().ref_count(), 2);

        evaluator.eval_str("(builtin.memory.dec_ref p1)").unwrap();
        assert_eq!(evaluator.heap().chunk(0).unwrap().ref_count(), 1);
        assert_eq!(evaluator.status().used, 2);

        evaluator.eval_str("(builtin.memory.dec_ref p2)").unwrap();
        assert_eq!(evaluator.status().used, 0);
    }

    #[test]
    fn test_destructor_runs_before_members_are_released() {
        let output = SharedBuffer::default();
        let mut evaluator = Evaluator::new().with_output(output.clone());
        let result = evaluator
            .eval_str_multi(
                "(defn drop (addr)
                    (builtin.io.print_i64
                        (builtin.memory.read_i32 (builtin.memory.read_address addr 0) 0)))
                 (do
                    (let p (builtin.memory.create_struct_destructor 8 1 drop))
                    (builtin.memory.inc_ref p)
                    (let child (builtin.memory.create_bytes 4))
                    (builtin.memory.write_i32 child 0 77)
                    (builtin.memory.add_ref p 0 child)
                    (builtin.memory.dec_ref p))",
            )
            .unwrap();

        assert_eq!(result, val(0));
        assert_eq!(output.contents(), "77\n");
        assert_eq!(evaluator.status().used, 0);
        assert_eq!(evaluator.status().capacity, 2);
    }

    #[test]
    fn test_destructor_errors_propagate() {
        let mut evaluator = Evaluator::new();
        evaluator
            .eval_str_multi(
                "(defn explode (addr) (builtin.io.panic 13))
                 (const child (builtin.memory.create_bytes 8))
                 (const p (builtin.memory.create_struct_destructor 8 1 explode))
                 (builtin.memory.inc_ref p)
                 (builtin.memory.add_ref p 0 child)",
            )
            .unwrap();
        assert_eq!(evaluator.status().used, 2);

        let err = evaluator.eval_str("(builtin.memory.dec_ref p)").unwrap_err();
        assert_eq!(err, Error::Eval(EvalError::RuntimeException { code: 13.0 }));

        // the failed destructor does not leave the chunk or its members behind
        assert!(!evaluator.heap().is_live(1));
        assert!(!evaluator.heap().is_live(0));
        assert_eq!(
            evaluator.status(),
            HeapStatus {
                capacity: 2,
                free: 2,
                used: 0
            }
        );
        assert_eq!(
            evaluator.eval_str("(builtin.memory.dec_ref p)").unwrap_err().code(),
            "INVALID_ADDRESS"
        );
    }

    #[test]
    fn test_destructor_error_mid_chain() {
        let output = SharedBuffer::default();
        let mut evaluator = Evaluator::new().with_output(output.clone());
        evaluator
            .eval_str_multi(
                "(defn explode (addr) (builtin.io.panic 7))
                 (defn report (addr) (builtin.io.print_i64 addr))
                 (const leaf (builtin.memory.create_struct_destructor 8 0 report))
                 (const middle (builtin.memory.create_struct_destructor 8 1 explode))
                 (const root (builtin.memory.create_struct_destructor 8 1 report))
                 (builtin.memory.inc_ref root)
                 (builtin.memory.add_ref root 0 middle)
                 (builtin.memory.add_ref middle 0 leaf)",
            )
            .unwrap();

        let err = evaluator.eval_str("(builtin.memory.dec_ref root)").unwrap_err();
        assert_eq!(err, Error::Eval(EvalError::RuntimeException { code: 7.0 }));
        // destructors below the failing one still ran, root first
        assert_eq!(output.contents(), "2\n0\n");
        assert_eq!(evaluator.status().used, 0);
    }

    #[test]
    fn test_allocation_limit() {
        let mut evaluator = Evaluator::with_config(EvaluatorConfig {
            max_chunk_bytes: 64,
            ..EvaluatorConfig::default()
        });
        assert_eq!(evaluator.eval_str("(builtin.memory.create_bytes 64)").unwrap(), val(0));
        assert_eq!(
            evaluator.eval_str("(builtin.memory.create_struct 72 0)").unwrap_err(),
            Error::Eval(EvalError::AllocationTooLarge {
                requested: 72,
                limit: 64,
            })
        );
        assert_eq!(
            evaluator
                .eval_str("(builtin.memory.create_bytes 1e20)")
                .unwrap_err()
                .code(),
            "ALLOCATION_TOO_LARGE"
        );
        // refused requests leave the heap untouched
        assert_eq!(evaluator.status().capacity, 1);

        let mut evaluator = Evaluator::new();
        assert_eq!(
            evaluator
                .eval_str("(builtin.memory.create_bytes 1e12)")
                .unwrap_err()
                .code(),
            "ALLOCATION_TOO_LARGE"
        );
    }

    #[test]
    fn test_closure_reference_capture_teardown() {
        let mut evaluator = Evaluator::new();
        let result = evaluator
            .eval_str(
                "(do
                    (let data (builtin.memory.create_bytes 8))
                    (builtin.memory.inc_ref data)
                    (builtin.memory.write_i64 data 0 41)
                    (let get (fn () () (data) (+ (builtin.memory.read_i64 data 0) 1)))
                    (builtin.memory.inc_ref get)
                    (let result (get))
                    (builtin.memory.dec_ref data)
                    (builtin.memory.dec_ref get)
                    result)",
            )
            .unwrap();
        assert_eq!(result, val(42));
        assert_eq!(evaluator.status().used, 0);
    }

    #[test]
    fn test_io_output() {
        let output = SharedBuffer::default();
        let mut evaluator = Evaluator::new().with_output(output.clone());
        assert_eq!(evaluator.eval_str("(builtin.io.print_i64 -42)").unwrap(), val(-42));
        assert_eq!(evaluator.eval_str("(builtin.io.putchar 104)").unwrap(), val(104));
        assert_eq!(evaluator.eval_str("(builtin.io.putchar 105)").unwrap(), val(105));
        assert_eq!(output.contents(), "-42\nhi");
    }

    #[test]
    fn test_call_depth_limit() {
        let config = EvaluatorConfig {
            max_call_depth: 16,
            ..EvaluatorConfig::default()
        };
        let mut evaluator = Evaluator::with_config(config);
        evaluator
            .eval_str("(defn deep (n) (if (= n 0) 0 (+ 1 (deep (- n 1)))))")
            .unwrap();

        assert_eq!(evaluator.eval_str("(deep 10)").unwrap(), val(10));
        assert_eq!(
            evaluator.eval_str("(deep 100)").unwrap_err(),
            Error::Eval(EvalError::CallDepthExceeded { limit: 16 })
        );
        // the depth counter unwinds with the error
        assert_eq!(evaluator.eval_str("(deep 15)").unwrap(), val(15));
        // trampolined iteration is not counted
        assert_eq!(
            evaluator
                .eval_str("(loop (i) (0) (if (= i 1000) (break i) (recur (+ i 1))))")
                .unwrap(),
            val(1000)
        );
    }

    #[test]
    fn test_default_call_depth() {
        // test threads get a small stack; give the recursion room to reach the cap
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let mut evaluator = Evaluator::new();
                evaluator
                    .eval_str("(defn deep (n) (if (= n 0) 0 (+ 1 (deep (- n 1)))))")
                    .unwrap();
                let within = evaluator.eval_str("(deep 900)").unwrap();
                let beyond = evaluator.eval_str("(deep 1200)").unwrap_err();
                // values are not Send, so report plain data back
                let at_default_limit = matches!(
                    beyond,
                    Error::Eval(EvalError::CallDepthExceeded { limit }) if limit == DEFAULT_MAX_CALL_DEPTH
                );
                (within.to_string(), at_default_limit)
            })
            .unwrap();
        let (within, at_default_limit) = handle.join().unwrap();

        assert_eq!(within, "900");
        assert!(at_default_limit);
    }

    #[test]
    fn test_without_operator_aliases() {
        let mut evaluator = Evaluator::with_config(EvaluatorConfig {
            operator_aliases: false,
            ..EvaluatorConfig::default()
        });
        assert_eq!(evaluator.eval_str("(+ 1 2)").unwrap_err().code(), "IDENTIFIER_NOT_FOUND");
        assert_eq!(evaluator.eval_str("(native.i64.add 1 2)").unwrap(), val(3));
    }

    #[test]
    fn test_modules_and_host_calls() {
        let mut evaluator = Evaluator::new();
        let last = evaluator
            .load_module("math", "(const PI 3) (defn area (r) (* PI (* r r)))")
            .unwrap();
        assert!(matches!(last, Value::Function(ref func) if func.full_name() == "math.area"));
        assert_eq!(evaluator.eval_str("(math.area 2)").unwrap(), val(12));
        assert_eq!(evaluator.call("math.area", vec![val(3)]).unwrap(), val(27));
        assert_eq!(evaluator.globals().names_under("math"), vec!["math.PI", "math.area"]);

        // a module's names do not leak into the default namespace
        assert_eq!(evaluator.eval_str("(area 2)").unwrap_err().code(), "IDENTIFIER_NOT_FOUND");

        evaluator.eval_str("(defn twice (x) (* x 2))").unwrap();
        assert_eq!(evaluator.call("twice", vec![val(21)]).unwrap(), val(42));
        assert_eq!(
            evaluator.call("user.twice", vec![]).unwrap_err().code(),
            "INCORRECT_NUMBER_OF_PARAMETERS"
        );
        assert_eq!(
            evaluator.call("native.i64.add", vec![val(1), val(2)]).unwrap(),
            val(3)
        );

        let parsed = crate::sexpr::parse_program("(const E 2) (+ E 1)").unwrap();
        assert_eq!(evaluator.load_module_exprs("consts", &parsed).unwrap(), val(3));

        let missing = evaluator.load_module_from_file("nowhere", "/nonexistent/module.ir");
        assert_eq!(missing.unwrap_err().code(), "IO_ERROR");
        assert!(matches!(
            evaluator.load_module("broken", "(const A"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_eval_in_explicit_context() {
        let mut evaluator = Evaluator::new();
        let ns = evaluator.create_namespace("lib", "lib.util");
        let context = Context::Namespace(ns);
        let expr = crate::sexpr::parse_sexpr("(const ANSWER 42)").unwrap();
        assert_eq!(evaluator.eval_in(&expr, &context).unwrap(), val(42));
        assert_eq!(evaluator.eval_str("lib.util.ANSWER").unwrap(), val(42));

        let scope = context.child_scope();
        scope.define_identifier("x", val(5)).unwrap();
        let expr = crate::sexpr::parse_sexpr("(+ x ANSWER)").unwrap();
        assert_eq!(evaluator.eval_in(&expr, &scope).unwrap(), val(47));
    }
}
