//! Static registries for the evaluator: the special-form table and the native catalogue.
//!
//! ## Special Forms
//!
//! Special forms receive their arguments unevaluated together with the current
//! context. Each keyword has a fixed arity that is checked before the handler runs:
//!
//! ```text
//! (const name value)          (let name value)        (namespace path body...)
//! (do body...)                (if cond then else)     (loop params inits body)
//! (recur v...)                (break v)               (defn name params body)
//! (defnr name params body)    (fn params primitive-captures reference-captures body)
//! ```
//!
//! ## Native Catalogue
//!
//! Host functions are registered in the global table under fully-qualified names
//! when an evaluator is created:
//!
//! - `native.i64.*`, `native.i32.*`: wrapping integer arithmetic, bitwise operations
//!   and comparisons (comparisons return `1`/`0`)
//! - `native.f64.*`: math functions, arithmetic and comparisons
//! - `native.f32.*`: declared, raise `NOT_IMPLEMENTED`
//! - `builtin.logic.*`: `and`, `or`, `not` over `1`/`0`
//! - `builtin.io.*`: `print_i64`, `putchar`, `panic`
//! - `builtin.memory.*`: chunk allocation, reference counting and typed access
//!
//! Arguments are evaluated before the arity of a native is checked. Unsigned
//! variants and floating point memory access are declared but raise
//! `NOT_IMPLEMENTED` instead of silently misbehaving.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ast::Value;
use crate::context::Context;
use crate::evaluator::{
    Evaluator, eval_break, eval_const, eval_defn, eval_defnr, eval_do, eval_fn, eval_if,
    eval_let, eval_loop, eval_namespace, eval_recur,
};
use crate::memory::{self, Address};
use crate::{Error, EvalError, SyntaxError};

/// Host function over already evaluated arguments
pub type NativeFn = fn(&mut Evaluator, &[Value]) -> Result<Value, Error>;

/// Special form over unevaluated arguments and the current context
pub type SpecialFormFn = fn(&mut Evaluator, &[Value], &Context) -> Result<Value, Error>;

/// Argument count accepted by a special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// A wrong argument count is reported like a wrong call: `INCORRECT_NUMBER_OF_PARAMETERS`
    pub(crate) fn validate(self, form: &'static str, count: usize) -> Result<(), Error> {
        let expect = match self {
            Arity::Exact(n) if count != n => n,
            Arity::AtLeast(n) if count < n => n,
            _ => return Ok(()),
        };
        Err(SyntaxError::IncorrectNumberOfParameters {
            name: form.to_owned(),
            actual: count,
            expect,
        }
        .into())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpecialForm {
    pub keyword: &'static str,
    pub arity: Arity,
    pub eval: SpecialFormFn,
}

/// The implementation of a native function
#[derive(Clone, Copy)]
pub enum NativeImpl {
    Function(NativeFn),
    /// Declared so the name resolves, but calling it raises `NOT_IMPLEMENTED`
    NotImplemented,
}

impl std::fmt::Debug for NativeImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeImpl::Function(_) => write!(f, "Function(<fn>)"),
            NativeImpl::NotImplemented => write!(f, "NotImplemented"),
        }
    }
}

/// A host function registered under a fully-qualified name
#[derive(Debug)]
pub struct NativeOp {
    pub id: &'static str,
    /// Declared parameter count
    pub arity: usize,
    pub op_impl: NativeImpl,
}

impl NativeOp {
    /// Check arity, then apply to already evaluated arguments
    pub fn call(&self, evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
        if args.len() != self.arity {
            return Err(SyntaxError::IncorrectNumberOfParameters {
                name: self.id.to_owned(),
                actual: args.len(),
                expect: self.arity,
            }
            .into());
        }
        match self.op_impl {
            NativeImpl::Function(func) => func(evaluator, args),
            NativeImpl::NotImplemented => Err(EvalError::NotImplemented {
                name: self.id.to_owned(),
            }
            .into()),
        }
    }
}

//
// Argument extraction
//

fn arg(args: &[Value], index: usize) -> Result<&Value, Error> {
    args.get(index).ok_or_else(|| {
        EvalError::TypeMismatch {
            expected: "argument",
            found: format!("{} arguments", args.len()),
        }
        .into()
    })
}

fn number_arg(args: &[Value], index: usize) -> Result<f64, Error> {
    f64::try_from(arg(args, index)?)
}

fn i64_arg(args: &[Value], index: usize) -> Result<i64, Error> {
    Ok(number_arg(args, index)? as i64)
}

fn i32_arg(args: &[Value], index: usize) -> Result<i32, Error> {
    Ok(i64_arg(args, index)? as i32)
}

/// Addresses, sizes and offsets: non-negative integral numbers
fn address_arg(args: &[Value], index: usize) -> Result<Address, Error> {
    let value = arg(args, index)?;
    value
        .as_address()
        .ok_or_else(|| Error::type_mismatch("non-negative integer", value))
}

//
// Integer operations
//

macro_rules! int_binary {
    ($name:ident, $arg:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
            let ($a, $b) = ($arg(args, 0)?, $arg(args, 1)?);
            Ok(Value::from($body))
        }
    };
}

macro_rules! int_division {
    ($name:ident, $arg:ident, $id:literal, $op:ident) => {
        fn $name(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
            let (a, b) = ($arg(args, 0)?, $arg(args, 1)?);
            if b == 0 {
                return Err(EvalError::DivisionByZero { name: $id }.into());
            }
            Ok(Value::from(a.$op(b)))
        }
    };
}

int_binary!(i64_add, i64_arg, |a, b| a.wrapping_add(b));
int_binary!(i64_sub, i64_arg, |a, b| a.wrapping_sub(b));
int_binary!(i64_mul, i64_arg, |a, b| a.wrapping_mul(b));
int_division!(i64_div_s, i64_arg, "native.i64.div_s", wrapping_div);
int_division!(i64_rem_s, i64_arg, "native.i64.rem_s", wrapping_rem);
int_binary!(i64_and, i64_arg, |a, b| a & b);
int_binary!(i64_or, i64_arg, |a, b| a | b);
int_binary!(i64_xor, i64_arg, |a, b| a ^ b);
int_binary!(i64_shl, i64_arg, |a, b| a.wrapping_shl(b as u32));
int_binary!(i64_shr_s, i64_arg, |a, b| a.wrapping_shr(b as u32));
int_binary!(i64_shr_u, i64_arg, |a, b| (a as u64).wrapping_shr(b as u32) as i64);
int_binary!(i64_eq, i64_arg, |a, b| a == b);
int_binary!(i64_ne, i64_arg, |a, b| a != b);
int_binary!(i64_lt_s, i64_arg, |a, b| a < b);
int_binary!(i64_gt_s, i64_arg, |a, b| a > b);
int_binary!(i64_le_s, i64_arg, |a, b| a <= b);
int_binary!(i64_ge_s, i64_arg, |a, b| a >= b);

int_binary!(i32_add, i32_arg, |a, b| a.wrapping_add(b));
int_binary!(i32_sub, i32_arg, |a, b| a.wrapping_sub(b));
int_binary!(i32_mul, i32_arg, |a, b| a.wrapping_mul(b));
int_division!(i32_div_s, i32_arg, "native.i32.div_s", wrapping_div);
int_division!(i32_rem_s, i32_arg, "native.i32.rem_s", wrapping_rem);
int_binary!(i32_and, i32_arg, |a, b| a & b);
int_binary!(i32_or, i32_arg, |a, b| a | b);
int_binary!(i32_xor, i32_arg, |a, b| a ^ b);
int_binary!(i32_shl, i32_arg, |a, b| a.wrapping_shl(b as u32));
int_binary!(i32_shr_s, i32_arg, |a, b| a.wrapping_shr(b as u32));
int_binary!(i32_shr_u, i32_arg, |a, b| (a as u32).wrapping_shr(b as u32) as i32);
int_binary!(i32_eq, i32_arg, |a, b| a == b);
int_binary!(i32_ne, i32_arg, |a, b| a != b);
int_binary!(i32_lt_s, i32_arg, |a, b| a < b);
int_binary!(i32_gt_s, i32_arg, |a, b| a > b);
int_binary!(i32_le_s, i32_arg, |a, b| a <= b);
int_binary!(i32_ge_s, i32_arg, |a, b| a >= b);

//
// Floating point operations
//

macro_rules! f64_unary {
    ($name:ident, |$x:ident| $body:expr) => {
        fn $name(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
            let $x = number_arg(args, 0)?;
            Ok(Value::from($body))
        }
    };
}

macro_rules! f64_binary {
    ($name:ident, |$a:ident, $b:ident| $body:expr) => {
        fn $name(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
            let ($a, $b) = (number_arg(args, 0)?, number_arg(args, 1)?);
            Ok(Value::from($body))
        }
    };
}

f64_unary!(f64_abs, |x| x.abs());
f64_unary!(f64_neg, |x| -x);
f64_unary!(f64_ceil, |x| x.ceil());
f64_unary!(f64_floor, |x| x.floor());
f64_unary!(f64_trunc, |x| x.trunc());
f64_unary!(f64_nearest, |x| x.round_ties_even());
f64_unary!(f64_sqrt, |x| x.sqrt());
f64_binary!(f64_add, |a, b| a + b);
f64_binary!(f64_sub, |a, b| a - b);
f64_binary!(f64_mul, |a, b| a * b);
f64_binary!(f64_div, |a, b| a / b);
f64_binary!(f64_min, |a, b| a.min(b));
f64_binary!(f64_max, |a, b| a.max(b));
f64_binary!(f64_eq, |a, b| a == b);
f64_binary!(f64_ne, |a, b| a != b);
f64_binary!(f64_lt, |a, b| a < b);
f64_binary!(f64_gt, |a, b| a > b);
f64_binary!(f64_le, |a, b| a <= b);
f64_binary!(f64_ge, |a, b| a >= b);

//
// builtin.logic
//

fn logic_and(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(arg(args, 0)?.is_truthy() && arg(args, 1)?.is_truthy()))
}

fn logic_or(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(arg(args, 0)?.is_truthy() || arg(args, 1)?.is_truthy()))
}

fn logic_not(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    Ok(Value::from(!arg(args, 0)?.is_truthy()))
}

//
// builtin.io
//

fn io_print_i64(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let n = i64_arg(args, 0)?;
    evaluator.write_output(&format!("{n}\n"))?;
    Ok(Value::from(n))
}

fn io_putchar(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let code = i64_arg(args, 0)?;
    let ch = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| EvalError::TypeMismatch {
            expected: "unicode scalar value",
            found: code.to_string(),
        })?;
    evaluator.write_output(ch.encode_utf8(&mut [0; 4]))?;
    Ok(Value::from(code))
}

fn io_panic(_: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    Err(EvalError::RuntimeException {
        code: number_arg(args, 0)?,
    }
    .into())
}

//
// builtin.memory
//

fn memory_create_bytes(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let length = address_arg(args, 0)?;
    Ok(Value::from(evaluator.heap_mut().create_bytes(length)?))
}

fn memory_create_struct(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (byte_size, mark) = (address_arg(args, 0)?, address_arg(args, 1)? as u64);
    Ok(Value::from(evaluator.heap_mut().create_struct(byte_size, mark)?))
}

/// The destructor is passed as a function value and stored by qualified name
fn memory_create_struct_destructor(
    evaluator: &mut Evaluator,
    args: &[Value],
) -> Result<Value, Error> {
    let (byte_size, mark) = (address_arg(args, 0)?, address_arg(args, 1)? as u64);
    let destructor = match arg(args, 2)? {
        Value::Function(func) => func.full_name(),
        Value::Native(op) => op.id.to_owned(),
        other => return Err(Error::type_mismatch("function", other)),
    };
    let address = evaluator
        .heap_mut()
        .create_struct_with_destructor(byte_size, mark, destructor)?;
    Ok(Value::from(address))
}

fn memory_inc_ref(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let address = address_arg(args, 0)?;
    Ok(Value::from(evaluator.heap_mut().inc_ref(address)?))
}

fn memory_add_ref(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset, target) = (
        address_arg(args, 0)?,
        address_arg(args, 1)?,
        address_arg(args, 2)?,
    );
    Ok(Value::from(evaluator.heap_mut().add_ref(address, offset, target)?))
}

fn memory_dec_ref(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let address = address_arg(args, 0)?;
    Ok(Value::from(memory::dec_ref(evaluator, address)?))
}

fn memory_read_i32(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset) = (address_arg(args, 0)?, address_arg(args, 1)?);
    Ok(Value::from(evaluator.heap().read_i32(address, offset)?))
}

fn memory_read_i64(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset) = (address_arg(args, 0)?, address_arg(args, 1)?);
    Ok(Value::from(evaluator.heap().read_i64(address, offset)?))
}

fn memory_write_i32(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset, value) = (address_arg(args, 0)?, address_arg(args, 1)?, i32_arg(args, 2)?);
    evaluator.heap_mut().write_i32(address, offset, value)?;
    Ok(Value::from(value))
}

fn memory_write_i64(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset, value) = (address_arg(args, 0)?, address_arg(args, 1)?, i64_arg(args, 2)?);
    evaluator.heap_mut().write_i64(address, offset, value)?;
    Ok(Value::from(value))
}

fn memory_read_address(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, offset) = (address_arg(args, 0)?, address_arg(args, 1)?);
    Ok(Value::from(evaluator.heap().read_address(address, offset)?))
}

fn memory_read_mark(evaluator: &mut Evaluator, args: &[Value]) -> Result<Value, Error> {
    let (address, member_index) = (address_arg(args, 0)?, address_arg(args, 1)?);
    Ok(Value::from(evaluator.heap().read_mark(address, member_index)?))
}

/// Unqualified operator names resolved through the `prelude` namespace
pub(crate) const OPERATOR_ALIASES: &[(&str, &str)] = &[
    ("+", "native.i64.add"),
    ("-", "native.i64.sub"),
    ("*", "native.i64.mul"),
    ("/", "native.i64.div_s"),
    ("%", "native.i64.rem_s"),
    ("=", "native.i64.eq"),
    ("!=", "native.i64.ne"),
    ("<", "native.i64.lt_s"),
    (">", "native.i64.gt_s"),
    ("<=", "native.i64.le_s"),
    (">=", "native.i64.ge_s"),
];

/// Registry of special forms, keyed by keyword
static SPECIAL_FORMS: LazyLock<Vec<SpecialForm>> = LazyLock::new(|| {
    let form = |keyword: &'static str, arity: Arity, eval: SpecialFormFn| SpecialForm {
        keyword,
        arity,
        eval,
    };
    vec![
        form("const", Arity::Exact(2), eval_const),
        form("let", Arity::Exact(2), eval_let),
        form("namespace", Arity::AtLeast(1), eval_namespace),
        form("do", Arity::Any, eval_do),
        form("if", Arity::Exact(3), eval_if),
        form("loop", Arity::Exact(3), eval_loop),
        form("recur", Arity::Any, eval_recur),
        form("break", Arity::Exact(1), eval_break),
        form("defn", Arity::Exact(3), eval_defn),
        form("defnr", Arity::Exact(3), eval_defnr),
        form("fn", Arity::Exact(4), eval_fn),
    ]
});

static SPECIAL_FORM_INDEX: LazyLock<HashMap<&'static str, &'static SpecialForm>> =
    LazyLock::new(|| {
        let forms: &'static [SpecialForm] = SPECIAL_FORMS.as_slice();
        forms.iter().map(|form| (form.keyword, form)).collect()
    });

/// Global catalogue of native functions
static NATIVE_OPS: LazyLock<Vec<NativeOp>> = LazyLock::new(|| {
    let op = |id: &'static str, arity: usize, func: NativeFn| NativeOp {
        id,
        arity,
        op_impl: NativeImpl::Function(func),
    };
    let unimplemented = |id: &'static str, arity: usize| NativeOp {
        id,
        arity,
        op_impl: NativeImpl::NotImplemented,
    };

    let mut ops = vec![
        op("native.i64.add", 2, i64_add),
        op("native.i64.sub", 2, i64_sub),
        op("native.i64.mul", 2, i64_mul),
        op("native.i64.div_s", 2, i64_div_s),
        op("native.i64.rem_s", 2, i64_rem_s),
        op("native.i64.and", 2, i64_and),
        op("native.i64.or", 2, i64_or),
        op("native.i64.xor", 2, i64_xor),
        op("native.i64.shl", 2, i64_shl),
        op("native.i64.shr_s", 2, i64_shr_s),
        op("native.i64.shr_u", 2, i64_shr_u),
        op("native.i64.eq", 2, i64_eq),
        op("native.i64.ne", 2, i64_ne),
        op("native.i64.lt_s", 2, i64_lt_s),
        op("native.i64.gt_s", 2, i64_gt_s),
        op("native.i64.le_s", 2, i64_le_s),
        op("native.i64.ge_s", 2, i64_ge_s),
        op("native.i32.add", 2, i32_add),
        op("native.i32.sub", 2, i32_sub),
        op("native.i32.mul", 2, i32_mul),
        op("native.i32.div_s", 2, i32_div_s),
        op("native.i32.rem_s", 2, i32_rem_s),
        op("native.i32.and", 2, i32_and),
        op("native.i32.or", 2, i32_or),
        op("native.i32.xor", 2, i32_xor),
        op("native.i32.shl", 2, i32_shl),
        op("native.i32.shr_s", 2, i32_shr_s),
        op("native.i32.shr_u", 2, i32_shr_u),
        op("native.i32.eq", 2, i32_eq),
        op("native.i32.ne", 2, i32_ne),
        op("native.i32.lt_s", 2, i32_lt_s),
        op("native.i32.gt_s", 2, i32_gt_s),
        op("native.i32.le_s", 2, i32_le_s),
        op("native.i32.ge_s", 2, i32_ge_s),
        op("native.f64.abs", 1, f64_abs),
        op("native.f64.neg", 1, f64_neg),
        op("native.f64.ceil", 1, f64_ceil),
        op("native.f64.floor", 1, f64_floor),
        op("native.f64.trunc", 1, f64_trunc),
        op("native.f64.nearest", 1, f64_nearest),
        op("native.f64.sqrt", 1, f64_sqrt),
        op("native.f64.add", 2, f64_add),
        op("native.f64.sub", 2, f64_sub),
        op("native.f64.mul", 2, f64_mul),
        op("native.f64.div", 2, f64_div),
        op("native.f64.min", 2, f64_min),
        op("native.f64.max", 2, f64_max),
        op("native.f64.eq", 2, f64_eq),
        op("native.f64.ne", 2, f64_ne),
        op("native.f64.lt", 2, f64_lt),
        op("native.f64.gt", 2, f64_gt),
        op("native.f64.le", 2, f64_le),
        op("native.f64.ge", 2, f64_ge),
        op("builtin.logic.and", 2, logic_and),
        op("builtin.logic.or", 2, logic_or),
        op("builtin.logic.not", 1, logic_not),
        op("builtin.io.print_i64", 1, io_print_i64),
        op("builtin.io.putchar", 1, io_putchar),
        op("builtin.io.panic", 1, io_panic),
        unimplemented("builtin.io.print_i32", 1),
        unimplemented("builtin.io.print_f32", 1),
        unimplemented("builtin.io.print_f64", 1),
        unimplemented("builtin.io.getchar", 0),
        unimplemented("builtin.io.gets", 0),
        op("builtin.memory.create_bytes", 1, memory_create_bytes),
        op("builtin.memory.create_struct", 2, memory_create_struct),
        op(
            "builtin.memory.create_struct_destructor",
            3,
            memory_create_struct_destructor,
        ),
        op("builtin.memory.inc_ref", 1, memory_inc_ref),
        op("builtin.memory.add_ref", 3, memory_add_ref),
        op("builtin.memory.dec_ref", 1, memory_dec_ref),
        op("builtin.memory.read_i32", 2, memory_read_i32),
        op("builtin.memory.read_i64", 2, memory_read_i64),
        op("builtin.memory.write_i32", 3, memory_write_i32),
        op("builtin.memory.write_i64", 3, memory_write_i64),
        op("builtin.memory.read_address", 2, memory_read_address),
        op("builtin.memory.read_mark", 2, memory_read_mark),
        unimplemented("builtin.memory.read_f32", 2),
        unimplemented("builtin.memory.read_f64", 2),
        unimplemented("builtin.memory.write_f32", 3),
        unimplemented("builtin.memory.write_f64", 3),
        unimplemented("builtin.memory.malloc", 1),
        unimplemented("builtin.memory.free", 1),
        unimplemented("builtin.memory.memcpy", 3),
    ];

    for name in ["div_u", "rem_u", "lt_u", "gt_u", "le_u", "ge_u"] {
        ops.push(unimplemented(leak_id("native.i64", name), 2));
        ops.push(unimplemented(leak_id("native.i32", name), 2));
    }
    for (name, arity) in [
        ("abs", 1),
        ("neg", 1),
        ("ceil", 1),
        ("floor", 1),
        ("trunc", 1),
        ("nearest", 1),
        ("sqrt", 1),
        ("add", 2),
        ("sub", 2),
        ("mul", 2),
        ("div", 2),
        ("min", 2),
        ("max", 2),
        ("eq", 2),
        ("ne", 2),
        ("lt", 2),
        ("gt", 2),
        ("le", 2),
        ("ge", 2),
    ] {
        ops.push(unimplemented(leak_id("native.f32", name), arity));
    }
    ops
});

/// Interned id for generated catalogue entries; runs once inside the registry's LazyLock
fn leak_id(namespace: &str, name: &str) -> &'static str {
    Box::leak(format!("{namespace}.{name}").into_boxed_str())
}

static NATIVE_INDEX: LazyLock<HashMap<&'static str, &'static NativeOp>> = LazyLock::new(|| {
    let ops: &'static [NativeOp] = NATIVE_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// All native functions (registered into every evaluator's global table)
pub(crate) fn get_native_ops() -> &'static [NativeOp] {
    NATIVE_OPS.as_slice()
}

/// Find a native function by its fully-qualified id
pub fn find_native(id: &str) -> Option<&'static NativeOp> {
    NATIVE_INDEX.get(id).copied()
}

/// Find the special form introduced by `keyword`
pub(crate) fn find_special_form(keyword: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORM_INDEX.get(keyword).copied()
}
