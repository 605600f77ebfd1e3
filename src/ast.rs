//! This module defines the value tree shared by IR code and IR data, together with the
//! runtime values that evaluation can produce. The IR proper only ever contains numbers,
//! identifiers and lists; evaluating identifiers can additionally yield native
//! functions, user-defined functions, and the tagged `recur`/`break` results consumed
//! by the iteration trampoline. Ergonomic helpers such as [`val`], [`sym`] and [`nil`]
//! are provided for building trees in code and tests.

use std::rc::Rc;

use crate::Error;
use crate::builtinops::NativeOp;
use crate::context::Namespace;
use crate::memory::Address;

/// Type alias for number values in the interpreter
/// Every IR numeric type (i32/i64/f32/f64) is carried as a double
pub(crate) type NumberType = f64;

/// Core value type of the interpreter
///
/// To build a tree, use the helper functions:
/// - `val(42)` for numbers, `sym("name")` for identifiers, `nil()` for empty lists
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Number(NumberType),
    /// Identifiers, possibly dotted (`native.i64.add`)
    Symbol(String),
    List(Vec<Value>),
    /// Host function from the native catalogue
    Native(&'static NativeOp),
    /// Function registered by `defn` or `defnr`
    Function(Rc<UserFunction>),
    /// Result of `recur` or `break`, only meaningful to an enclosing iteration
    Tail(Tail),
}

/// The continue/stop protocol used by `loop`, `defnr` and self-recurring closures
#[derive(Debug, Clone, PartialEq)]
pub enum Tail {
    Continue(Vec<Value>),
    Stop(Box<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// `defn`: the body's value is the call's value
    Ordinary,
    /// `defnr`: the body is iterated until it breaks
    Recursion,
}

/// A function defined with `defn` or `defnr`
///
/// The body is evaluated in a fresh scope whose parent is the defining namespace,
/// so free identifiers resolve statically rather than against the call site.
#[derive(Debug)]
pub struct UserFunction {
    pub name: String,
    pub kind: FunctionKind,
    pub params: Vec<String>,
    pub body: Value,
    pub namespace: Namespace,
}

impl UserFunction {
    /// Fully-qualified name under which the function is registered
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace.full_path(), self.name)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::List(list) => {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::Native(op) => write!(f, "Native({})", op.id),
            Value::Function(func) => write!(
                f,
                "Function({}, params={:?}, kind={:?})",
                func.full_name(),
                func.params,
                func.kind
            ),
            Value::Tail(tail) => write!(f, "Tail({tail:?})"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Symbol(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Symbol(s)
    }
}

/// Booleans become the IR's `1`/`0`
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }
}

macro_rules! impl_from_number {
    ($num_type:ty) => {
        impl From<$num_type> for Value {
            fn from(n: $num_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_number!(i8);
impl_from_number!(i16);
impl_from_number!(i32);
impl_from_number!(i64);
impl_from_number!(u8);
impl_from_number!(u16);
impl_from_number!(u32);
impl_from_number!(usize);
impl_from_number!(f32);
impl_from_number!(NumberType);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

impl TryFrom<&Value> for NumberType {
    type Error = Error;

    fn try_from(value: &Value) -> Result<NumberType, Error> {
        match value {
            Value::Number(n) => Ok(*n),
            other => Err(Error::type_mismatch("number", other)),
        }
    }
}

///   Helper function for creating symbols - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating empty lists
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::List(vec![])
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_list(f: &mut std::fmt::Formatter<'_>, items: &[Value]) -> std::fmt::Result {
            for item in items {
                write!(f, " {item}")?;
            }
            Ok(())
        }

        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::Native(op) => write!(f, "#<native:{}>", op.id),
            Value::Function(func) => write!(f, "#<function:{}>", func.full_name()),
            Value::Tail(Tail::Continue(values)) => {
                write!(f, "(recur")?;
                write_list(f, values)?;
                write!(f, ")")
            }
            Value::Tail(Tail::Stop(value)) => write!(f, "(break {value})"),
        }
    }
}

impl Value {
    /// Interpret this value as a heap address (a non-negative integral number)
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => {
                Some(*n as Address)
            }
            _ => None,
        }
    }

    /// The integer `1` is the only truthy value
    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Number(n) if *n == 1.0)
    }

    pub(crate) fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Natives are unique per catalogue id
            (Value::Native(a), Value::Native(b)) => a.id == b.id,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Tail(a), Value::Tail(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Value::Number(42.0)),
            (val(-17), Value::Number(-17.0)),
            (val(2.5), Value::Number(2.5)),
            (val(4294967295u32), Value::Number(4294967295.0)),
            (val(255u8), Value::Number(255.0)),
            (val(7usize), Value::Number(7.0)),
            (val(true), Value::Number(1.0)),
            (val(false), Value::Number(0.0)),
            (val("user.foo"), Value::Symbol("user.foo".to_owned())),
            (sym("native.i64.add"), Value::Symbol("native.i64.add".to_owned())),
            (sym(String::from("x")), Value::Symbol("x".to_owned())),
            (nil(), Value::List(vec![])),
            (
                val([1, 2, 3]),
                Value::List(vec![
                    Value::Number(1.0),
                    Value::Number(2.0),
                    Value::Number(3.0),
                ]),
            ),
            (
                val(vec![sym("let"), sym("i"), val(1)]),
                Value::List(vec![
                    Value::Symbol("let".to_owned()),
                    Value::Symbol("i".to_owned()),
                    Value::Number(1.0),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_display() {
        let cases = vec![
            (val(3), "3"),
            (val(-0.5), "-0.5"),
            (sym("user.fib"), "user.fib"),
            (nil(), "()"),
            (
                val(vec![sym("if"), val(1), val(2), val(3)]),
                "(if 1 2 3)",
            ),
            (Value::Tail(Tail::Continue(vec![val(1), val(2)])), "(recur 1 2)"),
            (Value::Tail(Tail::Continue(vec![])), "(recur)"),
            (Value::Tail(Tail::Stop(Box::new(val(9)))), "(break 9)"),
        ];
        for (value, expected) in cases {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_addresses_and_truthiness() {
        assert_eq!(val(3).as_address(), Some(3));
        assert_eq!(val(0).as_address(), Some(0));
        assert_eq!(val(-1).as_address(), None);
        assert_eq!(val(1.5).as_address(), None);
        assert_eq!(sym("a").as_address(), None);

        assert!(val(1).is_truthy());
        assert!(!val(0).is_truthy());
        assert!(!val(2).is_truthy());
        assert!(!nil().is_truthy());
    }
}
