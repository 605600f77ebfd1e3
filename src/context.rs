//! Identifier resolution: the global table and the three kinds of lexical context.
//!
//! A [`Namespace`] proxies to the [`GlobalTable`] under its full path, a [`Scope`] holds
//! local bindings and falls through to its parent, and a [`Closure`] holds the values
//! captured when an `fn` form was evaluated and falls through to the namespace it was
//! created in.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Value;
use crate::memory::Address;
use crate::{Error, IdentifierError};

/// Namespace consulted when an unqualified name misses in its own namespace
pub const PRELUDE_PATH: &str = "prelude";

/// Flat, append-only map from fully-qualified name to definition
#[derive(Debug, Default)]
pub struct GlobalTable {
    entries: HashMap<String, Value>,
}

impl GlobalTable {
    pub fn new() -> Self {
        GlobalTable {
            entries: HashMap::new(),
        }
    }

    /// Register `value` under `full_name`; names are never redefined
    pub fn define(&mut self, full_name: String, value: Value) -> Result<Value, Error> {
        if self.entries.contains_key(&full_name) {
            return Err(IdentifierError::AlreadyExist { name: full_name }.into());
        }
        self.entries.insert(full_name, value.clone());
        Ok(value)
    }

    /// Seed a startup definition (natives, prelude aliases)
    pub(crate) fn register(&mut self, full_name: impl Into<String>, value: Value) {
        self.entries.insert(full_name.into(), value);
    }

    pub fn exists(&self, full_name: &str) -> bool {
        self.entries.contains_key(full_name)
    }

    pub fn get(&self, full_name: &str) -> Result<Value, Error> {
        self.entries.get(full_name).cloned().ok_or_else(|| {
            IdentifierError::NotFound {
                name: full_name.to_owned(),
            }
            .into()
        })
    }

    /// Resolve `name` within `path`, falling back to the prelude
    fn lookup(&self, path: &str, name: &str) -> Result<Value, Error> {
        let full_name = format!("{path}.{name}");
        if let Some(value) = self.entries.get(&full_name) {
            return Ok(value.clone());
        }
        self.entries
            .get(&format!("{PRELUDE_PATH}.{name}"))
            .cloned()
            .ok_or_else(|| IdentifierError::NotFound { name: full_name }.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All names defined under `path`, sorted
    pub fn names_under(&self, path: &str) -> Vec<&str> {
        let prefix = format!("{path}.");
        let mut names: Vec<&str> = self
            .entries
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

/// Whether an identifier is written in fully-qualified form (`ns.name`)
pub(crate) fn is_qualified(name: &str) -> bool {
    name.find('.').is_some_and(|pos| pos > 0)
}

/// A named, global binding scope addressed by a dotted full path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    module_name: String,
    full_path: String,
}

impl Namespace {
    pub fn new(module_name: impl Into<String>, full_path: impl Into<String>) -> Self {
        Namespace {
            module_name: module_name.into(),
            full_path: full_path.into(),
        }
    }

    /// The namespace at the root of a module
    pub fn module(module_name: &str) -> Self {
        Namespace::new(module_name, module_name)
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Child namespace for `(namespace path ...)`; `None` means the module root
    pub fn child(&self, path: Option<&str>) -> Namespace {
        match path {
            Some(path) => {
                Namespace::new(&self.module_name, format!("{}.{path}", self.module_name))
            }
            None => Namespace::module(&self.module_name),
        }
    }

    pub fn qualify(&self, name: &str) -> String {
        format!("{}.{name}", self.full_path)
    }
}

/// A local binding frame chained to a parent context
#[derive(Debug)]
pub struct Scope {
    parent: Context,
    locals: RefCell<HashMap<String, Value>>,
}

impl Scope {
    pub fn new(parent: Context) -> Self {
        Scope {
            parent,
            locals: RefCell::new(HashMap::new()),
        }
    }

    pub fn parent(&self) -> &Context {
        &self.parent
    }
}

/// Template of an anonymous function, materialized into a closure by `fn`
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousFunction {
    pub params: Vec<String>,
    pub body: Value,
}

/// Capture lists for a closure, kept apart so reference captures always come first
#[derive(Debug, Clone, Default)]
pub struct Captures {
    references: Vec<(String, Address)>,
    primitives: Vec<(String, Value)>,
}

impl Captures {
    pub fn new() -> Self {
        Captures::default()
    }

    /// Capture a heap address whose reference count the closure will hold
    pub fn reference(mut self, name: impl Into<String>, address: Address) -> Self {
        self.references.push((name.into(), address));
        self
    }

    /// Capture a value by copy
    pub fn primitive(mut self, name: impl Into<String>, value: Value) -> Self {
        self.primitives.push((name.into(), value));
        self
    }

    pub fn references(&self) -> impl Iterator<Item = Address> + '_ {
        self.references.iter().map(|(_, address)| *address)
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

/// A materialized anonymous function: captured bindings plus the code template
///
/// Captured names and values are ordered reference captures first, then primitive
/// captures; the closure chunk's mark bitmask depends on that order.
#[derive(Debug)]
pub struct Closure {
    parent: Namespace,
    names: Vec<String>,
    values: Vec<Value>,
    reference_count: usize,
    template: AnonymousFunction,
}

impl Closure {
    pub fn new(template: AnonymousFunction, parent: Namespace, captures: Captures) -> Self {
        let reference_count = captures.references.len();
        let (mut names, mut values): (Vec<String>, Vec<Value>) = captures
            .references
            .into_iter()
            .map(|(name, address)| (name, Value::from(address)))
            .unzip();
        for (name, value) in captures.primitives {
            names.push(name);
            values.push(value);
        }
        Closure {
            parent,
            names,
            values,
            reference_count,
            template,
        }
    }

    pub fn template(&self) -> &AnonymousFunction {
        &self.template
    }

    pub fn namespace(&self) -> &Namespace {
        &self.parent
    }

    pub fn captured(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Number of leading captures that are heap references
    pub fn reference_count(&self) -> usize {
        self.reference_count
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.values.get(idx))
    }
}

/// Where an identifier can be looked up or defined
#[derive(Debug, Clone)]
pub enum Context {
    Namespace(Namespace),
    Scope(Rc<Scope>),
    Closure(Rc<Closure>),
}

impl Context {
    /// A fresh scope whose parent is this context
    pub fn child_scope(&self) -> Context {
        Context::Scope(Rc::new(Scope::new(self.clone())))
    }

    /// A fresh scope with `params` bound to `args`, in order
    pub(crate) fn bind(&self, params: &[String], args: Vec<Value>) -> Result<Context, Error> {
        let scope = self.child_scope();
        for (param, arg) in params.iter().zip(args) {
            scope.define_identifier(param, arg)?;
        }
        Ok(scope)
    }

    /// Bind a local name; only scopes accept definitions
    pub fn define_identifier(&self, name: &str, value: Value) -> Result<Value, Error> {
        match self {
            Context::Scope(scope) => {
                let mut locals = scope.locals.borrow_mut();
                if locals.contains_key(name) {
                    return Err(IdentifierError::AlreadyExist {
                        name: name.to_owned(),
                    }
                    .into());
                }
                locals.insert(name.to_owned(), value.clone());
                Ok(value)
            }
            Context::Namespace(_) | Context::Closure(_) => Err(Error::invalid_form(
                "let",
                "local identifiers can only be defined in scopes",
            )),
        }
    }

    pub fn exists(&self, name: &str, globals: &GlobalTable) -> bool {
        match self {
            Context::Namespace(ns) => {
                globals.exists(&ns.qualify(name))
                    || globals.exists(&format!("{PRELUDE_PATH}.{name}"))
            }
            Context::Scope(scope) => {
                scope.locals.borrow().contains_key(name) || scope.parent.exists(name, globals)
            }
            Context::Closure(closure) => {
                closure.get(name).is_some()
                    || Context::Namespace(closure.parent.clone()).exists(name, globals)
            }
        }
    }

    /// Walk the context chain for an unqualified name
    pub fn get_identifier(&self, name: &str, globals: &GlobalTable) -> Result<Value, Error> {
        let mut current = self.clone();
        loop {
            current = match current {
                Context::Namespace(ns) => return globals.lookup(ns.full_path(), name),
                Context::Scope(scope) => {
                    if let Some(value) = scope.locals.borrow().get(name) {
                        return Ok(value.clone());
                    }
                    scope.parent.clone()
                }
                Context::Closure(closure) => {
                    if let Some(value) = closure.get(name) {
                        return Ok(value.clone());
                    }
                    return globals.lookup(closure.parent.full_path(), name);
                }
            };
        }
    }

    /// The namespace this context ultimately grounds out at
    pub fn namespace(&self) -> Namespace {
        let mut current = self.clone();
        loop {
            current = match current {
                Context::Namespace(ns) => return ns,
                Context::Closure(closure) => return closure.parent.clone(),
                Context::Scope(scope) => scope.parent.clone(),
            };
        }
    }
}

/// Resolve an identifier: qualified names go straight to the global table,
/// everything else walks the context chain
pub fn resolve(name: &str, context: &Context, globals: &GlobalTable) -> Result<Value, Error> {
    if is_qualified(name) {
        globals.get(name)
    } else {
        context.get_identifier(name, globals)
    }
}
