//! Helper functions callable from templates.
//!
//! A [`FunctionRegistry`] is an ordinary value owned by the caller; there is
//! no process-wide table. Parsing resolves every call against the registry
//! (then the built-ins) and stores the resolved [`Callee`] in the tree, so a
//! parsed template is unaffected by later changes to the registry.

use crate::error::FunctionError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type HostFn = dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync;

/// Accepted argument counts, checked when the template is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Between(lo, hi) => (lo..=hi).contains(&n),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Arity::Exact(k) => write!(f, "{k}"),
            Arity::AtLeast(k) => write!(f, "at least {k}"),
            Arity::Between(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

/// A host-supplied helper.
#[derive(Clone)]
pub struct Function {
    arity: Arity,
    call: Arc<HostFn>,
}

impl Function {
    pub fn new<F>(arity: Arity, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        Self {
            arity,
            call: Arc::new(f),
        }
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, FunctionError> {
        (self.call)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`, replacing any earlier helper or shadowing
    /// a built-in of the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, arity: Arity, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Function::new(arity, f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Host helpers win over built-ins.
    pub fn resolve(&self, name: &str) -> Option<Callee> {
        self.funcs
            .get(name)
            .cloned()
            .map(Callee::Host)
            .or_else(|| Builtin::from_name(name).map(Callee::Builtin))
    }
}

/// What a parsed call refers to.
#[derive(Debug, Clone)]
pub enum Callee {
    Host(Function),
    Builtin(Builtin),
}

impl Callee {
    pub fn arity(&self) -> Arity {
        match self {
            Callee::Host(f) => f.arity(),
            Callee::Builtin(b) => b.arity(),
        }
    }
}

/// Functions every template can call without registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    And,
    Or,
    Not,
    Len,
    Index,
    Print,
    Println,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::And,
        Builtin::Or,
        Builtin::Not,
        Builtin::Len,
        Builtin::Index,
        Builtin::Print,
        Builtin::Println,
        Builtin::Eq,
        Builtin::Ne,
        Builtin::Lt,
        Builtin::Le,
        Builtin::Gt,
        Builtin::Ge,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Not => "not",
            Builtin::Len => "len",
            Builtin::Index => "index",
            Builtin::Print => "print",
            Builtin::Println => "println",
            Builtin::Eq => "eq",
            Builtin::Ne => "ne",
            Builtin::Lt => "lt",
            Builtin::Le => "le",
            Builtin::Gt => "gt",
            Builtin::Ge => "ge",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Builtin::And | Builtin::Or | Builtin::Index => Arity::AtLeast(1),
            Builtin::Not | Builtin::Len => Arity::Exact(1),
            Builtin::Print | Builtin::Println => Arity::AtLeast(0),
            Builtin::Eq => Arity::AtLeast(2),
            Builtin::Ne | Builtin::Lt | Builtin::Le | Builtin::Gt | Builtin::Ge => Arity::Exact(2),
        }
    }
}

/// `print`: a space goes between operands only when neither is a string.
pub fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !matches!(arg, Value::String(_)) && !matches!(args[i - 1], Value::String(_)) {
            out.push(' ');
        }
        out.push_str(&arg.to_string());
    }
    out
}

/// `println`: operands always space-separated, newline appended.
pub fn sprintln(args: &[Value]) -> String {
    let mut out = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    out.push('\n');
    out
}
