//! Runtime values of the tree-walking interpreter.

use std::fmt;
use std::ptr;
use std::rc::{Rc, Weak};

use crate::ast::{FnDecl, format_number};
use crate::env::{Env, Scope};

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Nil,
    Function(Rc<Closure>),
}

/// A user function together with the scope it was declared in.
pub struct Closure {
    pub decl: Rc<FnDecl>,
    env: Captured,
}

/// A closure stored inside the scope it captures only holds that scope
/// weakly, otherwise the scope would keep itself alive.
enum Captured {
    Strong(Env),
    Weak(Weak<Scope>),
}

impl Closure {
    pub fn new(decl: Rc<FnDecl>, env: Env) -> Self {
        Closure {
            decl,
            env: Captured::Strong(env),
        }
    }

    pub fn name(&self) -> &str {
        &self.decl.name.name
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    /// The captured scope, or `None` once a weakly held scope is gone.
    pub fn env(&self) -> Option<Env> {
        match &self.env {
            Captured::Strong(env) => Some(Rc::clone(env)),
            Captured::Weak(env) => env.upgrade(),
        }
    }

    pub fn is_weak(&self) -> bool {
        matches!(self.env, Captured::Weak(_))
    }

    /// True if `scope` is exactly the scope this closure captured.
    pub fn captures(&self, scope: &Scope) -> bool {
        ptr::eq(self.env_ptr(), scope)
    }

    /// The same function holding its scope weakly.
    pub fn downgrade(&self) -> Closure {
        let env = match &self.env {
            Captured::Strong(env) => Rc::downgrade(env),
            Captured::Weak(env) => Weak::clone(env),
        };
        Closure {
            decl: Rc::clone(&self.decl),
            env: Captured::Weak(env),
        }
    }

    /// The same function holding its scope strongly, if it is still alive.
    pub fn upgrade(&self) -> Option<Closure> {
        self.env().map(|env| Closure::new(Rc::clone(&self.decl), env))
    }

    fn env_ptr(&self) -> *const Scope {
        match &self.env {
            Captured::Strong(env) => Rc::as_ptr(env),
            Captured::Weak(env) => env.as_ptr(),
        }
    }
}

// The captured scope may contain this very closure, so only the
// signature is shown.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .finish()
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl PartialEq for Value {
    /// Structural equality. Functions are equal when they share a
    /// declaration and a captured scope.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Function(a), Value::Function(b)) => {
                Rc::ptr_eq(&a.decl, &b.decl) && ptr::eq(a.env_ptr(), b.env_ptr())
            }
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(value) => f.write_str(&format_number(*value)),
            Value::Str(value) => f.write_str(value),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Nil => f.write_str("nil"),
            Value::Function(closure) => write!(f, "<fn {}>", closure.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_values() {
        assert_eq!(Value::from(7.0).to_string(), "7");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::Nil.to_string(), "nil");
    }

    #[test]
    fn equality_is_typed() {
        assert_eq!(Value::from(1.0), Value::from(1.0));
        assert_ne!(Value::from(1.0), Value::from("1"));
        assert_ne!(Value::Nil, Value::from(false));
    }
}
