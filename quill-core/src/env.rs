//! Lexically scoped environments.
//!
//! Each scope maps names to values and points at its parent. Scopes are
//! reference counted because closures keep the scope they were declared in
//! alive after the block that created it has finished. A function stored in
//! the scope it captured is kept with a weak handle (see [`Closure`]) and is
//! made strong again on lookup, so declaring a function does not pin its
//! scope.
//!
//! [`Closure`]: crate::value::Closure

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

pub type Env = Rc<Scope>;

#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

impl Scope {
    /// A root scope with no parent.
    pub fn global() -> Env {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    /// Declare `name` in this scope, shadowing outer bindings.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        let value = self.detach(value);
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(attach(value.clone()));
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Update the nearest existing binding. Returns false if `name` is not
    /// declared anywhere in the chain.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = self.detach(value);
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.vars.borrow().clone()
    }

    pub fn restore(&self, vars: HashMap<String, Value>) {
        *self.vars.borrow_mut() = vars;
    }

    /// Drop every binding in this scope.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }

    fn detach(&self, value: Value) -> Value {
        match value {
            Value::Function(closure) if !closure.is_weak() && closure.captures(self) => {
                Value::Function(Rc::new(closure.downgrade()))
            }
            other => other,
        }
    }
}

/// Clear `scope` and all of its ancestors, breaking any reference cycle
/// that runs through a closure bound somewhere along the chain.
pub fn clear_chain(scope: &Env) {
    let mut next = Some(Rc::clone(scope));
    while let Some(scope) = next {
        scope.clear();
        next = scope.parent().cloned();
    }
}

fn attach(value: Value) -> Value {
    if let Value::Function(closure) = &value {
        if closure.is_weak() {
            if let Some(strong) = closure.upgrade() {
                return Value::Function(Rc::new(strong));
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FnDecl, StmtKind};
    use crate::parser::parse_text;
    use crate::span::FileId;
    use crate::value::Closure;

    #[test]
    fn child_scopes_shadow_and_assign_through() {
        let global = Scope::global();
        global.define("x", Value::from(1.0));
        let inner = Scope::child(&global);
        inner.define("y", Value::from(2.0));

        assert!(inner.assign("x", Value::from(5.0)));
        assert_eq!(global.get("x"), Some(Value::from(5.0)));
        assert_eq!(global.get("y"), None);
        assert!(!inner.assign("missing", Value::Nil));

        inner.define("x", Value::from(9.0));
        assert_eq!(inner.get("x"), Some(Value::from(9.0)));
        assert_eq!(global.get("x"), Some(Value::from(5.0)));
    }

    #[test]
    fn snapshot_and_restore() {
        let global = Scope::global();
        global.define("a", Value::from(1.0));
        let saved = global.snapshot();
        global.define("b", Value::from(2.0));
        assert_eq!(global.get("b"), Some(Value::from(2.0)));
        global.restore(saved);
        assert_eq!(global.get("a"), Some(Value::from(1.0)));
        assert_eq!(global.get("b"), None);
    }

    fn declared(name: &str) -> Rc<FnDecl> {
        let program = parse_text(FileId(0), &format!("fn {name}() {{ }}")).program;
        match &program.statements[0].kind {
            StmtKind::Fn(decl) => Rc::clone(decl),
            other => panic!("expected fn, got {other:?}"),
        }
    }

    #[test]
    fn functions_do_not_pin_their_own_scope() {
        let global = Scope::global();
        let block = Scope::child(&global);
        let closure = Closure::new(declared("g"), Rc::clone(&block));
        block.define("g", Value::Function(Rc::new(closure)));

        let Some(Value::Function(found)) = block.get("g") else {
            panic!("g should be bound");
        };
        assert!(!found.is_weak());
        assert!(found.captures(&block));
        drop(found);

        let weak = Rc::downgrade(&block);
        drop(block);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn clearing_a_chain_breaks_cycles() {
        let global = Scope::global();
        let inner = Scope::child(&global);
        let closure = Closure::new(declared("g"), Rc::clone(&inner));
        global.define("k", Value::Function(Rc::new(closure)));

        let weak = Rc::downgrade(&global);
        clear_chain(&inner);
        drop(inner);
        drop(global);
        assert!(weak.upgrade().is_none());
    }
}
