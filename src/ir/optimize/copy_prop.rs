//! Copy propagation
//!
//! After `b = a`, reads of `b` are rewritten to read `a` until either
//! variable is reassigned. Copies always name their ultimate source, and each
//! source keeps the set of variables copying it so that reassigning the
//! source invalidates the whole chain at once.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use super::dataflow::{Environment, Scope};
use crate::ir::types::{Expr, Stmt, Value};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyState {
    Nac,
    Undef,
    CopyOf(String),
}

impl CopyState {
    pub fn merge(&self, other: &CopyState) -> CopyState {
        match (self, other) {
            (CopyState::Nac, _) | (_, CopyState::Nac) => CopyState::Nac,
            (CopyState::Undef, x) | (x, CopyState::Undef) => x.clone(),
            (CopyState::CopyOf(a), CopyState::CopyOf(b)) if a == b => CopyState::CopyOf(a.clone()),
            _ => CopyState::Nac,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyEnv {
    vars: BTreeMap<String, CopyState>,
    /// source → variables currently holding a copy of it
    copies: BTreeMap<String, BTreeSet<String>>,
    locals: Rc<BTreeSet<String>>,
}

impl PartialEq for CopyEnv {
    fn eq(&self, other: &Self) -> bool {
        self.vars == other.vars
    }
}

impl CopyEnv {
    fn new(vars: BTreeMap<String, CopyState>, locals: Rc<BTreeSet<String>>) -> Self {
        let mut env = CopyEnv {
            vars,
            copies: BTreeMap::new(),
            locals,
        };
        env.rebuild_copies();
        env
    }

    pub fn get(&self, name: &str) -> CopyState {
        self.vars.get(name).cloned().unwrap_or(CopyState::Nac)
    }

    /// Variables currently known to copy `source`
    pub fn copies_of(&self, source: &str) -> Vec<&str> {
        self.copies
            .get(source)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn rebuild_copies(&mut self) {
        self.copies.clear();
        for (name, state) in &self.vars {
            if let CopyState::CopyOf(source) = state {
                self.copies
                    .entry(source.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }
    }

    fn source_of(&self, name: &str) -> Option<&str> {
        match self.vars.get(name) {
            Some(CopyState::CopyOf(source)) => Some(source),
            _ => None,
        }
    }

    fn substitute(&self, value: &Value) -> Value {
        match value {
            Value::Id(name) => match self.source_of(name) {
                Some(source) => Value::id(source),
                None => value.clone(),
            },
            other => other.clone(),
        }
    }

    /// `name` was overwritten: it copies nothing and nothing copies it
    fn kill(&mut self, name: &str) {
        if let Some(dependents) = self.copies.remove(name) {
            for dependent in dependents {
                self.vars.insert(dependent, CopyState::Nac);
            }
        }
        if let Some(CopyState::CopyOf(source)) = self.vars.get(name) {
            let source = source.clone();
            if let Some(set) = self.copies.get_mut(&source) {
                set.remove(name);
            }
        }
        self.vars.insert(name.to_string(), CopyState::Nac);
    }

    fn record_copy(&mut self, name: &str, source: &str) {
        let root = self.source_of(source).unwrap_or(source).to_string();
        if root == name {
            return;
        }
        self.kill(name);
        self.copies
            .entry(root.clone())
            .or_default()
            .insert(name.to_string());
        self.vars.insert(name.to_string(), CopyState::CopyOf(root));
    }

    fn forget_nonlocals(&mut self) {
        let mut volatile: BTreeSet<String> = self
            .vars
            .keys()
            .filter(|name| !self.locals.contains(*name))
            .cloned()
            .collect();
        volatile.extend(
            self.copies
                .keys()
                .filter(|name| !self.locals.contains(*name))
                .cloned(),
        );
        for name in volatile {
            self.kill(&name);
        }
    }
}

impl Environment for CopyEnv {
    fn defined(scope: &Scope<'_>) -> Self {
        let vars = scope
            .inits
            .iter()
            .map(|i| &i.name)
            .chain(scope.params.iter().map(|p| &p.name))
            .map(|name| (name.clone(), CopyState::Nac))
            .collect();
        CopyEnv::new(vars, Rc::clone(&scope.locals))
    }

    fn bottom(scope: &Scope<'_>) -> Self {
        let vars = scope
            .inits
            .iter()
            .map(|i| &i.name)
            .chain(scope.params.iter().map(|p| &p.name))
            .map(|name| (name.clone(), CopyState::Undef))
            .collect();
        CopyEnv::new(vars, Rc::clone(&scope.locals))
    }

    fn merge(&self, other: &Self) -> Self {
        let names: BTreeSet<&String> = self.vars.keys().chain(other.vars.keys()).collect();
        let vars = names
            .into_iter()
            .map(|name| {
                let merged = match (self.vars.get(name), other.vars.get(name)) {
                    (Some(a), Some(b)) => a.merge(b),
                    _ => CopyState::Nac,
                };
                (name.clone(), merged)
            })
            .collect();
        CopyEnv::new(vars, Rc::clone(&self.locals))
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Stmt> {
        let rewritten = stmt.map_values(|v| self.substitute(v));
        match &rewritten {
            Stmt::Assign {
                name,
                value: Expr::Value {
                    value: Value::Id(source),
                },
            } => {
                if source != name {
                    self.record_copy(name, source);
                }
            }
            Stmt::Assign { name, value } => {
                self.kill(name);
                if matches!(value, Expr::Call { .. } | Expr::CallIndirect { .. }) {
                    self.forget_nonlocals();
                }
            }
            Stmt::Expr {
                expr: Expr::Call { .. } | Expr::CallIndirect { .. },
            } => self.forget_nonlocals(),
            _ => {}
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Type};
    use crate::ir::types::VarInit;

    fn env(names: &[&str]) -> CopyEnv {
        let inits: Vec<VarInit> = names
            .iter()
            .map(|n| VarInit::new(*n, Type::Int, Value::num(0)))
            .collect();
        let scope = Scope {
            inits: &inits,
            params: &[],
            locals: Rc::new(names.iter().map(|n| n.to_string()).collect()),
        };
        CopyEnv::defined(&scope)
    }

    fn copy(to: &str, from: &str) -> Stmt {
        Stmt::assign(to, Expr::value(Value::id(from)))
    }

    #[test]
    fn test_rewrites_to_ultimate_source() {
        let mut env = env(&["a", "b", "c", "d"]);
        env.rewrite_stmt(&copy("b", "a")).unwrap();
        let out = env.rewrite_stmt(&copy("c", "b")).unwrap();
        assert_eq!(out, copy("c", "a"));
        assert_eq!(env.get("c"), CopyState::CopyOf("a".to_string()));
        assert_eq!(env.copies_of("a"), vec!["b", "c"]);

        let use_c = Stmt::Return {
            value: Value::id("c"),
        };
        assert_eq!(
            env.rewrite_stmt(&use_c).unwrap(),
            Stmt::Return {
                value: Value::id("a")
            }
        );
    }

    #[test]
    fn test_reassigning_source_invalidates_chain() {
        let mut env = env(&["a", "b", "c"]);
        env.rewrite_stmt(&copy("b", "a")).unwrap();
        env.rewrite_stmt(&copy("c", "b")).unwrap();
        env.rewrite_stmt(&Stmt::assign(
            "a",
            Expr::Binary {
                op: BinOp::Plus,
                left: Value::id("a"),
                right: Value::num(1),
            },
        ))
        .unwrap();
        assert_eq!(env.get("b"), CopyState::Nac);
        assert_eq!(env.get("c"), CopyState::Nac);
        let read = Stmt::Return {
            value: Value::id("c"),
        };
        assert_eq!(env.rewrite_stmt(&read).unwrap(), read);
    }

    #[test]
    fn test_reassigning_copy_drops_reverse_entry() {
        let mut env = env(&["a", "b"]);
        env.rewrite_stmt(&copy("b", "a")).unwrap();
        env.rewrite_stmt(&Stmt::assign("b", Expr::value(Value::num(3))))
            .unwrap();
        assert!(env.copies_of("a").is_empty());
    }

    #[test]
    fn test_self_copy_is_noop() {
        let mut env = env(&["a"]);
        env.rewrite_stmt(&copy("a", "a")).unwrap();
        assert_eq!(env.get("a"), CopyState::Nac);
    }

    #[test]
    fn test_merge_undef_yields_other_side() {
        let mut left = env(&["a", "b"]);
        left.rewrite_stmt(&copy("b", "a")).unwrap();
        let inits = vec![
            VarInit::new("a", Type::Int, Value::num(0)),
            VarInit::new("b", Type::Int, Value::num(0)),
        ];
        let scope = Scope {
            inits: &inits,
            params: &[],
            locals: Rc::new(BTreeSet::new()),
        };
        let right = CopyEnv::bottom(&scope);
        let merged = left.merge(&right);
        assert_eq!(merged.get("b"), CopyState::CopyOf("a".to_string()));
        assert_eq!(merged.copies_of("a"), vec!["b"]);
        assert_eq!(right.merge(&left), merged);
    }

    #[test]
    fn test_conflicting_copies_merge_to_nac() {
        let mut left = env(&["a", "b", "c"]);
        left.rewrite_stmt(&copy("c", "a")).unwrap();
        let mut right = env(&["a", "b", "c"]);
        right.rewrite_stmt(&copy("c", "b")).unwrap();
        assert_eq!(left.merge(&right).get("c"), CopyState::Nac);
    }
}
