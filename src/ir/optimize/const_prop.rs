//! Constant propagation and folding

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use super::dataflow::{Environment, Scope};
use super::fold::{eval_binary, eval_unary, is_foldable_binary, is_foldable_unary};
use crate::ir::types::{Expr, Stmt, Value};
use crate::Result;

/// Constant-propagation lattice: `Nac` is top, `Undef` is bottom
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstVal {
    Nac,
    Lit(Value),
    Undef,
}

impl ConstVal {
    pub fn merge(&self, other: &ConstVal) -> ConstVal {
        match (self, other) {
            (ConstVal::Nac, _) | (_, ConstVal::Nac) => ConstVal::Nac,
            (ConstVal::Undef, x) | (x, ConstVal::Undef) => x.clone(),
            (ConstVal::Lit(a), ConstVal::Lit(b)) if a == b => ConstVal::Lit(a.clone()),
            _ => ConstVal::Nac,
        }
    }
}

/// Variables absent from the map are not constant
#[derive(Debug, Clone)]
pub struct ConstEnv {
    vals: BTreeMap<String, ConstVal>,
    locals: Rc<BTreeSet<String>>,
}

impl PartialEq for ConstEnv {
    fn eq(&self, other: &Self) -> bool {
        self.vals == other.vals
    }
}

impl ConstEnv {
    pub fn get(&self, name: &str) -> ConstVal {
        self.vals.get(name).cloned().unwrap_or(ConstVal::Nac)
    }

    fn substitute(&self, value: &Value) -> Value {
        match value {
            Value::Id(name) => match self.vals.get(name) {
                Some(ConstVal::Lit(lit)) => lit.clone(),
                _ => value.clone(),
            },
            other => other.clone(),
        }
    }

    fn fold(expr: Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::Binary { op, left, right } if is_foldable_binary(op, &left, &right) => {
                Expr::value(eval_binary(op, &left, &right)?)
            }
            Expr::Unary { op, operand } if is_foldable_unary(op, &operand) => {
                Expr::value(eval_unary(op, &operand)?)
            }
            other => other,
        })
    }

    /// Anything outside this body may have been rewritten by a call
    fn forget_nonlocals(&mut self) {
        let locals = Rc::clone(&self.locals);
        for (name, val) in self.vals.iter_mut() {
            if !locals.contains(name) {
                *val = ConstVal::Nac;
            }
        }
    }
}

fn has_call(stmt: &Stmt) -> bool {
    let expr = match stmt {
        Stmt::Assign { value, .. } => value,
        Stmt::Expr { expr } => expr,
        _ => return false,
    };
    matches!(expr, Expr::Call { .. } | Expr::CallIndirect { .. })
}

impl Environment for ConstEnv {
    fn defined(scope: &Scope<'_>) -> Self {
        let mut vals = BTreeMap::new();
        for init in scope.inits {
            vals.insert(init.name.clone(), ConstVal::Lit(init.value.clone()));
        }
        // Parameters differ per call
        for param in scope.params {
            vals.insert(param.name.clone(), ConstVal::Nac);
        }
        ConstEnv {
            vals,
            locals: Rc::clone(&scope.locals),
        }
    }

    fn bottom(scope: &Scope<'_>) -> Self {
        let vals = scope
            .inits
            .iter()
            .map(|i| &i.name)
            .chain(scope.params.iter().map(|p| &p.name))
            .map(|name| (name.clone(), ConstVal::Undef))
            .collect();
        ConstEnv {
            vals,
            locals: Rc::clone(&scope.locals),
        }
    }

    fn merge(&self, other: &Self) -> Self {
        let names: BTreeSet<&String> = self.vals.keys().chain(other.vals.keys()).collect();
        let vals = names
            .into_iter()
            .map(|name| {
                let merged = match (self.vals.get(name), other.vals.get(name)) {
                    (Some(a), Some(b)) => a.merge(b),
                    _ => ConstVal::Nac,
                };
                (name.clone(), merged)
            })
            .collect();
        ConstEnv {
            vals,
            locals: Rc::clone(&self.locals),
        }
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Stmt> {
        let rewritten = match stmt.map_values(|v| self.substitute(v)) {
            Stmt::Assign { name, value } => Stmt::Assign {
                name,
                value: Self::fold(value)?,
            },
            Stmt::Expr { expr } => Stmt::Expr {
                expr: Self::fold(expr)?,
            },
            other => other,
        };

        if let Stmt::Assign { name, value } = &rewritten {
            let val = match value {
                Expr::Value { value } if !value.is_id() => ConstVal::Lit(value.clone()),
                _ => ConstVal::Nac,
            };
            self.vals.insert(name.clone(), val);
        }
        if has_call(&rewritten) {
            self.forget_nonlocals();
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Parameter, Type};
    use crate::ir::types::VarInit;

    fn env_with(inits: &[VarInit], params: &[Parameter]) -> ConstEnv {
        let scope = Scope {
            inits,
            params,
            locals: Rc::new(inits.iter().map(|i| i.name.clone()).collect()),
        };
        ConstEnv::defined(&scope)
    }

    fn add(left: Value, right: Value) -> Expr {
        Expr::Binary {
            op: BinOp::Plus,
            left,
            right,
        }
    }

    #[test]
    fn test_merge_lattice() {
        let five = ConstVal::Lit(Value::num(5));
        let six = ConstVal::Lit(Value::num(6));
        assert_eq!(ConstVal::Undef.merge(&five), five);
        assert_eq!(five.merge(&ConstVal::Undef), five);
        assert_eq!(five.merge(&five), five);
        assert_eq!(five.merge(&six), ConstVal::Nac);
        assert_eq!(ConstVal::Nac.merge(&ConstVal::Undef), ConstVal::Nac);
    }

    #[test]
    fn test_propagates_and_folds() {
        let inits = vec![
            VarInit::new("a", Type::Int, Value::num(0)),
            VarInit::new("b", Type::Int, Value::num(0)),
        ];
        let mut env = env_with(&inits, &[]);
        env.rewrite_stmt(&Stmt::assign("a", Expr::value(Value::num(20))))
            .unwrap();
        let out = env
            .rewrite_stmt(&Stmt::assign("b", add(Value::id("a"), Value::num(22))))
            .unwrap();
        assert_eq!(out, Stmt::assign("b", Expr::value(Value::num(42))));
        assert_eq!(env.get("b"), ConstVal::Lit(Value::num(42)));
    }

    #[test]
    fn test_parameters_are_not_constant() {
        let params = vec![Parameter::new("x", Type::Int)];
        let inits = vec![VarInit::new("y", Type::Int, Value::num(0))];
        let mut env = env_with(&inits, &params);
        let stmt = Stmt::assign("y", add(Value::id("x"), Value::num(1)));
        assert_eq!(env.rewrite_stmt(&stmt).unwrap(), stmt);
        assert_eq!(env.get("y"), ConstVal::Nac);
    }

    #[test]
    fn test_zero_divisor_left_in_place() {
        let inits = vec![VarInit::new("q", Type::Int, Value::num(0))];
        let mut env = env_with(&inits, &[]);
        let stmt = Stmt::assign(
            "q",
            Expr::Binary {
                op: BinOp::IDiv,
                left: Value::num(1),
                right: Value::id("q"),
            },
        );
        let out = env.rewrite_stmt(&stmt).unwrap();
        assert_eq!(out.to_string(), "q = 1 // 0");
        assert_eq!(env.get("q"), ConstVal::Nac);
    }

    #[test]
    fn test_calls_invalidate_nonlocals() {
        let inits = vec![
            VarInit::new("g", Type::Int, Value::num(1)),
            VarInit::new("t", Type::Int, Value::num(2)),
        ];
        let scope = Scope {
            inits: &inits,
            params: &[],
            locals: Rc::new(std::iter::once("t".to_string()).collect()),
        };
        let mut env = ConstEnv::defined(&scope);
        env.rewrite_stmt(&Stmt::Expr {
            expr: Expr::Call {
                name: "f".to_string(),
                args: vec![],
            },
        })
        .unwrap();
        assert_eq!(env.get("g"), ConstVal::Nac);
        assert_eq!(env.get("t"), ConstVal::Lit(Value::num(2)));
    }
}
