//! Generic worklist dataflow engine
//!
//! An analysis is an [`Environment`]: a lattice element mapping variables to
//! abstract values, with a merge for join points and a statement-level
//! rewrite that both folds the statement against the environment and
//! advances the environment past it. The engine knows nothing about any
//! particular lattice.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::ast::Parameter;
use crate::error::CompileError;
use crate::ir::types::{BasicBlock, Label, Stmt, VarInit};
use crate::Result;

/// What an analysis may assume about the body it runs over
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub inits: &'a [VarInit],
    pub params: &'a [Parameter],
    /// Variables only this body can write. Anything else may change across a call.
    pub locals: Rc<BTreeSet<String>>,
}

impl<'a> Scope<'a> {
    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }
}

pub trait Environment: Clone + PartialEq + fmt::Debug {
    /// Entry environment seeded from declarations and parameters
    fn defined(scope: &Scope<'_>) -> Self;

    /// Environment of a block no path has reached yet
    fn bottom(scope: &Scope<'_>) -> Self;

    /// Join of two environments; associative and commutative
    fn merge(&self, other: &Self) -> Self;

    /// Rewrite `stmt` against the current facts, then update the facts with
    /// the rewritten statement's effect
    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Stmt>;

    /// Output environment of a block
    fn transfer(&self, block: &BasicBlock) -> Result<Self> {
        let mut env = self.clone();
        for stmt in &block.stmts {
            env.rewrite_stmt(stmt)?;
        }
        Ok(env)
    }
}

/// Predecessor and successor edges between blocks of one body
#[derive(Debug, Default)]
pub struct Cfg {
    pub order: Vec<Label>,
    pub preds: HashMap<Label, Vec<Label>>,
    pub succs: HashMap<Label, Vec<Label>>,
}

impl Cfg {
    pub fn build(scope: &str, body: &[BasicBlock]) -> Result<Self> {
        let mut cfg = Cfg::default();
        for block in body {
            if cfg.preds.contains_key(&block.label) {
                return Err(CompileError::DuplicateLabel {
                    label: block.label.to_string(),
                    scope: scope.to_string(),
                });
            }
            cfg.order.push(block.label.clone());
            cfg.preds.insert(block.label.clone(), Vec::new());
            cfg.succs.insert(block.label.clone(), Vec::new());
        }

        for block in body {
            for target in block.successors() {
                let preds = cfg
                    .preds
                    .get_mut(target)
                    .ok_or_else(|| CompileError::DanglingLabel {
                        label: target.to_string(),
                        scope: scope.to_string(),
                    })?;
                if !preds.contains(&block.label) {
                    preds.push(block.label.clone());
                }
                if let Some(succs) = cfg.succs.get_mut(&block.label) {
                    if !succs.contains(target) {
                        succs.push(target.clone());
                    }
                }
            }
        }
        Ok(cfg)
    }

    pub fn entry(&self) -> Option<&Label> {
        self.order.first()
    }

    pub fn preds(&self, label: &Label) -> &[Label] {
        self.preds.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn succs(&self, label: &Label) -> &[Label] {
        self.succs.get(label).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Fixpoint environments of every reached block
#[derive(Debug)]
pub struct Solution<E> {
    pub inputs: HashMap<Label, E>,
    pub outputs: HashMap<Label, E>,
    /// Number of blocks whose transfer function was evaluated
    pub iterations: usize,
}

impl<E: Environment> Solution<E> {
    /// Merge of the current outputs flowing into `label`
    pub fn incoming(&self, cfg: &Cfg, label: &Label, entry: &E) -> Option<E> {
        let mut merged: Option<E> = None;
        if cfg.entry() == Some(label) {
            merged = Some(entry.clone());
        }
        for pred in cfg.preds(label) {
            if let Some(out) = self.outputs.get(pred) {
                merged = Some(match merged {
                    Some(acc) => acc.merge(out),
                    None => out.clone(),
                });
            }
        }
        merged
    }
}

/// Run the worklist algorithm over one body
pub fn solve<E: Environment>(
    name: &str,
    body: &[BasicBlock],
    scope: &Scope<'_>,
) -> Result<(Cfg, Solution<E>)> {
    let cfg = Cfg::build(name, body)?;
    let blocks: HashMap<&Label, &BasicBlock> = body.iter().map(|b| (&b.label, b)).collect();
    let entry = E::defined(scope);

    let mut solution = Solution {
        inputs: HashMap::new(),
        outputs: HashMap::new(),
        iterations: 0,
    };
    let mut worklist: VecDeque<Label> = cfg.entry().cloned().into_iter().collect();

    while let Some(label) = worklist.pop_front() {
        let input = solution
            .incoming(&cfg, &label, &entry)
            .unwrap_or_else(|| E::bottom(scope));
        if solution.inputs.get(&label) == Some(&input) {
            continue;
        }
        let block = blocks
            .get(&label)
            .ok_or_else(|| CompileError::internal(format!("worklist label `{}` has no block", label)))?;
        let output = input.transfer(block)?;
        solution.iterations += 1;
        solution.inputs.insert(label.clone(), input);
        solution.outputs.insert(label.clone(), output);
        worklist.extend(cfg.succs(&label).iter().cloned());
    }

    log::trace!(
        "dataflow over `{}`: {} blocks, {} transfers",
        name,
        body.len(),
        solution.iterations
    );
    Ok((cfg, solution))
}

/// Solve, then rewrite every block against its fixpoint input. Returns
/// whether any statement changed.
pub fn rewrite_body<E: Environment>(
    name: &str,
    body: &mut [BasicBlock],
    scope: &Scope<'_>,
) -> Result<bool> {
    let (_, solution) = solve::<E>(name, body, scope)?;
    let mut changed = false;
    for block in body.iter_mut() {
        let mut env = match solution.inputs.get(&block.label) {
            Some(input) => input.clone(),
            None => E::bottom(scope),
        };
        for stmt in block.stmts.iter_mut() {
            let rewritten = env.rewrite_stmt(stmt)?;
            if rewritten != *stmt {
                *stmt = rewritten;
                changed = true;
            }
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::optimize::const_prop::ConstEnv;
    use crate::ir::types::{Expr, Value};

    fn block(label: &str, stmts: Vec<Stmt>) -> BasicBlock {
        BasicBlock {
            label: Label::new(label),
            stmts,
        }
    }

    fn loop_body() -> Vec<BasicBlock> {
        vec![
            block(
                "entry",
                vec![
                    Stmt::assign("i", Expr::value(Value::num(0))),
                    Stmt::jmp(&Label::new("test")),
                ],
            ),
            block(
                "test",
                vec![
                    Stmt::assign(
                        "c",
                        Expr::Binary {
                            op: crate::ast::BinOp::Lt,
                            left: Value::id("i"),
                            right: Value::num(10),
                        },
                    ),
                    Stmt::IfJmp {
                        cond: Value::id("c"),
                        then: Label::new("body"),
                        els: Label::new("end"),
                    },
                ],
            ),
            block(
                "body",
                vec![
                    Stmt::assign(
                        "i",
                        Expr::Binary {
                            op: crate::ast::BinOp::Plus,
                            left: Value::id("i"),
                            right: Value::num(1),
                        },
                    ),
                    Stmt::jmp(&Label::new("test")),
                ],
            ),
            block("end", vec![]),
        ]
    }

    fn inits() -> Vec<VarInit> {
        vec![
            VarInit::new("i", crate::ast::Type::Int, Value::num(0)),
            VarInit::new("c", crate::ast::Type::Bool, Value::Bool(false)),
        ]
    }

    fn scope(inits: &[VarInit]) -> Scope<'_> {
        Scope {
            inits,
            params: &[],
            locals: Rc::new(inits.iter().map(|i| i.name.clone()).collect()),
        }
    }

    #[test]
    fn test_cfg_edges_deduplicated() {
        let body = vec![
            block(
                "a",
                vec![Stmt::IfJmp {
                    cond: Value::id("c"),
                    then: Label::new("b"),
                    els: Label::new("b"),
                }],
            ),
            block("b", vec![]),
        ];
        let cfg = Cfg::build("t", &body).unwrap();
        assert_eq!(cfg.succs(&Label::new("a")), &[Label::new("b")]);
        assert_eq!(cfg.preds(&Label::new("b")), &[Label::new("a")]);
    }

    #[test]
    fn test_engine_terminates_on_loop() {
        let inits = inits();
        let (_, solution) = solve::<ConstEnv>("t", &loop_body(), &scope(&inits)).unwrap();
        assert!(solution.inputs.contains_key(&Label::new("end")));
        assert!(solution.iterations >= 4);
    }

    #[test]
    fn test_fixpoint_is_stable() {
        let inits = inits();
        let scope = scope(&inits);
        let body = loop_body();
        let (cfg, solution) = solve::<ConstEnv>("t", &body, &scope).unwrap();
        let entry = ConstEnv::defined(&scope);
        for block in &body {
            let input = &solution.inputs[&block.label];
            let again = solution.incoming(&cfg, &block.label, &entry).unwrap();
            assert_eq!(&again, input);
            assert_eq!(&block_output(input, block), &solution.outputs[&block.label]);
        }
    }

    fn block_output(input: &ConstEnv, block: &BasicBlock) -> ConstEnv {
        input.transfer(block).unwrap()
    }

    #[test]
    fn test_unreached_block_left_alone() {
        let inits = inits();
        let mut body = vec![
            block("a", vec![Stmt::Return { value: Value::None }]),
            block("dead", vec![Stmt::assign("i", Expr::value(Value::id("c")))]),
        ];
        let changed = rewrite_body::<ConstEnv>("t", &mut body, &scope(&inits)).unwrap();
        assert!(!changed);
    }
}
