//! IR Optimization Passes
//!
//! Optimizations performed on the IR representation:
//! - Constant propagation and folding
//! - Copy propagation
//!
//! Both are instances of the generic [`dataflow`] engine. The driver runs
//! every enabled pass over the top-level body and each method, and repeats
//! the whole cycle until a cycle changes nothing. Each pass only ever
//! replaces an operand with a literal or with an earlier copy source, so the
//! number of possible rewrites is finite and the cycle terminates.

pub mod const_prop;
pub mod copy_prop;
pub mod dataflow;
pub mod fold;

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::config::{CompileOptions, OptLevel};
use crate::registry::GlobalEnv;
use crate::Result;

use super::types::Program;
use const_prop::ConstEnv;
use copy_prop::CopyEnv;
use dataflow::{rewrite_body, Environment, Scope};

/// Optimize `program` in place; returns the number of rounds that changed
/// something
pub fn optimize_program(
    program: &mut Program,
    env: &GlobalEnv,
    options: &CompileOptions,
) -> Result<usize> {
    if options.opt_level == OptLevel::None {
        return Ok(0);
    }

    for round in 0..options.max_rounds {
        let mut changed = run_pass::<ConstEnv>(program, env)?;
        if options.opt_level == OptLevel::Aggressive {
            changed |= run_pass::<CopyEnv>(program, env)?;
        }
        log::debug!("optimization round {}: changed = {}", round + 1, changed);
        if !changed {
            return Ok(round);
        }
    }

    log::warn!(
        "optimization stopped after {} rounds without reaching a fixpoint",
        options.max_rounds
    );
    Ok(options.max_rounds)
}

/// Run one analysis over every body of the program
pub fn run_pass<E: Environment>(program: &mut Program, env: &GlobalEnv) -> Result<bool> {
    let mut changed = false;

    // Top-level variables are globals that any call may overwrite; only
    // lowering temporaries are private to the top-level body
    let locals: BTreeSet<String> = program
        .inits
        .iter()
        .filter(|init| !env.is_global(&init.name))
        .map(|init| init.name.clone())
        .collect();
    let scope = Scope {
        inits: &program.inits,
        params: &[],
        locals: Rc::new(locals),
    };
    changed |= rewrite_body::<E>("<top level>", &mut program.body, &scope)?;

    for class in &mut program.classes {
        for method in &mut class.methods {
            let locals: BTreeSet<String> = method
                .inits
                .iter()
                .map(|i| i.name.clone())
                .chain(method.params.iter().map(|p| p.name.clone()))
                .collect();
            let scope = Scope {
                inits: &method.inits,
                params: &method.params,
                locals: Rc::new(locals),
            };
            changed |= rewrite_body::<E>(&method.name, &mut method.body, &scope)?;
        }
    }
    Ok(changed)
}
