//! IR Lowering
//!
//! Converts the typed tree into block-structured IR. Every function becomes a
//! closure class with a no-op constructor and an `apply` method, every class
//! contributes its methods to the shared vtable, and every expression is
//! flattened to atomic operands in strict left-to-right order.

use crate::ast::{self, ExprKind, Location, StmtKind, Type};
use crate::error::CompileError;
use crate::registry::{mangle, GlobalEnv, APPLY, INIT};
use crate::Result;

use super::names::NameGen;
use super::types::*;
use super::verify::verify_labels;

/// Marker appended to synthesized closure class names
pub const CLOSURE_SUFFIX: &str = "_$closure$";

/// Receiver parameter of methods and closure bodies
const SELF: &str = "self";

/// Name of the class wrapping `function`, nested inside `enclosing`
/// (outermost first)
pub fn closure_name(function: &str, enclosing: &[String]) -> String {
    let mut parts: Vec<&str> = enclosing.iter().map(String::as_str).collect();
    parts.push(function);
    format!("{}{}", parts.join("_$"), CLOSURE_SUFFIX)
}

/// Lower a typed program, extending `env` with its globals, classes, and
/// vtable entries
pub fn lower_program(program: &ast::Program, env: &mut GlobalEnv) -> Result<Program> {
    let mut lowerer = IrLowerer::new(env);
    let ir = lowerer.lower(program)?;
    verify_labels(&ir)?;
    Ok(ir)
}

/// Jump targets of the innermost enclosing loop
#[derive(Debug, Clone)]
struct LoopTargets {
    test: Label,
    end: Label,
}

/// Blocks of one body under construction; statements always go to the
/// current (last) block
#[derive(Debug)]
struct BodyBuilder {
    blocks: Vec<BasicBlock>,
    current: BasicBlock,
    inits: Vec<VarInit>,
    loops: Vec<LoopTargets>,
}

impl BodyBuilder {
    fn new(entry: Label) -> Self {
        Self {
            blocks: Vec::new(),
            current: BasicBlock::new(entry),
            inits: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn push(&mut self, stmt: Stmt) {
        self.current.stmts.push(stmt);
    }

    fn start_block(&mut self, label: Label) {
        let done = std::mem::replace(&mut self.current, BasicBlock::new(label));
        self.blocks.push(done);
    }

    fn declare(&mut self, name: &str, ty: &Type) {
        self.inits.push(VarInit::new(name, ty.clone(), Value::None));
    }

    fn finish(mut self) -> (Vec<BasicBlock>, Vec<VarInit>) {
        self.blocks.push(self.current);
        (self.blocks, self.inits)
    }
}

/// A function rewritten as a class, plus what its enclosing body must
/// declare and run to bind the function's name
struct Closure {
    classes: Vec<ast::Class>,
    binding: ast::VarInit,
    construct: ast::Stmt,
}

/// IR lowering state
struct IrLowerer<'a> {
    env: &'a mut GlobalEnv,
    names: NameGen,
    /// Classes synthesized while lowering bodies (lambdas, method-local functions)
    generated: Vec<Class>,
}

impl<'a> IrLowerer<'a> {
    fn new(env: &'a mut GlobalEnv) -> Self {
        IrLowerer {
            env,
            names: NameGen::new(),
            generated: Vec::new(),
        }
    }

    fn lower(&mut self, program: &ast::Program) -> Result<Program> {
        let mut body = BodyBuilder::new(self.names.label("$startProg"));

        let mut closures = Vec::new();
        for f in &program.funs {
            self.record_closure_names(f, &[]);
            closures.push(synthesize_closure(f, &[]));
        }

        let mut classes: Vec<&ast::Class> = closures.iter().flat_map(|c| &c.classes).collect();
        classes.extend(&program.classes);
        for class in &classes {
            self.register_class(class);
        }

        let mut lowered = Vec::with_capacity(classes.len());
        for class in &classes {
            lowered.push(self.lower_class(class)?);
        }

        let constructs: Vec<ast::Stmt> = closures.iter().map(|c| c.construct.clone()).collect();
        self.lower_stmts(&mut body, &constructs)?;
        self.lower_stmts(&mut body, &program.stmts)?;

        let (blocks, temps) = body.finish();
        let mut inits = temps;
        for closure in &closures {
            inits.push(lower_var_init(&closure.binding));
        }
        inits.extend(program.inits.iter().map(lower_var_init));

        for init in &program.inits {
            self.env.mark_global(&init.name);
        }
        for f in &program.funs {
            self.env.mark_global(&f.name);
        }

        lowered.append(&mut self.generated);
        Ok(Program {
            inits,
            classes: lowered,
            body: blocks,
        })
    }

    /// Record layout (first declaration wins) and vtable range for a class
    fn register_class(&mut self, class: &ast::Class) {
        if !self.env.has_class(&class.name) {
            self.env.define_class(&class.name, &class.fields);
        }
        let start = self.env.register_methods(
            &class.name,
            class
                .methods
                .iter()
                .map(|m| (m.name.as_str(), m.params.len())),
        );
        log::debug!("class `{}` registered at vtable slot {}", class.name, start);
    }

    /// Register and lower a class synthesized mid-body
    fn add_generated(&mut self, class: &ast::Class) -> Result<()> {
        self.add_generated_all(std::slice::from_ref(class))
    }

    /// Register every class before lowering any: a closure's `apply`
    /// constructs the closures nested inside it
    fn add_generated_all(&mut self, classes: &[ast::Class]) -> Result<()> {
        for class in classes {
            self.register_class(class);
        }
        for class in classes {
            let lowered = self.lower_class(class)?;
            self.generated.push(lowered);
        }
        Ok(())
    }

    /// Map `f` and every function nested in it to its closure class. Nested
    /// functions are keyed by their dotted path (`outer.inner`, `C.m.g`).
    fn record_closure_names(&mut self, f: &ast::FunDef, enclosing: &[String]) {
        let mut path = enclosing.to_vec();
        path.push(f.name.clone());
        self.env
            .set_closure_name(&path.join("."), &closure_name(&f.name, enclosing));
        for child in &f.children {
            self.record_closure_names(child, &path);
        }
    }

    fn lower_class(&mut self, class: &ast::Class) -> Result<Class> {
        let mut methods = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            methods.push(self.lower_method(&class.name, method)?);
        }
        Ok(Class {
            name: class.name.clone(),
            fields: class.fields.iter().map(lower_var_init).collect(),
            methods,
        })
    }

    fn lower_method(&mut self, class: &str, f: &ast::FunDef) -> Result<FunDef> {
        let mut body = BodyBuilder::new(self.names.label("$startFun"));

        // Functions nested in a method bind their names on entry
        let chain = vec![class.to_string(), f.name.clone()];
        let mut bindings = Vec::new();
        for child in &f.children {
            self.record_closure_names(child, &chain);
            let closure = synthesize_closure(child, &chain);
            self.add_generated_all(&closure.classes)?;
            self.lower_stmt(&mut body, &closure.construct)?;
            bindings.push(lower_var_init(&closure.binding));
        }

        self.lower_stmts(&mut body, &f.body)?;
        let (blocks, mut inits) = body.finish();
        inits.extend(bindings);
        inits.extend(f.inits.iter().map(lower_var_init));

        Ok(FunDef {
            name: mangle(class, &f.name),
            params: f.params.clone(),
            ret: f.ret.clone(),
            inits,
            body: blocks,
        })
    }

    fn lower_stmts(&mut self, b: &mut BodyBuilder, stmts: &[ast::Stmt]) -> Result<()> {
        for stmt in stmts {
            self.lower_stmt(b, stmt)?;
        }
        Ok(())
    }

    /// End the current block with `stmt`; anything after it is unreachable
    fn close_block(&mut self, b: &mut BodyBuilder, stmt: Stmt) {
        b.push(stmt);
        b.start_block(self.names.label("$unreachable"));
    }

    fn lower_stmt(&mut self, b: &mut BodyBuilder, stmt: &ast::Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Assign { name, value } => {
                let value = self.lower_expr(b, value)?;
                b.push(Stmt::assign(name.as_str(), value));
            }

            StmtKind::Return { value } => {
                let value = self.lower_value(b, value)?;
                self.close_block(b, Stmt::Return { value });
            }

            StmtKind::Expr { expr } => {
                let expr = self.lower_expr(b, expr)?;
                b.push(Stmt::Expr { expr });
            }

            StmtKind::Pass => {}

            StmtKind::Continue => {
                if let Some(targets) = b.loops.last() {
                    let jump = Stmt::jmp(&targets.test);
                    self.close_block(b, jump);
                }
            }

            StmtKind::Break => {
                if let Some(targets) = b.loops.last() {
                    let jump = Stmt::jmp(&targets.end);
                    self.close_block(b, jump);
                }
            }

            StmtKind::FieldAssign { obj, field, value } => {
                let class = object_class(obj, "field assignment")?;
                let offset = self.env.field(class, field)?.offset;
                let start = self.lower_value(b, obj)?;
                let value = self.lower_value(b, value)?;
                guard(b, CHECK_NONE, &start, stmt.loc);
                b.push(Stmt::Store {
                    start,
                    offset,
                    value,
                });
            }

            StmtKind::If { cond, then, els } => {
                let then_label = self.names.label("$then");
                let else_label = self.names.label("$else");
                let end_label = self.names.label("$end");

                let cond = self.lower_value(b, cond)?;
                b.push(Stmt::IfJmp {
                    cond,
                    then: then_label.clone(),
                    els: else_label.clone(),
                });

                b.start_block(then_label);
                self.lower_stmts(b, then)?;
                b.push(Stmt::jmp(&end_label));

                b.start_block(else_label);
                self.lower_stmts(b, els)?;
                b.push(Stmt::jmp(&end_label));

                b.start_block(end_label);
            }

            StmtKind::While { cond, body } => {
                let test = self.names.label("$whilestart");
                let body_label = self.names.label("$whilebody");
                let end = self.names.label("$whileend");

                b.push(Stmt::jmp(&test));
                b.start_block(test.clone());
                let cond = self.lower_value(b, cond)?;
                b.push(Stmt::IfJmp {
                    cond,
                    then: body_label.clone(),
                    els: end.clone(),
                });

                b.start_block(body_label);
                b.loops.push(LoopTargets {
                    test: test.clone(),
                    end: end.clone(),
                });
                self.lower_stmts(b, body)?;
                b.loops.pop();
                b.push(Stmt::jmp(&test));

                b.start_block(end);
            }

            StmtKind::For {
                iterator,
                iterable,
                body,
            } => {
                let test = self.names.label("$forstart");
                let body_label = self.names.label("$forbody");
                let end = self.names.label("$forend");

                // Evaluated once; reset makes nested loops over one iterable reentrant
                let iter = self.lower_value(b, iterable)?;
                let reset = self.call_method(b, &iter, &iterable.ty, "reset", iterable.loc)?;
                b.push(Stmt::Expr { expr: reset });
                b.push(Stmt::jmp(&test));

                b.start_block(test.clone());
                let has_next = self.call_method(b, &iter, &iterable.ty, "hasNext", iterable.loc)?;
                let cond = self.materialize(b, has_next, &Type::Bool);
                b.push(Stmt::IfJmp {
                    cond,
                    then: body_label.clone(),
                    els: end.clone(),
                });

                b.start_block(body_label);
                let next = self.call_method(b, &iter, &iterable.ty, "next", iterable.loc)?;
                b.push(Stmt::assign(iterator.as_str(), next));
                b.loops.push(LoopTargets {
                    test: test.clone(),
                    end: end.clone(),
                });
                self.lower_stmts(b, body)?;
                b.loops.pop();
                b.push(Stmt::jmp(&test));

                b.start_block(end);
            }
        }
        Ok(())
    }

    /// Flatten an expression to an atomic value, introducing one temporary
    /// when the expression is complex
    fn lower_value(&mut self, b: &mut BodyBuilder, e: &ast::Expr) -> Result<Value> {
        let expr = self.lower_expr(b, e)?;
        Ok(self.materialize(b, expr, &e.ty))
    }

    fn materialize(&mut self, b: &mut BodyBuilder, expr: Expr, ty: &Type) -> Value {
        match expr {
            Expr::Value { value } => value,
            complex => {
                let name = self.names.fresh("valname");
                b.declare(&name, ty);
                b.push(Stmt::assign(name.as_str(), complex));
                Value::Id(name)
            }
        }
    }

    /// Flatten an expression's operands, leaving at most one complex operation
    fn lower_expr(&mut self, b: &mut BodyBuilder, e: &ast::Expr) -> Result<Expr> {
        match &e.kind {
            ExprKind::Literal { value } => Ok(Expr::value(Value::from(value))),

            ExprKind::Id { name } => Ok(Expr::value(Value::id(name.as_str()))),

            ExprKind::Binary { op, left, right } => {
                let left = self.lower_value(b, left)?;
                let right = self.lower_value(b, right)?;
                if matches!(op, ast::BinOp::IDiv | ast::BinOp::Mod) {
                    guard(b, CHECK_DIV_ZERO, &right, e.loc);
                }
                Ok(Expr::Binary {
                    op: *op,
                    left,
                    right,
                })
            }

            ExprKind::Unary { op, expr } => {
                let operand = self.lower_value(b, expr)?;
                Ok(Expr::Unary { op: *op, operand })
            }

            ExprKind::Builtin1 { name, arg } => {
                let arg = self.lower_value(b, arg)?;
                Ok(Expr::Builtin1 {
                    name: name.clone(),
                    arg,
                })
            }

            ExprKind::Builtin2 { name, left, right } => {
                let left = self.lower_value(b, left)?;
                let right = self.lower_value(b, right)?;
                Ok(Expr::Builtin2 {
                    name: name.clone(),
                    left,
                    right,
                })
            }

            ExprKind::Call { callee, args } => {
                let callee = self.lower_value(b, callee)?;
                guard(b, CHECK_NONE, &callee, e.loc);
                let args = self.lower_values(b, args)?;
                Ok(Expr::CallIndirect { callee, args })
            }

            ExprKind::Lookup { obj, field } => {
                let class = object_class(obj, "field lookup")?;
                let offset = self.env.field(class, field)?.offset;
                let start = self.lower_value(b, obj)?;
                guard(b, CHECK_NONE, &start, e.loc);
                Ok(Expr::Load { start, offset })
            }

            ExprKind::MethodCall { obj, method, args } => {
                let class = object_class(obj, "method call")?;
                let receiver = self.lower_value(b, obj)?;
                guard(b, CHECK_NONE, &receiver, e.loc);
                let mut values = vec![receiver];
                values.extend(self.lower_values(b, args)?);
                Ok(Expr::Call {
                    name: mangle(class, method),
                    args: values,
                })
            }

            ExprKind::Construct { name } => {
                let value = self.construct(b, name, &e.ty)?;
                Ok(Expr::value(value))
            }

            ExprKind::ListComp {
                left,
                elem,
                iterable,
                cond,
            } => self.lower_list_comp(b, e, left, elem, iterable, cond.as_deref()),

            ExprKind::IfExpr { cond, then, els } => {
                let then_label = self.names.label("$ifExprThen");
                let else_label = self.names.label("$ifExprElse");
                let end_label = self.names.label("$ifExprEnd");
                let tmp = self.names.fresh("$ifExprTmp");
                b.declare(&tmp, &e.ty);

                let cond = self.lower_value(b, cond)?;
                b.push(Stmt::IfJmp {
                    cond,
                    then: then_label.clone(),
                    els: else_label.clone(),
                });

                b.start_block(then_label);
                let value = self.lower_expr(b, then)?;
                b.push(Stmt::assign(tmp.as_str(), value));
                b.push(Stmt::jmp(&end_label));

                b.start_block(else_label);
                let value = self.lower_expr(b, els)?;
                b.push(Stmt::assign(tmp.as_str(), value));
                b.push(Stmt::jmp(&end_label));

                b.start_block(end_label);
                Ok(Expr::value(Value::Id(tmp)))
            }

            ExprKind::Lambda { params, body } => {
                let class = self.lambda_class(params, body, &e.ty)?;
                self.add_generated(&class)?;
                let value = self.construct(b, &class.name, &Type::class(class.name.as_str()))?;
                Ok(Expr::value(value))
            }
        }
    }

    fn lower_values(&mut self, b: &mut BodyBuilder, exprs: &[ast::Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for e in exprs {
            values.push(self.lower_value(b, e)?);
        }
        Ok(values)
    }

    /// Guarded zero-argument method call on an already-evaluated receiver
    fn call_method(
        &mut self,
        b: &mut BodyBuilder,
        receiver: &Value,
        ty: &Type,
        method: &str,
        loc: Location,
    ) -> Result<Expr> {
        let class = ty.class_name().ok_or_else(|| CompileError::NotAnObject {
            context: "iteration",
            found: ty.clone(),
            loc,
        })?;
        guard(b, CHECK_NONE, receiver, loc);
        Ok(Expr::Call {
            name: mangle(class, method),
            args: vec![receiver.clone()],
        })
    }

    /// Allocate, tag with the vtable index, store defaults, then run `__init__`
    fn construct(&mut self, b: &mut BodyBuilder, class: &str, ty: &Type) -> Result<Value> {
        let index = self.env.class_index(class)?;
        let ref_fields = self.env.ref_bitmap(class)?;
        let defaults: Vec<(u32, Value)> = self
            .env
            .layout(class)?
            .values()
            .map(|slot| (slot.offset, Value::from(&slot.default)))
            .collect();

        let name = self.names.fresh("newObj");
        b.declare(&name, ty);
        let obj = Value::id(name.as_str());
        b.push(Stmt::assign(
            name.as_str(),
            Expr::Alloc {
                amount: defaults.len() as u32 + 1,
                ref_fields,
            },
        ));
        b.push(Stmt::Store {
            start: obj.clone(),
            offset: 0,
            value: Value::Word(index as u32),
        });
        for (offset, value) in defaults {
            b.push(Stmt::Store {
                start: obj.clone(),
                offset,
                value,
            });
        }
        b.push(Stmt::Expr {
            expr: Expr::Call {
                name: mangle(class, INIT),
                args: vec![obj.clone()],
            },
        });
        Ok(obj)
    }

    fn lower_list_comp(
        &mut self,
        b: &mut BodyBuilder,
        e: &ast::Expr,
        left: &ast::Expr,
        elem: &str,
        iterable: &ast::Expr,
        cond: Option<&ast::Expr>,
    ) -> Result<Expr> {
        let test = self.names.label("$compstart");
        let body = self.names.label("$compbody");
        let end = self.names.label("$compend");

        let iter = self.lower_value(b, iterable)?;
        b.push(Stmt::jmp(&test));

        b.start_block(test.clone());
        let has_next = self.call_method(b, &iter, &iterable.ty, "hasNext", e.loc)?;
        let more = self.materialize(b, has_next, &Type::Bool);
        b.push(Stmt::IfJmp {
            cond: more,
            then: body.clone(),
            els: end.clone(),
        });

        b.start_block(body);
        let next = self.call_method(b, &iter, &iterable.ty, "next", e.loc)?;
        b.push(Stmt::assign(elem, next));
        if let Some(cond) = cond {
            let add = self.names.label("$compadd");
            let keep = self.lower_value(b, cond)?;
            b.push(Stmt::IfJmp {
                cond: keep,
                then: add.clone(),
                els: test.clone(),
            });
            b.start_block(add);
        }
        let item = self.lower_value(b, left)?;
        b.push(Stmt::Expr {
            expr: Expr::Builtin1 {
                name: "print".to_string(),
                arg: item,
            },
        });
        b.push(Stmt::jmp(&test));

        b.start_block(end);
        Ok(Expr::value(Value::id(elem)))
    }

    fn lambda_class(&mut self, params: &[String], body: &ast::Expr, ty: &Type) -> Result<ast::Class> {
        let (param_types, ret) = match ty {
            Type::Callable { params, ret } => (params, &**ret),
            other => {
                return Err(CompileError::internal(format!(
                    "lambda typed as `{}` instead of a callable",
                    other
                )))
            }
        };
        if param_types.len() != params.len() {
            return Err(CompileError::internal(format!(
                "lambda takes {} parameters but its type lists {}",
                params.len(),
                param_types.len()
            )));
        }

        let name = self.names.fresh("lambda");
        let this = Type::class(name.as_str());
        let mut apply_params = vec![ast::Parameter::new(SELF, this.clone())];
        apply_params.extend(
            params
                .iter()
                .zip(param_types)
                .map(|(p, t)| ast::Parameter::new(p.as_str(), t.clone())),
        );
        log::debug!("lambda at {} converted to class `{}`", body.loc, name);

        Ok(ast::Class {
            name: name.clone(),
            fields: Vec::new(),
            methods: vec![
                constructor(&this),
                ast::FunDef {
                    name: APPLY.to_string(),
                    params: apply_params,
                    ret: ret.clone(),
                    inits: Vec::new(),
                    body: vec![ast::Stmt::ret(body.clone())],
                    children: Vec::new(),
                    loc: body.loc,
                },
            ],
        })
    }
}

/// Rewrite `f` (and, recursively, its nested functions) as closure classes
fn synthesize_closure(f: &ast::FunDef, enclosing: &[String]) -> Closure {
    let name = closure_name(&f.name, enclosing);
    let this = Type::class(name.as_str());
    log::debug!("function `{}` converted to class `{}`", f.name, name);

    let mut chain = enclosing.to_vec();
    chain.push(f.name.clone());
    let children: Vec<Closure> = f
        .children
        .iter()
        .map(|child| synthesize_closure(child, &chain))
        .collect();

    let binding = ast::VarInit::new(f.name.as_str(), this.clone(), ast::Literal::None);
    let construct = ast::Stmt {
        kind: StmtKind::Assign {
            name: f.name.clone(),
            value: ast::Expr::new(ExprKind::Construct { name: name.clone() }, this.clone())
                .at(f.loc),
        },
        loc: f.loc,
    };

    let mut params = vec![ast::Parameter::new(SELF, this.clone())];
    params.extend(f.params.iter().cloned());

    let mut inits = vec![binding.clone()];
    inits.extend(children.iter().map(|c| c.binding.clone()));
    inits.extend(f.inits.iter().cloned());

    let mut body = vec![construct.clone()];
    body.extend(children.iter().map(|c| c.construct.clone()));
    body.extend(f.body.iter().cloned());

    let apply = ast::FunDef {
        name: APPLY.to_string(),
        params,
        ret: f.ret.clone(),
        inits,
        body,
        children: Vec::new(),
        loc: f.loc,
    };

    let mut classes = vec![ast::Class {
        name,
        fields: Vec::new(),
        methods: vec![constructor(&this), apply],
    }];
    classes.extend(children.into_iter().flat_map(|c| c.classes));

    Closure {
        classes,
        binding,
        construct,
    }
}

fn constructor(this: &Type) -> ast::FunDef {
    ast::FunDef {
        name: INIT.to_string(),
        params: vec![ast::Parameter::new(SELF, this.clone())],
        ret: Type::None,
        inits: Vec::new(),
        body: Vec::new(),
        children: Vec::new(),
        loc: Location::default(),
    }
}

fn lower_var_init(init: &ast::VarInit) -> VarInit {
    VarInit::new(init.name.as_str(), init.ty.clone(), Value::from(&init.value))
}

fn object_class<'e>(obj: &'e ast::Expr, context: &'static str) -> Result<&'e str> {
    obj.ty.class_name().ok_or_else(|| CompileError::NotAnObject {
        context,
        found: obj.ty.clone(),
        loc: obj.loc,
    })
}

/// Runtime check call carrying the source position for the error report
fn guard(b: &mut BodyBuilder, check: &str, value: &Value, loc: Location) {
    b.push(Stmt::Expr {
        expr: Expr::Call {
            name: check.to_string(),
            args: vec![value.clone(), Value::Word(loc.row), Value::Word(loc.col)],
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Literal, Parameter, VarInit as AstVarInit};

    fn int_fun(name: &str, body: Vec<ast::Stmt>) -> ast::FunDef {
        ast::FunDef {
            name: name.to_string(),
            params: vec![Parameter::new("x", Type::Int)],
            ret: Type::Int,
            inits: Vec::new(),
            body,
            children: Vec::new(),
            loc: Location::default(),
        }
    }

    fn point_class() -> ast::Class {
        ast::Class {
            name: "Point".to_string(),
            fields: vec![
                AstVarInit::new("x", Type::Int, Literal::num(0)),
                AstVarInit::new("next", Type::class("Point"), Literal::None),
            ],
            methods: vec![
                ast::FunDef {
                    name: INIT.to_string(),
                    params: vec![Parameter::new("self", Type::class("Point"))],
                    ret: Type::None,
                    inits: Vec::new(),
                    body: Vec::new(),
                    children: Vec::new(),
                    loc: Location::default(),
                },
                ast::FunDef {
                    name: "get".to_string(),
                    params: vec![Parameter::new("self", Type::class("Point"))],
                    ret: Type::Int,
                    inits: Vec::new(),
                    body: vec![ast::Stmt::ret(ast::Expr::new(
                        ExprKind::Lookup {
                            obj: Box::new(ast::Expr::id("self", Type::class("Point"))),
                            field: "x".to_string(),
                        },
                        Type::Int,
                    ))],
                    children: Vec::new(),
                    loc: Location::default(),
                },
            ],
        }
    }

    fn all_stmts(body: &[BasicBlock]) -> Vec<&Stmt> {
        body.iter().flat_map(|b| b.stmts.iter()).collect()
    }

    #[test]
    fn test_closure_name_outermost_first() {
        assert_eq!(closure_name("f", &[]), "f_$closure$");
        assert_eq!(
            closure_name("inner", &["outer".to_string()]),
            "outer_$inner_$closure$"
        );
    }

    #[test]
    fn test_function_becomes_closure_class() {
        let x_plus_1 = ast::Expr::binary(BinOp::Plus, ast::Expr::id("x", Type::Int), ast::Expr::int(1), Type::Int);
        let program = ast::Program {
            funs: vec![int_fun("f", vec![ast::Stmt::ret(x_plus_1)])],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();

        let class = ir.class("f_$closure$").unwrap();
        let apply = class.method(APPLY).unwrap();
        assert_eq!(apply.params[0].name, "self");
        assert_eq!(apply.params[1].name, "x");
        assert!(all_stmts(&apply.body).iter().any(|s| matches!(
            s,
            Stmt::Return { value: Value::Id(_) }
        )));
        assert!(class.method(INIT).is_some());
        assert!(env.is_global("f"));
        assert_eq!(env.closure_name("f"), Some("f_$closure$"));
        assert_eq!(env.vtable()[0].name, "f_$closure$$apply");
        assert_eq!(env.vtable()[0].arity, 2);
    }

    #[test]
    fn test_nested_closure_names_are_unique() {
        let mut outer = int_fun("outer", vec![]);
        outer.children.push(int_fun("helper", vec![]));
        let mut other = int_fun("other", vec![]);
        other.children.push(int_fun("helper", vec![]));
        let program = ast::Program {
            funs: vec![outer, other],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        assert!(ir.class("outer_$helper_$closure$").is_some());
        assert!(ir.class("other_$helper_$closure$").is_some());
        assert_eq!(env.closure_name("outer.helper"), Some("outer_$helper_$closure$"));
        assert_eq!(env.closure_name("other.helper"), Some("other_$helper_$closure$"));
    }

    #[test]
    fn test_doubly_nested_function_in_method() {
        let this = Type::class("C");
        let mut g = int_fun("g", vec![]);
        g.children.push(int_fun("h", vec![]));
        let program = ast::Program {
            classes: vec![ast::Class {
                name: "C".to_string(),
                fields: Vec::new(),
                methods: vec![ast::FunDef {
                    name: "m".to_string(),
                    params: vec![Parameter::new("self", this)],
                    ret: Type::None,
                    inits: Vec::new(),
                    body: Vec::new(),
                    children: vec![g],
                    loc: Location::default(),
                }],
            }],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();

        assert!(ir.class("C_$m_$g_$closure$").is_some());
        assert!(ir.class("C_$m_$g_$h_$closure$").is_some());
        assert_eq!(env.closure_name("C.m.g.h"), Some("C_$m_$g_$h_$closure$"));

        // g's apply binds h on entry
        let apply = ir.class("C_$m_$g_$closure$").unwrap().method(APPLY).unwrap();
        let index = env.class_index("C_$m_$g_$h_$closure$").unwrap();
        let tag = format!("[0] = #{}", index);
        assert!(all_stmts(&apply.body).iter().any(|s| s.to_string().ends_with(&tag)));
    }

    #[test]
    fn test_atomic_assign_has_no_temporary() {
        let program = ast::Program {
            inits: vec![AstVarInit::new("a", Type::Int, Literal::num(0))],
            stmts: vec![ast::Stmt::assign("a", ast::Expr::int(5))],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        assert_eq!(ir.inits.len(), 1);
        assert_eq!(
            ir.body[0].stmts,
            vec![Stmt::assign("a", Expr::value(Value::num(5)))]
        );
    }

    #[test]
    fn test_division_gets_zero_guard() {
        let div = ast::Expr::binary(BinOp::IDiv, ast::Expr::int(7), ast::Expr::id("d", Type::Int), Type::Int)
            .at(Location::new(2, 5));
        let program = ast::Program {
            inits: vec![
                AstVarInit::new("d", Type::Int, Literal::num(0)),
                AstVarInit::new("q", Type::Int, Literal::num(0)),
            ],
            stmts: vec![ast::Stmt::assign("q", div)],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        assert_eq!(ir.body[0].stmts[0].to_string(), "$check_zero(d, #2, #5)");
        assert_eq!(ir.body[0].stmts[1].to_string(), "q = 7 // d");
    }

    #[test]
    fn test_construct_layout() {
        let program = ast::Program {
            classes: vec![point_class()],
            inits: vec![AstVarInit::new("p", Type::class("Point"), Literal::None)],
            stmts: vec![ast::Stmt::assign(
                "p",
                ast::Expr::new(
                    ExprKind::Construct {
                        name: "Point".to_string(),
                    },
                    Type::class("Point"),
                ),
            )],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        let text: Vec<String> = ir.body[0].stmts.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            text,
            vec![
                "newObj1 = alloc 3 refs=0b100",
                "store newObj1[0] = #0",
                "store newObj1[1] = 0",
                "store newObj1[2] = None",
                "Point$__init__(newObj1)",
                "p = newObj1",
            ]
        );
        let get = ir.class("Point").unwrap().method("get").unwrap();
        assert_eq!(get.body[0].stmts[0].to_string(), "$check_none(self, #0, #0)");
        assert_eq!(get.body[0].stmts[1].to_string(), "valname1 = load self[1]");
    }

    #[test]
    fn test_while_break_and_continue() {
        let loop_body = vec![
            ast::Stmt::new(StmtKind::If {
                cond: ast::Expr::id("c", Type::Bool),
                then: vec![ast::Stmt::new(StmtKind::Break)],
                els: vec![ast::Stmt::new(StmtKind::Continue)],
            }),
        ];
        let program = ast::Program {
            inits: vec![AstVarInit::new("c", Type::Bool, Literal::Bool(true))],
            stmts: vec![ast::Stmt::new(StmtKind::While {
                cond: ast::Expr::id("c", Type::Bool),
                body: loop_body,
            })],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        let then = ir.body.iter().find(|b| b.label.as_str() == "$then1").unwrap();
        assert_eq!(then.stmts, vec![Stmt::jmp(&Label::new("$whileend1"))]);
        let els = ir.body.iter().find(|b| b.label.as_str() == "$else1").unwrap();
        assert_eq!(els.stmts, vec![Stmt::jmp(&Label::new("$whilestart1"))]);
    }

    #[test]
    fn test_break_outside_loop_is_ignored() {
        let program = ast::Program {
            stmts: vec![ast::Stmt::new(StmtKind::Break)],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        assert_eq!(ir.body.len(), 1);
        assert!(ir.body[0].stmts.is_empty());
    }

    #[test]
    fn test_lambda_registered_when_lowered() {
        let lambda_ty = Type::Callable {
            params: vec![Type::Int],
            ret: Box::new(Type::Int),
        };
        let lambda = ast::Expr::new(
            ExprKind::Lambda {
                params: vec!["y".to_string()],
                body: Box::new(ast::Expr::id("y", Type::Int)),
            },
            lambda_ty.clone(),
        );
        let program = ast::Program {
            inits: vec![AstVarInit::new("g", lambda_ty, Literal::None)],
            stmts: vec![ast::Stmt::assign("g", lambda)],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let ir = lower_program(&program, &mut env).unwrap();
        assert!(ir.class("lambda1").is_some());
        assert_eq!(env.class_index("lambda1").unwrap(), 0);
        assert_eq!(env.vtable()[0].name, "lambda1$apply");
    }

    #[test]
    fn test_lookup_on_int_is_internal_error() {
        let bad = ast::Expr::new(
            ExprKind::Lookup {
                obj: Box::new(ast::Expr::int(1)),
                field: "x".to_string(),
            },
            Type::Int,
        );
        let program = ast::Program {
            stmts: vec![ast::Stmt::expr(bad)],
            ..Default::default()
        };
        let mut env = GlobalEnv::new();
        let err = lower_program(&program, &mut env).unwrap_err();
        assert!(matches!(err, CompileError::NotAnObject { .. }));
    }
}
