//! IR Type Definitions
//!
//! Core data structures for the intermediate representation.

use std::fmt;

use num_bigint::BigInt;
use serde::Serialize;

use crate::ast::{BinOp, Literal, Parameter, Type, UniOp};

/// Guard call inserted before dereferencing a possibly-none value
pub const CHECK_NONE: &str = "$check_none";

/// Guard call inserted before an integer division or modulo
pub const CHECK_DIV_ZERO: &str = "$check_zero";

/// Label identifier for control flow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Label(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Atomic operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "tag", content = "value", rename_all = "lowercase")]
pub enum Value {
    Num(#[serde(with = "crate::ast::bigint_text")] BigInt),
    Bool(bool),
    None,
    Id(String),
    /// Raw machine word: vtable indices and guard source positions
    Word(u32),
}

impl Value {
    pub fn num(n: impl Into<BigInt>) -> Self {
        Value::Num(n.into())
    }

    pub fn id(name: impl Into<String>) -> Self {
        Value::Id(name.into())
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Value::Id(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_id(&self) -> bool {
        matches!(self, Value::Id(_))
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Num(n) => Value::Num(n.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::None => Value::None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{}", n),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::None => write!(f, "None"),
            Value::Id(name) => write!(f, "{}", name),
            Value::Word(w) => write!(f, "#{}", w),
        }
    }
}

/// Right-hand sides; every operand is already atomic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum Expr {
    Value {
        value: Value,
    },
    Binary {
        op: BinOp,
        left: Value,
        right: Value,
    },
    Unary {
        op: UniOp,
        operand: Value,
    },
    Builtin1 {
        name: String,
        arg: Value,
    },
    Builtin2 {
        name: String,
        left: Value,
        right: Value,
    },
    /// Direct call of a known function or mangled method
    Call {
        name: String,
        args: Vec<Value>,
    },
    /// Dispatch through the vtable index stored at offset 0 of `callee`,
    /// which is also passed as the receiver
    CallIndirect {
        callee: Value,
        args: Vec<Value>,
    },
    /// Allocate `amount` words; bit i of `ref_fields` marks word i as a reference
    Alloc {
        amount: u32,
        ref_fields: u32,
    },
    Load {
        start: Value,
        offset: u32,
    },
}

impl Expr {
    pub fn value(value: Value) -> Self {
        Expr::Value { value }
    }

    /// Rebuild the expression with every operand passed through `f`
    pub fn map_values(&self, mut f: impl FnMut(&Value) -> Value) -> Expr {
        match self {
            Expr::Value { value } => Expr::Value { value: f(value) },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: f(left),
                right: f(right),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: f(operand),
            },
            Expr::Builtin1 { name, arg } => Expr::Builtin1 {
                name: name.clone(),
                arg: f(arg),
            },
            Expr::Builtin2 { name, left, right } => Expr::Builtin2 {
                name: name.clone(),
                left: f(left),
                right: f(right),
            },
            Expr::Call { name, args } => Expr::Call {
                name: name.clone(),
                args: args.iter().map(&mut f).collect(),
            },
            Expr::CallIndirect { callee, args } => {
                let callee = f(callee);
                Expr::CallIndirect {
                    callee,
                    args: args.iter().map(&mut f).collect(),
                }
            }
            Expr::Alloc { amount, ref_fields } => Expr::Alloc {
                amount: *amount,
                ref_fields: *ref_fields,
            },
            Expr::Load { start, offset } => Expr::Load {
                start: f(start),
                offset: *offset,
            },
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value { value } => write!(f, "{}", value),
            Expr::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Unary { op, operand } => write!(f, "{}{}", op, operand),
            Expr::Builtin1 { name, arg } => write!(f, "{}({})", name, arg),
            Expr::Builtin2 { name, left, right } => write!(f, "{}({}, {})", name, left, right),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::CallIndirect { callee, args } => {
                write!(f, "call_indirect {}(", callee)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::Alloc { amount, ref_fields } => {
                write!(f, "alloc {} refs={:#b}", amount, ref_fields)
            }
            Expr::Load { start, offset } => write!(f, "load {}[{}]", start, offset),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Value]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

/// IR statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum Stmt {
    Assign { name: String, value: Expr },
    Return { value: Value },
    Expr { expr: Expr },
    IfJmp { cond: Value, then: Label, els: Label },
    Jmp { target: Label },
    Store { start: Value, offset: u32, value: Value },
}

impl Stmt {
    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Stmt::Assign {
            name: name.into(),
            value,
        }
    }

    pub fn jmp(target: &Label) -> Self {
        Stmt::Jmp {
            target: target.clone(),
        }
    }

    /// Whether control never reaches the next statement
    pub fn is_terminator(&self) -> bool {
        matches!(self, Stmt::Return { .. } | Stmt::IfJmp { .. } | Stmt::Jmp { .. })
    }

    /// Rebuild the statement with every read operand passed through `f`.
    /// Assignment targets are left alone.
    pub fn map_values(&self, mut f: impl FnMut(&Value) -> Value) -> Stmt {
        match self {
            Stmt::Assign { name, value } => Stmt::Assign {
                name: name.clone(),
                value: value.map_values(f),
            },
            Stmt::Return { value } => Stmt::Return { value: f(value) },
            Stmt::Expr { expr } => Stmt::Expr {
                expr: expr.map_values(f),
            },
            Stmt::IfJmp { cond, then, els } => Stmt::IfJmp {
                cond: f(cond),
                then: then.clone(),
                els: els.clone(),
            },
            Stmt::Jmp { target } => Stmt::Jmp {
                target: target.clone(),
            },
            Stmt::Store {
                start,
                offset,
                value,
            } => {
                let start = f(start);
                Stmt::Store {
                    start,
                    offset: *offset,
                    value: f(value),
                }
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { name, value } => write!(f, "{} = {}", name, value),
            Stmt::Return { value } => write!(f, "return {}", value),
            Stmt::Expr { expr } => write!(f, "{}", expr),
            Stmt::IfJmp { cond, then, els } => {
                write!(f, "if {} goto {} else goto {}", cond, then, els)
            }
            Stmt::Jmp { target } => write!(f, "goto {}", target),
            Stmt::Store {
                start,
                offset,
                value,
            } => write!(f, "store {}[{}] = {}", start, offset, value),
        }
    }
}

/// Straight-line statements with one entry label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicBlock {
    pub label: Label,
    pub stmts: Vec<Stmt>,
}

impl BasicBlock {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            stmts: Vec::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.stmts.last().map_or(false, Stmt::is_terminator)
    }

    /// Jump targets of the terminal statement, deduplicated
    pub fn successors(&self) -> Vec<&Label> {
        match self.stmts.last() {
            Some(Stmt::IfJmp { then, els, .. }) if then == els => vec![then],
            Some(Stmt::IfJmp { then, els, .. }) => vec![then, els],
            Some(Stmt::Jmp { target }) => vec![target],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for stmt in &self.stmts {
            writeln!(f, "    {}", stmt)?;
        }
        Ok(())
    }
}

/// A declared variable and its initial value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarInit {
    pub name: String,
    pub ty: Type,
    pub value: Value,
}

impl VarInit {
    pub fn new(name: impl Into<String>, ty: Type, value: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            value,
        }
    }
}

impl fmt::Display for VarInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.name, self.ty, self.value)
    }
}

/// A lowered method; `name` is mangled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunDef {
    pub name: String,
    pub params: Vec<Parameter>,
    pub ret: Type,
    pub inits: Vec<VarInit>,
    pub body: Vec<BasicBlock>,
}

impl fmt::Display for FunDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        writeln!(f, ") -> {}:", self.ret)?;
        for init in &self.inits {
            writeln!(f, "  {}", init)?;
        }
        for block in &self.body {
            write!(f, "  {}", block)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Class {
    pub name: String,
    pub fields: Vec<VarInit>,
    pub methods: Vec<FunDef>,
}

impl Class {
    pub fn method(&self, name: &str) -> Option<&FunDef> {
        let mangled = crate::registry::mangle(&self.name, name);
        self.methods.iter().find(|m| m.name == mangled)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class {}:", self.name)?;
        for field in &self.fields {
            writeln!(f, "  {}", field)?;
        }
        for method in &self.methods {
            write!(f, "  {}", method)?;
        }
        Ok(())
    }
}

/// A lowered compilation unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Program {
    pub inits: Vec<VarInit>,
    pub classes: Vec<Class>,
    pub body: Vec<BasicBlock>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Every block body in the program: top level first, then each method
    pub fn bodies(&self) -> impl Iterator<Item = (&str, &[BasicBlock])> {
        std::iter::once(("<top level>", self.body.as_slice())).chain(
            self.classes
                .iter()
                .flat_map(|c| c.methods.iter())
                .map(|m| (m.name.as_str(), m.body.as_slice())),
        )
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for init in &self.inits {
            writeln!(f, "{}", init)?;
        }
        for class in &self.classes {
            write!(f, "{}", class)?;
        }
        for block in &self.body {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
