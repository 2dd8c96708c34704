//! Typed tree definitions
//!
//! The typed tree is produced upstream by parsing and type checking. Every
//! expression carries its resolved type and every node its source location;
//! lowering trusts both without re-validation.

use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A complete typed program: top-level functions, globals, classes, and statements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub funs: Vec<FunDef>,
    #[serde(default)]
    pub inits: Vec<VarInit>,
    #[serde(default)]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub stmts: Vec<Stmt>,
}

/// A class declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<VarInit>,
    #[serde(default)]
    pub methods: Vec<FunDef>,
}

/// A function or method definition, with nested functions in `children`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Parameter>,
    pub ret: Type,
    #[serde(default)]
    pub inits: Vec<VarInit>,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub children: Vec<FunDef>,
    #[serde(default)]
    pub loc: Location,
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: Type,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A variable declaration with its literal initializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInit {
    pub name: String,
    pub ty: Type,
    pub value: Literal,
}

impl VarInit {
    pub fn new(name: impl Into<String>, ty: Type, value: Literal) -> Self {
        Self {
            name: name.into(),
            ty,
            value,
        }
    }
}

/// Resolved types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum Type {
    Int,
    Bool,
    None,
    Class { name: String },
    Callable { params: Vec<Type>, ret: Box<Type> },
}

impl Type {
    pub fn class(name: impl Into<String>) -> Self {
        Type::Class { name: name.into() }
    }

    /// Class name for object-typed values
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class { name } => Some(name),
            _ => None,
        }
    }

    /// Whether values of this type live on the heap and must be traced
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Class { .. } | Type::Callable { .. })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::None => write!(f, "<None>"),
            Type::Class { name } => write!(f, "{}", name),
            Type::Callable { params, ret } => {
                write!(f, "Callable[[")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, "], {}]", ret)
            }
        }
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tag", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Num(#[serde(with = "bigint_text")] BigInt),
    Bool(bool),
    None,
}

impl Literal {
    pub fn num(n: impl Into<BigInt>) -> Self {
        Literal::Num(n.into())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Num(n) => write!(f, "{}", n),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::None => write!(f, "None"),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Plus,
    Minus,
    Mul,
    IDiv,
    Mod,
    Eq,
    Neq,
    Lte,
    Gte,
    Lt,
    Gt,
    Is,
    And,
    Or,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Mul => "*",
            BinOp::IDiv => "//",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lte => "<=",
            BinOp::Gte => ">=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Is => "is",
            BinOp::And => "and",
            BinOp::Or => "or",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniOp {
    Neg,
    Not,
}

impl fmt::Display for UniOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniOp::Neg => write!(f, "-"),
            UniOp::Not => write!(f, "not "),
        }
    }
}

/// Source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub row: u32,
    pub col: u32,
    #[serde(default)]
    pub src_idx: u32,
}

impl Location {
    pub fn new(row: u32, col: u32) -> Self {
        Self {
            row,
            col,
            src_idx: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// A typed expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    pub ty: Type,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Id {
        name: String,
    },
    #[serde(rename = "binop")]
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    #[serde(rename = "uniop")]
    Unary {
        op: UniOp,
        expr: Box<Expr>,
    },
    Builtin1 {
        name: String,
        arg: Box<Expr>,
    },
    Builtin2 {
        name: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Call of a callable value
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Lookup {
        obj: Box<Expr>,
        field: String,
    },
    MethodCall {
        obj: Box<Expr>,
        method: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Construct {
        name: String,
    },
    /// `[left for elem in iterable if cond]`
    ListComp {
        left: Box<Expr>,
        elem: String,
        iterable: Box<Expr>,
        #[serde(default)]
        cond: Option<Box<Expr>>,
    },
    IfExpr {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// Parameter types come from the expression's callable type
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            loc: Location::default(),
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn int(n: i64) -> Self {
        Expr::new(
            ExprKind::Literal {
                value: Literal::num(n),
            },
            Type::Int,
        )
    }

    pub fn bool(b: bool) -> Self {
        Expr::new(
            ExprKind::Literal {
                value: Literal::Bool(b),
            },
            Type::Bool,
        )
    }

    pub fn none() -> Self {
        Expr::new(
            ExprKind::Literal {
                value: Literal::None,
            },
            Type::None,
        )
    }

    pub fn id(name: impl Into<String>, ty: Type) -> Self {
        Expr::new(ExprKind::Id { name: name.into() }, ty)
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr, ty: Type) -> Self {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    /// Whether flattening this expression can produce a value without a temporary
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, ExprKind::Literal { .. } | ExprKind::Id { .. })
    }
}

/// A statement with its location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(flatten)]
    pub kind: StmtKind,
    #[serde(default)]
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "kebab-case")]
pub enum StmtKind {
    Assign {
        name: String,
        value: Expr,
    },
    Return {
        value: Expr,
    },
    Expr {
        expr: Expr,
    },
    Pass,
    Continue,
    Break,
    FieldAssign {
        obj: Expr,
        field: String,
        value: Expr,
    },
    If {
        cond: Expr,
        #[serde(default)]
        then: Vec<Stmt>,
        #[serde(default)]
        els: Vec<Stmt>,
    },
    While {
        cond: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    For {
        iterator: String,
        iterable: Expr,
        #[serde(default)]
        body: Vec<Stmt>,
    },
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            loc: Location::default(),
        }
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Stmt::new(StmtKind::Assign {
            name: name.into(),
            value,
        })
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::new(StmtKind::Return { value })
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::new(StmtKind::Expr { expr })
    }
}

/// Big integers travel as decimal strings so fixtures stay readable
pub(crate) mod bigint_text {
    use num_bigint::BigInt;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Int.to_string(), "int");
        assert_eq!(Type::class("Node").to_string(), "Node");
        let callable = Type::Callable {
            params: vec![Type::Int, Type::Bool],
            ret: Box::new(Type::None),
        };
        assert_eq!(callable.to_string(), "Callable[[int, bool], <None>]");
    }

    #[test]
    fn test_reference_types() {
        assert!(Type::class("A").is_reference());
        assert!(!Type::Int.is_reference());
        assert!(!Type::None.is_reference());
    }

    #[test]
    fn test_literal_json_roundtrip_keeps_big_values() {
        let lit = Literal::num(BigInt::parse_bytes(b"123456789012345678901234567890", 10).unwrap());
        let json = serde_json::to_string(&lit).unwrap();
        assert_eq!(json, r#"{"tag":"num","value":"123456789012345678901234567890"}"#);
        let back: Literal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lit);
    }

    #[test]
    fn test_expr_from_json() {
        let json = r#"{
            "tag": "binop", "op": "plus",
            "left": {"tag": "id", "name": "x", "ty": {"tag": "int"}},
            "right": {"tag": "literal", "value": {"tag": "num", "value": "1"}, "ty": {"tag": "int"}},
            "ty": {"tag": "int"}
        }"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(
            expr,
            Expr::binary(BinOp::Plus, Expr::id("x", Type::Int), Expr::int(1), Type::Int)
        );
    }

    #[test]
    fn test_atomic_exprs() {
        assert!(Expr::int(3).is_atomic());
        assert!(Expr::id("a", Type::Int).is_atomic());
        assert!(!Expr::binary(BinOp::Plus, Expr::int(1), Expr::int(2), Type::Int).is_atomic());
    }
}
