//! FHIRPath abstract syntax tree.

use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Decimal(f64),
    DateTime(OffsetDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Bare identifier: a field access, or a resource-type filter when
    /// the name begins with an uppercase letter.
    Path(String),
    /// `left.right` piping.
    Dot(Box<Expr>, Box<Expr>),
    /// `expr[n]` indexer.
    Index(Box<Expr>, i64),
    /// A call, with the receiver present for `recv.f(args)` and absent
    /// for standalone calls like `now()` or `iif(...)`.
    Function {
        name: String,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Implies(Box<Expr>, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
}
