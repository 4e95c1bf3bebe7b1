//! Syntax tree of lpy programs.
//!
//! The tree is a strict ownership tree: children are owned through
//! `Box` and `Vec`, never shared. Every node except the [`Module`] root
//! carries an optional [`Location`]; the parser fills it in, nodes
//! synthesized by rewrite rules start without one until
//! [`crate::locations::fix_missing_locations`] runs.

use crate::span::Location;

/// Root of a parsed source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    Return(Option<Expr>),
    Assign { target: String, value: Expr },
    /// A bare expression evaluated for its effect.
    Expr(Expr),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While { test: Expr, body: Vec<Stmt> },
    Pass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub loc: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Num(i64),
    Str(String),
    Name(String),
    Attribute { value: Box<Expr>, attr: String },
    Call(Call),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
}

/// A `name=value` argument of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
    pub loc: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Option<Location>) -> Self {
        Stmt { kind, loc }
    }

    /// Builds a statement without a location.
    pub fn synthesized(kind: StmtKind) -> Self {
        Stmt { kind, loc: None }
    }

    /// Name of the node kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StmtKind::FunctionDef(_) => "FunctionDef",
            StmtKind::Return(_) => "Return",
            StmtKind::Assign { .. } => "Assign",
            StmtKind::Expr(_) => "Expr",
            StmtKind::If { .. } => "If",
            StmtKind::While { .. } => "While",
            StmtKind::Pass => "Pass",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Option<Location>) -> Self {
        Expr { kind, loc }
    }

    /// Builds an expression without a location.
    pub fn synthesized(kind: ExprKind) -> Self {
        Expr { kind, loc: None }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Num(_) => "Num",
            ExprKind::Str(_) => "Str",
            ExprKind::Name(_) => "Name",
            ExprKind::Attribute { .. } => "Attribute",
            ExprKind::Call(_) => "Call",
            ExprKind::BinOp { .. } => "BinOp",
            ExprKind::UnaryOp { .. } => "UnaryOp",
            ExprKind::Compare { .. } => "Compare",
        }
    }

    /// Returns true if this is a call whose callee is the identifier `name`.
    pub fn is_call_to(&self, name: &str) -> bool {
        matches!(
            &self.kind,
            ExprKind::Call(call) if matches!(&call.func.kind, ExprKind::Name(n) if n == name)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Expr {
        Expr::synthesized(ExprKind::Name(id.into()))
    }

    #[test]
    fn detects_calls_by_callee_name() {
        let call = Expr::synthesized(ExprKind::Call(Call {
            func: Box::new(name("print")),
            args: vec![],
            keywords: vec![],
        }));
        assert!(call.is_call_to("print"));
        assert!(!call.is_call_to("len"));
        assert!(!name("print").is_call_to("print"));
    }

    #[test]
    fn method_calls_do_not_match_plain_names() {
        let call = Expr::synthesized(ExprKind::Call(Call {
            func: Box::new(Expr::synthesized(ExprKind::Attribute {
                value: Box::new(name("logger")),
                attr: "print".into(),
            })),
            args: vec![],
            keywords: vec![],
        }));
        assert!(!call.is_call_to("print"));
    }
}
