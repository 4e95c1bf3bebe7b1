//! Renders a syntax tree back to lpy source text.
//!
//! The output always uses block form for compound statements and the
//! minimum number of parentheses, so `unparse(parse(unparse(m)))` is
//! stable.

use std::fmt::{self, Write};

use crate::ast::{Expr, ExprKind, Module, Stmt, StmtKind};

const INDENT: &str = "    ";

pub fn unparse(module: &Module) -> String {
    module.to_string()
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_block(f, &self.body, 0)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self, 0)
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in body {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            write!(f, "def {}(", def.name)?;
            for (index, param) in def.params.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                f.write_str(&param.name)?;
            }
            f.write_str("):\n")?;
            write_block(f, &def.body, depth + 1)
        }
        StmtKind::Return(None) => f.write_str("return\n"),
        StmtKind::Return(Some(value)) => writeln!(f, "return {value}"),
        StmtKind::Assign { target, value } => writeln!(f, "{target} = {value}"),
        StmtKind::Expr(expr) => writeln!(f, "{expr}"),
        StmtKind::If { test, body, orelse } => {
            writeln!(f, "if {test}:")?;
            write_block(f, body, depth + 1)?;
            write_orelse(f, orelse, depth)
        }
        StmtKind::While { test, body } => {
            writeln!(f, "while {test}:")?;
            write_block(f, body, depth + 1)
        }
        StmtKind::Pass => f.write_str("pass\n"),
    }
}

fn write_orelse(f: &mut fmt::Formatter<'_>, orelse: &[Stmt], depth: usize) -> fmt::Result {
    if orelse.is_empty() {
        return Ok(());
    }
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    if let [single] = orelse {
        if let StmtKind::If { test, body, orelse } = &single.kind {
            writeln!(f, "elif {test}:")?;
            write_block(f, body, depth + 1)?;
            return write_orelse(f, orelse, depth);
        }
    }
    f.write_str("else:\n")?;
    write_block(f, orelse, depth + 1)
}

// Binding strength, higher binds tighter.
const PREC_COMPARE: u8 = 1;
const PREC_ADD: u8 = 2;
const PREC_MUL: u8 = 3;
const PREC_UNARY: u8 = 4;
const PREC_POSTFIX: u8 = 5;
const PREC_ATOM: u8 = 6;

fn precedence(expr: &Expr) -> u8 {
    use crate::ast::BinOp;
    match &expr.kind {
        ExprKind::Num(value) if *value < 0 => PREC_UNARY,
        ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Name(_) => PREC_ATOM,
        ExprKind::Attribute { .. } | ExprKind::Call(_) => PREC_POSTFIX,
        ExprKind::UnaryOp { .. } => PREC_UNARY,
        ExprKind::BinOp { op, .. } => match op {
            BinOp::Add | BinOp::Sub => PREC_ADD,
            BinOp::Mul | BinOp::Div | BinOp::Mod => PREC_MUL,
        },
        ExprKind::Compare { .. } => PREC_COMPARE,
    }
}

/// Writes `expr`, parenthesized if it binds looser than `min`.
fn write_expr(f: &mut fmt::Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    let prec = precedence(expr);
    if prec < min {
        f.write_char('(')?;
        write_expr(f, expr, 0)?;
        return f.write_char(')');
    }
    match &expr.kind {
        ExprKind::Num(value) => write!(f, "{value}"),
        ExprKind::Str(value) => write_str_literal(f, value),
        ExprKind::Name(name) => f.write_str(name),
        ExprKind::Attribute { value, attr } => {
            write_expr(f, value, PREC_POSTFIX)?;
            write!(f, ".{attr}")
        }
        ExprKind::Call(call) => {
            write_expr(f, &call.func, PREC_POSTFIX)?;
            f.write_char('(')?;
            let mut first = true;
            for arg in &call.args {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write_expr(f, arg, 0)?;
            }
            for keyword in &call.keywords {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write!(f, "{}=", keyword.arg)?;
                write_expr(f, &keyword.value, 0)?;
            }
            f.write_char(')')
        }
        ExprKind::BinOp { op, left, right } => {
            write_expr(f, left, prec)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, right, prec + 1)
        }
        ExprKind::UnaryOp { operand, .. } => {
            f.write_char('-')?;
            write_expr(f, operand, PREC_UNARY)
        }
        ExprKind::Compare { op, left, right } => {
            write_expr(f, left, PREC_COMPARE + 1)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, right, PREC_COMPARE + 1)
        }
    }
}

fn write_str_literal(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_char('\'')?;
    for ch in value.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            _ => f.write_char(ch)?,
        }
    }
    f.write_char('\'')
}
