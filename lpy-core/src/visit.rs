//! Read-only traversal of the syntax tree.
//!
//! Implement [`Visitor`] and override the hooks for the node kinds of
//! interest. Every hook defaults to recursing into the node's children
//! through the matching `walk_*` function; an override that wants the
//! traversal to continue below its node calls that function itself.
//!
//! The traversal is depth-first and pre-order: a hook sees its node
//! before any of the node's children, and sequences (statement bodies,
//! argument lists) are walked in source order.

use crate::ast::{Call, Expr, ExprKind, FunctionDef, Keyword, Module, Stmt, StmtKind};
use crate::span::Location;

#[allow(unused_variables)]
pub trait Visitor: Sized {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_function_def(&mut self, def: &FunctionDef, loc: Option<Location>) {
        walk_function_def(self, def);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_num(&mut self, value: i64, loc: Option<Location>) {}

    fn visit_str(&mut self, value: &str, loc: Option<Location>) {}

    fn visit_name(&mut self, name: &str, loc: Option<Location>) {}

    fn visit_call(&mut self, call: &Call, loc: Option<Location>) {
        walk_call(self, call);
    }

    fn visit_keyword(&mut self, keyword: &Keyword) {
        self.visit_expr(&keyword.value);
    }
}

pub fn walk_module<V: Visitor>(visitor: &mut V, module: &Module) {
    walk_block(visitor, &module.body);
}

pub fn walk_block<V: Visitor>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => visitor.visit_function_def(def, stmt.loc),
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Assign { value, .. } => visitor.visit_expr(value),
        StmtKind::Expr(expr) => visitor.visit_expr(expr),
        StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_block(visitor, body);
            walk_block(visitor, orelse);
        }
        StmtKind::While { test, body } => {
            visitor.visit_expr(test);
            walk_block(visitor, body);
        }
        StmtKind::Pass => {}
    }
}

pub fn walk_function_def<V: Visitor>(visitor: &mut V, def: &FunctionDef) {
    walk_block(visitor, &def.body);
}

pub fn walk_expr<V: Visitor>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Num(value) => visitor.visit_num(*value, expr.loc),
        ExprKind::Str(value) => visitor.visit_str(value, expr.loc),
        ExprKind::Name(name) => visitor.visit_name(name, expr.loc),
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Call(call) => visitor.visit_call(call, expr.loc),
        ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
    }
}

pub fn walk_call<V: Visitor>(visitor: &mut V, call: &Call) {
    visitor.visit_expr(&call.func);
    for arg in &call.args {
        visitor.visit_expr(arg);
    }
    for keyword in &call.keywords {
        visitor.visit_keyword(keyword);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    /// Records the kind of every node in visiting order.
    #[derive(Default)]
    struct KindLog(Vec<String>);

    impl Visitor for KindLog {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            self.0.push(stmt.kind_name().to_string());
            walk_stmt(self, stmt);
        }

        fn visit_expr(&mut self, expr: &Expr) {
            self.0.push(expr.kind_name().to_string());
            walk_expr(self, expr);
        }
    }

    #[test]
    fn visits_parents_before_children() {
        let module = parse("def f(a):\n    return g(a, k=1)\n").expect("parse");
        let mut log = KindLog::default();
        log.visit_module(&module);
        assert_eq!(
            log.0,
            ["FunctionDef", "Return", "Call", "Name", "Name", "Num"]
        );
    }

    #[test]
    fn walks_both_branches_of_if() {
        let module = parse("if x:\n    a = 1\nelse:\n    b = 2\n").expect("parse");
        let mut log = KindLog::default();
        log.visit_module(&module);
        assert_eq!(log.0, ["If", "Name", "Assign", "Num", "Assign", "Num"]);
    }

    #[test]
    fn overriding_without_walking_prunes_subtree() {
        struct SkipFunctions(usize);
        impl Visitor for SkipFunctions {
            fn visit_function_def(&mut self, _def: &FunctionDef, _loc: Option<Location>) {}
            fn visit_num(&mut self, _value: i64, _loc: Option<Location>) {
                self.0 += 1;
            }
        }

        let module = parse("def f(): 1\nx = 2\n").expect("parse");
        let mut counter = SkipFunctions(0);
        counter.visit_module(&module);
        assert_eq!(counter.0, 1);
    }

    #[test]
    fn leaves_tree_unchanged() {
        let module = parse("print(1, 2)\n").expect("parse");
        let before = module.clone();
        let mut log = KindLog::default();
        log.visit_module(&module);
        assert_eq!(module, before);
    }
}
