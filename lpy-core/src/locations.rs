//! Location repair for rewritten trees.
//!
//! Rewrite rules synthesize nodes without a location, while the backend
//! needs every node to be addressable. [`fix_missing_locations`] gives
//! each unlocated node the location of its nearest located ancestor, or
//! [`Location::ROOT`] when there is none. Nodes that already carry a
//! location are never touched, which makes the pass idempotent.

use crate::ast::{Expr, ExprKind, Module, Stmt, StmtKind};
use crate::span::Location;

/// Fill in every missing location of `module`. Returns the number of
/// nodes that were repaired.
pub fn fix_missing_locations(module: &mut Module) -> usize {
    let mut repair = Repair { repaired: 0 };
    repair.block(&mut module.body, Location::ROOT);
    log::debug!("repaired {} node locations", repair.repaired);
    repair.repaired
}

/// Returns true if every node of `module` carries a location.
pub fn all_located(module: &Module) -> bool {
    first_unlocated(module).is_none()
}

/// Kind name of the first node without a location, in traversal order.
pub fn first_unlocated(module: &Module) -> Option<&'static str> {
    module.body.iter().find_map(unlocated_stmt)
}

struct Repair {
    repaired: usize,
}

impl Repair {
    fn fill(&mut self, loc: &mut Option<Location>, parent: Location) -> Location {
        if let Some(existing) = *loc {
            return existing;
        }
        self.repaired += 1;
        *loc = Some(parent);
        parent
    }

    fn block(&mut self, body: &mut [Stmt], parent: Location) {
        for stmt in body {
            self.stmt(stmt, parent);
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt, parent: Location) {
        let here = self.fill(&mut stmt.loc, parent);
        match &mut stmt.kind {
            StmtKind::FunctionDef(def) => {
                for param in &mut def.params {
                    self.fill(&mut param.loc, here);
                }
                self.block(&mut def.body, here);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, here);
                }
            }
            StmtKind::Assign { value, .. } => self.expr(value, here),
            StmtKind::Expr(expr) => self.expr(expr, here),
            StmtKind::If { test, body, orelse } => {
                self.expr(test, here);
                self.block(body, here);
                self.block(orelse, here);
            }
            StmtKind::While { test, body } => {
                self.expr(test, here);
                self.block(body, here);
            }
            StmtKind::Pass => {}
        }
    }

    fn expr(&mut self, expr: &mut Expr, parent: Location) {
        let here = self.fill(&mut expr.loc, parent);
        match &mut expr.kind {
            ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Name(_) => {}
            ExprKind::Attribute { value, .. } => self.expr(value, here),
            ExprKind::Call(call) => {
                self.expr(&mut call.func, here);
                for arg in &mut call.args {
                    self.expr(arg, here);
                }
                for keyword in &mut call.keywords {
                    let kw_loc = self.fill(&mut keyword.loc, here);
                    self.expr(&mut keyword.value, kw_loc);
                }
            }
            ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
                self.expr(left, here);
                self.expr(right, here);
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand, here),
        }
    }
}

fn unlocated_stmt(stmt: &Stmt) -> Option<&'static str> {
    if stmt.loc.is_none() {
        return Some(stmt.kind_name());
    }
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            if def.params.iter().any(|param| param.loc.is_none()) {
                return Some("Param");
            }
            def.body.iter().find_map(unlocated_stmt)
        }
        StmtKind::Return(value) => value.as_ref().and_then(unlocated_expr),
        StmtKind::Assign { value, .. } => unlocated_expr(value),
        StmtKind::Expr(expr) => unlocated_expr(expr),
        StmtKind::If { test, body, orelse } => unlocated_expr(test)
            .or_else(|| body.iter().find_map(unlocated_stmt))
            .or_else(|| orelse.iter().find_map(unlocated_stmt)),
        StmtKind::While { test, body } => {
            unlocated_expr(test).or_else(|| body.iter().find_map(unlocated_stmt))
        }
        StmtKind::Pass => None,
    }
}

fn unlocated_expr(expr: &Expr) -> Option<&'static str> {
    if expr.loc.is_none() {
        return Some(expr.kind_name());
    }
    match &expr.kind {
        ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Name(_) => None,
        ExprKind::Attribute { value, .. } => unlocated_expr(value),
        ExprKind::Call(call) => unlocated_expr(&call.func)
            .or_else(|| call.args.iter().find_map(unlocated_expr))
            .or_else(|| {
                call.keywords.iter().find_map(|keyword| {
                    if keyword.loc.is_none() {
                        Some("Keyword")
                    } else {
                        unlocated_expr(&keyword.value)
                    }
                })
            }),
        ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            unlocated_expr(left).or_else(|| unlocated_expr(right))
        }
        ExprKind::UnaryOp { operand, .. } => unlocated_expr(operand),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Call, FunctionDef};
    use crate::parser::parse;

    fn synthesized_call() -> Expr {
        Expr::synthesized(ExprKind::Call(Call {
            func: Box::new(Expr::synthesized(ExprKind::Name("print".into()))),
            args: vec![Expr::synthesized(ExprKind::Str("stamp".into()))],
            keywords: vec![],
        }))
    }

    #[test]
    fn leaves_parsed_tree_untouched() {
        let mut module = parse("def f(a):\n    return g(a, k=1)\n").expect("parse");
        let before = module.clone();
        assert_eq!(fix_missing_locations(&mut module), 0);
        assert_eq!(module, before);
    }

    #[test]
    fn inherits_location_of_enclosing_node() {
        let mut module = parse("def f():\n    x = 1\n").expect("parse");
        let def_loc = module.body[0].loc;
        let StmtKind::FunctionDef(FunctionDef { body, .. }) = &mut module.body[0].kind else {
            panic!("unexpected variant");
        };
        body.push(Stmt::synthesized(StmtKind::Expr(synthesized_call())));

        assert!(!all_located(&module));
        assert_eq!(fix_missing_locations(&mut module), 4);
        assert!(all_located(&module));

        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            unreachable!();
        };
        assert_eq!(def.body[1].loc, def_loc);
    }

    #[test]
    fn uses_root_location_at_top_level() {
        let mut module = Module {
            body: vec![Stmt::synthesized(StmtKind::Pass)],
        };
        fix_missing_locations(&mut module);
        assert_eq!(module.body[0].loc, Some(Location::ROOT));
    }

    #[test]
    fn nested_synthesized_node_inherits_nearest_located_ancestor() {
        let mut module = parse("x = 1\ny = 2\n").expect("parse");
        let second = module.body[1].loc.expect("parsed location");
        module.body[1].kind = StmtKind::Expr(synthesized_call());
        fix_missing_locations(&mut module);
        let StmtKind::Expr(expr) = &module.body[1].kind else {
            unreachable!();
        };
        let ExprKind::Call(call) = &expr.kind else {
            unreachable!();
        };
        assert_eq!(call.args[0].loc, Some(second));
    }

    #[test]
    fn repair_is_idempotent() {
        let mut module = parse("def f(): print(1)\n").expect("parse");
        module
            .body
            .push(Stmt::synthesized(StmtKind::Expr(synthesized_call())));
        fix_missing_locations(&mut module);
        let once = module.clone();
        assert_eq!(fix_missing_locations(&mut module), 0);
        assert_eq!(module, once);
    }

    #[test]
    fn reports_first_unlocated_kind() {
        let mut module = parse("x = 1\n").expect("parse");
        module
            .body
            .push(Stmt::new(StmtKind::Expr(synthesized_call()), Some(Location::ROOT)));
        assert_eq!(first_unlocated(&module), Some("Call"));
    }
}
