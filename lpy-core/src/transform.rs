//! Rewriting traversal of the syntax tree.
//!
//! [`transform_module`] folds a [`Transformer`] over a tree bottom-up: the
//! children of a node are transformed first, the parent is rebuilt from
//! the results, and only then the hook for the parent's kind decides
//! whether it is kept, replaced or deleted. A hook therefore always sees
//! children that are already in their rewritten form.
//!
//! Deletion removes the node from the sequence that contains it
//! (statement bodies, positional and keyword arguments). Deleting a node
//! that sits in a required slot, such as the operand of a binary
//! operation, is reported as [`CoreError::RewriteInvariant`].

use crate::ast::{Call, Expr, ExprKind, FunctionDef, Keyword, Module, Stmt, StmtKind};
use crate::error::CoreError;

/// Outcome of a single transformer hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite<T> {
    /// The node is kept as it was handed in.
    Keep(T),
    /// The node is replaced by a new one.
    Replace(T),
    /// The node is removed from its enclosing sequence.
    Delete,
}

pub type RewriteResult<T> = Result<Rewrite<T>, CoreError>;

/// Per-kind hooks of a rewriting pass. Every hook keeps its node by default.
///
/// `function_def` only receives `StmtKind::FunctionDef` statements and
/// `call` only `ExprKind::Call` expressions; every other statement and
/// expression goes through `stmt` and `expr`.
pub trait Transformer {
    /// Name used when reporting invariant violations.
    fn name(&self) -> &'static str {
        "transform"
    }

    fn function_def(&mut self, stmt: Stmt) -> RewriteResult<Stmt> {
        Ok(Rewrite::Keep(stmt))
    }

    fn stmt(&mut self, stmt: Stmt) -> RewriteResult<Stmt> {
        Ok(Rewrite::Keep(stmt))
    }

    fn call(&mut self, expr: Expr) -> RewriteResult<Expr> {
        Ok(Rewrite::Keep(expr))
    }

    fn expr(&mut self, expr: Expr) -> RewriteResult<Expr> {
        Ok(Rewrite::Keep(expr))
    }

    fn keyword(&mut self, keyword: Keyword) -> RewriteResult<Keyword> {
        Ok(Rewrite::Keep(keyword))
    }
}

/// Counters collected while folding a transformer over a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub replaced: usize,
    pub deleted: usize,
}

impl RewriteStats {
    pub fn changed(&self) -> bool {
        self.replaced + self.deleted > 0
    }
}

/// Apply `transformer` to every node of `module`, children first.
pub fn transform_module<T: Transformer>(
    module: Module,
    transformer: &mut T,
) -> Result<(Module, RewriteStats), CoreError> {
    let mut fold = Fold {
        transformer,
        stats: RewriteStats::default(),
    };
    let body = fold.block(module.body)?;
    log::debug!(
        "{}: {} nodes replaced, {} deleted",
        fold.transformer.name(),
        fold.stats.replaced,
        fold.stats.deleted
    );
    Ok((Module { body }, fold.stats))
}

struct Fold<'a, T> {
    transformer: &'a mut T,
    stats: RewriteStats,
}

impl<T: Transformer> Fold<'_, T> {
    fn block(&mut self, body: Vec<Stmt>) -> Result<Vec<Stmt>, CoreError> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            if let Some(stmt) = self.stmt(stmt)? {
                out.push(stmt);
            }
        }
        Ok(out)
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<Option<Stmt>, CoreError> {
        let Stmt { kind, loc } = stmt;
        let kind = match kind {
            StmtKind::FunctionDef(FunctionDef { name, params, body }) => {
                StmtKind::FunctionDef(FunctionDef {
                    name,
                    params,
                    body: self.block(body)?,
                })
            }
            StmtKind::Return(value) => StmtKind::Return(match value {
                Some(value) => Some(self.required(value, "return value")?),
                None => None,
            }),
            StmtKind::Assign { target, value } => StmtKind::Assign {
                target,
                value: self.required(value, "assigned value")?,
            },
            StmtKind::Expr(expr) => StmtKind::Expr(self.required(expr, "expression statement")?),
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.required(test, "if test")?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            },
            StmtKind::While { test, body } => StmtKind::While {
                test: self.required(test, "while test")?,
                body: self.block(body)?,
            },
            StmtKind::Pass => StmtKind::Pass,
        };

        let stmt = Stmt { kind, loc };
        let kind_name = stmt.kind_name();
        let rewrite = if matches!(stmt.kind, StmtKind::FunctionDef(_)) {
            self.transformer.function_def(stmt)?
        } else {
            self.transformer.stmt(stmt)?
        };
        Ok(self.record(rewrite, kind_name))
    }

    fn expr(&mut self, expr: Expr) -> Result<Option<Expr>, CoreError> {
        let Expr { kind, loc } = expr;
        let kind = match kind {
            ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::Name(_) => kind,
            ExprKind::Attribute { value, attr } => ExprKind::Attribute {
                value: Box::new(self.required(*value, "attribute receiver")?),
                attr,
            },
            ExprKind::Call(Call {
                func,
                args,
                keywords,
            }) => {
                let func = self.required(*func, "callee")?;
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    if let Some(arg) = self.expr(arg)? {
                        new_args.push(arg);
                    }
                }
                let mut new_keywords = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    if let Some(keyword) = self.keyword(keyword)? {
                        new_keywords.push(keyword);
                    }
                }
                ExprKind::Call(Call {
                    func: Box::new(func),
                    args: new_args,
                    keywords: new_keywords,
                })
            }
            ExprKind::BinOp { op, left, right } => ExprKind::BinOp {
                op,
                left: Box::new(self.required(*left, "left operand")?),
                right: Box::new(self.required(*right, "right operand")?),
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op,
                operand: Box::new(self.required(*operand, "operand")?),
            },
            ExprKind::Compare { op, left, right } => ExprKind::Compare {
                op,
                left: Box::new(self.required(*left, "left operand")?),
                right: Box::new(self.required(*right, "right operand")?),
            },
        };

        let expr = Expr { kind, loc };
        let kind_name = expr.kind_name();
        let rewrite = if matches!(expr.kind, ExprKind::Call(_)) {
            self.transformer.call(expr)?
        } else {
            self.transformer.expr(expr)?
        };
        Ok(self.record(rewrite, kind_name))
    }

    fn keyword(&mut self, keyword: Keyword) -> Result<Option<Keyword>, CoreError> {
        let Keyword { arg, value, loc } = keyword;
        let value = self.required(value, "keyword value")?;
        let rewrite = self.transformer.keyword(Keyword { arg, value, loc })?;
        Ok(self.record(rewrite, "keyword"))
    }

    fn required(&mut self, expr: Expr, slot: &'static str) -> Result<Expr, CoreError> {
        self.expr(expr)?.ok_or_else(|| CoreError::RewriteInvariant {
            rule: self.transformer.name(),
            message: format!("the {slot} cannot be deleted"),
        })
    }

    fn record<N>(&mut self, rewrite: Rewrite<N>, kind_name: &str) -> Option<N> {
        match rewrite {
            Rewrite::Keep(node) => Some(node),
            Rewrite::Replace(node) => {
                log::trace!("{}: replaced {kind_name}", self.transformer.name());
                self.stats.replaced += 1;
                Some(node)
            }
            Rewrite::Delete => {
                log::trace!("{}: deleted {kind_name}", self.transformer.name());
                self.stats.deleted += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::unparse::unparse;
    use pretty_assertions::assert_eq;

    /// Drops every `pass` statement.
    struct DropPass;

    impl Transformer for DropPass {
        fn stmt(&mut self, stmt: Stmt) -> RewriteResult<Stmt> {
            if matches!(stmt.kind, StmtKind::Pass) {
                return Ok(Rewrite::Delete);
            }
            Ok(Rewrite::Keep(stmt))
        }
    }

    /// Doubles every numeric literal and records the order it saw them in.
    #[derive(Default)]
    struct Doubler {
        seen: Vec<i64>,
    }

    impl Transformer for Doubler {
        fn expr(&mut self, expr: Expr) -> RewriteResult<Expr> {
            match expr.kind {
                ExprKind::Num(value) => {
                    self.seen.push(value);
                    Ok(Rewrite::Replace(Expr::new(ExprKind::Num(value * 2), expr.loc)))
                }
                _ => Ok(Rewrite::Keep(expr)),
            }
        }
    }

    #[test]
    fn keeps_tree_with_default_hooks() {
        struct Identity;
        impl Transformer for Identity {}

        let module = parse("def f(a):\n    if a:\n        return g(a, k=1)\n").expect("parse");
        let (out, stats) = transform_module(module.clone(), &mut Identity).expect("transform");
        assert_eq!(out, module);
        assert!(!stats.changed());
    }

    #[test]
    fn deletes_final_statement_of_body() {
        let module = parse("def f():\n    x = 1\n    pass\n").expect("parse");
        let (out, stats) = transform_module(module, &mut DropPass).expect("transform");
        assert_eq!(unparse(&out), "def f():\n    x = 1\n");
        assert_eq!(stats.deleted, 1);
    }

    #[test]
    fn replaces_nested_expressions() {
        let module = parse("x = f(1, 2 + 3, k=4)\n").expect("parse");
        let mut doubler = Doubler::default();
        let (out, stats) = transform_module(module, &mut doubler).expect("transform");
        assert_eq!(unparse(&out), "x = f(2, 4 + 6, k=8)\n");
        assert_eq!(stats.replaced, 4);
        assert_eq!(doubler.seen, [1, 2, 3, 4]);
    }

    #[test]
    fn deletes_arguments_from_sequences() {
        struct DropNames;
        impl Transformer for DropNames {
            fn expr(&mut self, expr: Expr) -> RewriteResult<Expr> {
                match expr.kind {
                    ExprKind::Name(ref name) if name == "skip" => Ok(Rewrite::Delete),
                    _ => Ok(Rewrite::Keep(expr)),
                }
            }
        }

        let module = parse("f(1, skip, 2, skip)\n").expect("parse");
        let (out, _) = transform_module(module, &mut DropNames).expect("transform");
        assert_eq!(unparse(&out), "f(1, 2)\n");
    }

    #[test]
    fn reports_deletion_of_required_expression() {
        struct DropNums;
        impl Transformer for DropNums {
            fn name(&self) -> &'static str {
                "drop-nums"
            }
            fn expr(&mut self, expr: Expr) -> RewriteResult<Expr> {
                match expr.kind {
                    ExprKind::Num(_) => Ok(Rewrite::Delete),
                    _ => Ok(Rewrite::Keep(expr)),
                }
            }
        }

        let err = transform_module(parse("x = 1 + y\n").expect("parse"), &mut DropNums)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::RewriteInvariant {
                rule: "drop-nums",
                ..
            }
        ));
    }

    #[test]
    fn parent_hook_sees_rewritten_children() {
        /// Records the first argument of every call as the parent hook sees it.
        #[derive(Default)]
        struct ArgRecorder {
            first_args: Vec<i64>,
        }
        impl Transformer for ArgRecorder {
            fn expr(&mut self, expr: Expr) -> RewriteResult<Expr> {
                match expr.kind {
                    ExprKind::Num(value) => {
                        Ok(Rewrite::Replace(Expr::new(ExprKind::Num(value + 10), expr.loc)))
                    }
                    _ => Ok(Rewrite::Keep(expr)),
                }
            }
            fn call(&mut self, expr: Expr) -> RewriteResult<Expr> {
                if let ExprKind::Call(call) = &expr.kind {
                    if let Some(ExprKind::Num(value)) = call.args.first().map(|a| &a.kind) {
                        self.first_args.push(*value);
                    }
                }
                Ok(Rewrite::Keep(expr))
            }
        }

        let mut recorder = ArgRecorder::default();
        transform_module(parse("f(g(1))\n").expect("parse"), &mut recorder).expect("transform");
        assert_eq!(recorder.first_args, [11]);
    }
}
