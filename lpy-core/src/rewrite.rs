//! The two rewrite rules of the pipeline, combined in one transformer.
//!
//! - Call-site prefixing: `target(args..., kw=...)` becomes
//!   `target('<stamp>', args..., kw=...)` when the callee is the plain
//!   identifier `target`.
//! - Implicit return: a function whose body ends in a bare expression
//!   statement ends in `return <expression>` instead.
//!
//! Both run in a single bottom-up pass, so a function body has already
//! been through call-site prefixing when the implicit-return rule looks
//! at its last statement.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

use crate::ast::{Call, Expr, ExprKind, FunctionDef, Stmt, StmtKind};
use crate::error::CoreError;
use crate::transform::{Rewrite, RewriteResult, Transformer};

/// Default strftime pattern of the inserted timestamp.
pub const DEFAULT_STAMP_FORMAT: &str = "print at %a, %d %b %Y %H:%M:%S: --> ";

/// When the timestamp inserted by call-site prefixing is computed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Read the clock again for every matched call site.
    #[default]
    PerCallSite,
    /// Read the clock once, on the first matched call site of a run.
    PerRun,
    /// Insert the given text verbatim instead of reading the clock.
    Fixed(String),
}

/// Produces the timestamp literal for matched call sites.
#[derive(Debug, Clone)]
pub struct Stamper {
    policy: TimestampPolicy,
    format: String,
    cached: Option<String>,
}

impl Stamper {
    pub fn new(policy: TimestampPolicy, format: impl Into<String>) -> Result<Self, CoreError> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(CoreError::InvalidStampFormat(format));
        }
        Ok(Stamper {
            policy,
            format,
            cached: None,
        })
    }

    pub fn stamp(&mut self) -> Result<String, CoreError> {
        match &self.policy {
            TimestampPolicy::Fixed(text) => Ok(text.clone()),
            TimestampPolicy::PerCallSite => self.format_at(Utc::now()),
            TimestampPolicy::PerRun => {
                if let Some(cached) = &self.cached {
                    return Ok(cached.clone());
                }
                let stamp = self.format_at(Utc::now())?;
                self.cached = Some(stamp.clone());
                Ok(stamp)
            }
        }
    }

    fn format_at(&self, now: DateTime<Utc>) -> Result<String, CoreError> {
        let mut out = String::new();
        write!(out, "{}", now.format(&self.format))
            .map_err(|_| CoreError::InvalidStampFormat(self.format.clone()))?;
        Ok(out)
    }
}

/// Transformer applying call-site prefixing and implicit-return
/// normalization.
#[derive(Debug)]
pub struct StampRewriter {
    target: String,
    stamper: Stamper,
}

impl StampRewriter {
    pub fn new(target: impl Into<String>, stamper: Stamper) -> Self {
        StampRewriter {
            target: target.into(),
            stamper,
        }
    }
}

impl Transformer for StampRewriter {
    fn name(&self) -> &'static str {
        "stamp-rewriter"
    }

    fn call(&mut self, expr: Expr) -> RewriteResult<Expr> {
        if !expr.is_call_to(&self.target) {
            return Ok(Rewrite::Keep(expr));
        }
        let Expr { kind, .. } = expr;
        let ExprKind::Call(Call {
            func,
            args,
            keywords,
        }) = kind
        else {
            return Err(CoreError::RewriteInvariant {
                rule: self.name(),
                message: "call hook received a non-call expression".into(),
            });
        };

        let stamp = Expr::synthesized(ExprKind::Str(self.stamper.stamp()?));
        let mut prefixed = Vec::with_capacity(args.len() + 1);
        prefixed.push(stamp);
        prefixed.extend(args);
        log::trace!("prefixed call to '{}' with a timestamp", self.target);

        Ok(Rewrite::Replace(Expr::synthesized(ExprKind::Call(Call {
            func,
            args: prefixed,
            keywords,
        }))))
    }

    fn function_def(&mut self, stmt: Stmt) -> RewriteResult<Stmt> {
        let Stmt { kind, loc } = stmt;
        let StmtKind::FunctionDef(FunctionDef {
            name,
            params,
            mut body,
        }) = kind
        else {
            return Err(CoreError::RewriteInvariant {
                rule: self.name(),
                message: "function hook received a statement that is not a definition".into(),
            });
        };

        let replaced = match body.pop() {
            Some(Stmt {
                kind: StmtKind::Expr(value),
                ..
            }) => {
                body.push(Stmt::synthesized(StmtKind::Return(Some(value))));
                log::trace!("function '{name}' now returns its last expression");
                true
            }
            Some(last) => {
                body.push(last);
                false
            }
            None => false,
        };

        let stmt = Stmt::new(StmtKind::FunctionDef(FunctionDef { name, params, body }), loc);
        Ok(if replaced {
            Rewrite::Replace(stmt)
        } else {
            Rewrite::Keep(stmt)
        })
    }
}
