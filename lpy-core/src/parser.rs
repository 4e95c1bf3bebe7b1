use crate::ast::{
    BinOp, Call, CmpOp, Expr, ExprKind, FunctionDef, Keyword, Module, Param, Stmt, StmtKind,
    UnaryOp,
};
use crate::error::CoreError;
use crate::lexer::{Token, TokenKind, lex};
use crate::span::Location;

/// Deepest nesting of blocks, brackets and expression trees accepted.
pub const MAX_NESTING: usize = 200;

pub fn parse(input: &str) -> Result<Module, CoreError> {
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&TokenKind::Eof) {
        if parser.eat(&TokenKind::Newline) {
            continue;
        }
        body.push(parser.parse_stmt()?);
    }
    log::debug!("parsed {} top-level statements", body.len());
    Ok(Module { body })
}

struct Parser<'t> {
    tokens: &'t [Token],
    position: usize,
    /// Current recursion depth of the descent.
    depth: usize,
}

/// An expression with the height of its tree.
struct Operand {
    expr: Expr,
    height: usize,
}

impl<'t> Parser<'t> {
    fn parse_stmt(&mut self) -> Result<Stmt, CoreError> {
        match self.peek().kind {
            TokenKind::Def => self.parse_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            _ => {
                let stmt = self.parse_simple()?;
                self.expect(&TokenKind::Newline)?;
                Ok(stmt)
            }
        }
    }

    fn parse_def(&mut self) -> Result<Stmt, CoreError> {
        let start = self.bump().loc;
        let name = self.expect_name()?;
        self.expect(&TokenKind::LParen)?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let loc = self.peek().loc;
            let param = self.expect_name()?;
            if params.iter().any(|p| p.name == param) {
                return Err(self.error_at(loc, format!("duplicate parameter '{param}'")));
            }
            params.push(Param {
                name: param,
                loc: Some(loc),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_suite()?;
        Ok(Stmt::new(
            StmtKind::FunctionDef(FunctionDef { name, params, body }),
            Some(start.to(self.prev_loc())),
        ))
    }

    fn parse_if(&mut self) -> Result<Stmt, CoreError> {
        let start = self.bump().loc;
        let test = self.parse_expr()?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_suite()?;
        let orelse = match self.peek().kind {
            TokenKind::Elif => vec![self.nested(Self::parse_if)?],
            TokenKind::Else => {
                self.bump();
                self.expect(&TokenKind::Colon)?;
                self.parse_suite()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::new(
            StmtKind::If { test, body, orelse },
            Some(start.to(self.prev_loc())),
        ))
    }

    fn parse_while(&mut self) -> Result<Stmt, CoreError> {
        let start = self.bump().loc;
        let test = self.parse_expr()?;
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_suite()?;
        Ok(Stmt::new(
            StmtKind::While { test, body },
            Some(start.to(self.prev_loc())),
        ))
    }

    fn parse_suite(&mut self) -> Result<Vec<Stmt>, CoreError> {
        self.nested(Self::parse_block)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CoreError> {
        if !self.eat(&TokenKind::Newline) {
            let stmt = self.parse_simple()?;
            self.expect(&TokenKind::Newline)?;
            return Ok(vec![stmt]);
        }
        self.expect(&TokenKind::Indent)?;
        let mut body = Vec::new();
        while !self.eat(&TokenKind::Dedent) {
            body.push(self.parse_stmt()?);
        }
        Ok(body)
    }

    fn parse_simple(&mut self) -> Result<Stmt, CoreError> {
        let start = self.peek().loc;
        match self.peek().kind {
            TokenKind::Pass => {
                self.bump();
                return Ok(Stmt::new(StmtKind::Pass, Some(start)));
            }
            TokenKind::Return => {
                self.bump();
                let value = if self.at(&TokenKind::Newline) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                return Ok(Stmt::new(
                    StmtKind::Return(value),
                    Some(start.to(self.prev_loc())),
                ));
            }
            _ => {}
        }

        let expr = self.parse_expr()?;
        if !self.eat(&TokenKind::Assign) {
            let loc = expr.loc;
            return Ok(Stmt::new(StmtKind::Expr(expr), loc));
        }
        let ExprKind::Name(target) = expr.kind else {
            return Err(self.error_at(start, "cannot assign to expression".to_string()));
        };
        let value = self.parse_expr()?;
        Ok(Stmt::new(
            StmtKind::Assign { target, value },
            Some(start.to(self.prev_loc())),
        ))
    }

    fn parse_expr(&mut self) -> Result<Expr, CoreError> {
        Ok(self.parse_comparison()?.expr)
    }

    fn parse_comparison(&mut self) -> Result<Operand, CoreError> {
        let left = self.parse_arith()?;
        let Some(op) = cmp_op(&self.peek().kind) else {
            return Ok(left);
        };
        self.bump();
        let right = self.parse_arith()?;
        if cmp_op(&self.peek().kind).is_some() {
            return Err(self.error("chained comparisons are not supported".to_string()));
        }
        self.binary(left, right, |left, right| ExprKind::Compare {
            op,
            left,
            right,
        })
    }

    fn parse_arith(&mut self) -> Result<Operand, CoreError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_term()?;
            left = self.binary(left, right, |left, right| ExprKind::BinOp { op, left, right })?;
        }
    }

    fn parse_term(&mut self) -> Result<Operand, CoreError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            left = self.binary(left, right, |left, right| ExprKind::BinOp { op, left, right })?;
        }
    }

    fn parse_unary(&mut self) -> Result<Operand, CoreError> {
        if !self.at(&TokenKind::Minus) {
            return self.parse_postfix();
        }
        let start = self.bump().loc;
        let operand = self.nested(Self::parse_unary)?;
        self.node(
            ExprKind::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(operand.expr),
            },
            Some(start.to(self.prev_loc())),
            operand.height + 1,
        )
    }

    fn parse_postfix(&mut self) -> Result<Operand, CoreError> {
        let start = self.peek().loc;
        let mut operand = self.parse_atom()?;
        loop {
            if self.eat(&TokenKind::LParen) {
                let (args, keywords, height) = self.nested(Self::parse_arguments)?;
                operand = self.node(
                    ExprKind::Call(Call {
                        func: Box::new(operand.expr),
                        args,
                        keywords,
                    }),
                    Some(start.to(self.prev_loc())),
                    operand.height.max(height) + 1,
                )?;
            } else if self.eat(&TokenKind::Dot) {
                let attr = self.expect_name()?;
                operand = self.node(
                    ExprKind::Attribute {
                        value: Box::new(operand.expr),
                        attr,
                    },
                    Some(start.to(self.prev_loc())),
                    operand.height + 1,
                )?;
            } else {
                return Ok(operand);
            }
        }
    }

    /// Parses call arguments after the opening parenthesis, including the
    /// closing one. Also returns the greatest height among the values.
    fn parse_arguments(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>, usize), CoreError> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        let mut height = 0;
        while !self.at(&TokenKind::RParen) {
            let start = self.peek().loc;
            let is_keyword = matches!(self.peek().kind, TokenKind::Name(_))
                && matches!(self.peek_at(1).kind, TokenKind::Assign);
            if is_keyword {
                let arg = self.expect_name()?;
                self.bump();
                if keywords.iter().any(|kw| kw.arg == arg) {
                    return Err(self.error_at(start, format!("keyword argument repeated: {arg}")));
                }
                let value = self.parse_comparison()?;
                height = height.max(value.height);
                keywords.push(Keyword {
                    arg,
                    value: value.expr,
                    loc: Some(start.to(self.prev_loc())),
                });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error_at(
                        start,
                        "positional argument follows keyword argument".to_string(),
                    ));
                }
                let value = self.parse_comparison()?;
                height = height.max(value.height);
                args.push(value.expr);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((args, keywords, height))
    }

    fn parse_atom(&mut self) -> Result<Operand, CoreError> {
        let token = self.bump();
        let loc = Some(token.loc);
        let kind = match &token.kind {
            TokenKind::Int(value) => ExprKind::Num(*value),
            TokenKind::Str(value) => ExprKind::Str(value.clone()),
            TokenKind::Name(name) => ExprKind::Name(name.clone()),
            TokenKind::LParen => {
                let inner = self.nested(Self::parse_comparison)?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            other => {
                return Err(self.error_at(
                    token.loc,
                    format!("expected expression, found {}", other.describe()),
                ));
            }
        };
        Ok(Operand {
            expr: Expr::new(kind, loc),
            height: 1,
        })
    }

    fn binary(
        &self,
        left: Operand,
        right: Operand,
        build: impl FnOnce(Box<Expr>, Box<Expr>) -> ExprKind,
    ) -> Result<Operand, CoreError> {
        let loc = match (left.expr.loc, right.expr.loc) {
            (Some(start), Some(end)) => Some(start.to(end)),
            (start, end) => start.or(end),
        };
        let height = left.height.max(right.height) + 1;
        self.node(
            build(Box::new(left.expr), Box::new(right.expr)),
            loc,
            height,
        )
    }

    /// Builds an expression node whose tree is `height` levels deep.
    fn node(
        &self,
        kind: ExprKind,
        loc: Option<Location>,
        height: usize,
    ) -> Result<Operand, CoreError> {
        if height > MAX_NESTING {
            return Err(self.error_at(
                loc.unwrap_or_else(|| self.peek().loc),
                format!("expression is nested too deeply (limit {MAX_NESTING})"),
            ));
        }
        Ok(Operand {
            expr: Expr::new(kind, loc),
            height,
        })
    }

    /// Runs `parse` one level deeper, failing once the nesting limit is
    /// reached.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("too many nested levels (limit {MAX_NESTING})")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &'t Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &'t Token {
        let tokens = self.tokens;
        let index = (self.position + offset).min(tokens.len() - 1);
        &tokens[index]
    }

    /// Location of the last consumed token that is not a layout token.
    fn prev_loc(&self) -> Location {
        self.tokens[..self.position]
            .iter()
            .rev()
            .find(|tok| {
                !matches!(
                    tok.kind,
                    TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
                )
            })
            .map(|tok| tok.loc)
            .unwrap_or(Location::ROOT)
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn bump(&mut self) -> &'t Token {
        let token = self.peek();
        if !matches!(token.kind, TokenKind::Eof) {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), CoreError> {
        if self.eat(kind) {
            return Ok(());
        }
        Err(self.error(format!(
            "expected {}, found {}",
            kind.describe(),
            self.peek().kind.describe()
        )))
    }

    fn expect_name(&mut self) -> Result<String, CoreError> {
        match &self.peek().kind {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            other => Err(self.error(format!("expected name, found {}", other.describe()))),
        }
    }

    fn error(&self, message: String) -> CoreError {
        self.error_at(self.peek().loc, message)
    }

    fn error_at(&self, loc: Location, message: String) -> CoreError {
        CoreError::Parse {
            line: loc.line,
            col: loc.col,
            message,
        }
    }
}

fn cmp_op(kind: &TokenKind) -> Option<CmpOp> {
    match kind {
        TokenKind::EqEq => Some(CmpOp::Eq),
        TokenKind::NotEq => Some(CmpOp::NotEq),
        TokenKind::Less => Some(CmpOp::Lt),
        TokenKind::LessEq => Some(CmpOp::LtE),
        TokenKind::Greater => Some(CmpOp::Gt),
        TokenKind::GreaterEq => Some(CmpOp::GtE),
        _ => None,
    }
}
