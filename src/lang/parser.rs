use std::rc::Rc;

use crate::lang::ast::{
    BinOp, BoolOp, CmpOp, ExceptHandler, Expr, FStringPart, FunctionDef, ImportName, Param,
    Program, Stmt, StmtKind, Target, UnaryOp,
};
use crate::lang::lexer::{tokenize, Keyword, Op, Token, TokenKind};
use crate::lang::SyntaxError;

const MAX_NESTING: usize = 100;

pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let mut parser = Parser::new(tokenize(source)?, 0);
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.at_eof() {
        body.extend(parser.statement()?);
        parser.skip_newlines();
    }
    Ok(Program { body })
}

pub fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    parse_expression_at(source, 0)
}

fn parse_expression_at(source: &str, line_offset: usize) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(source).map_err(|mut e| {
        e.line += line_offset;
        e
    })?;
    let mut parser = Parser::new(tokens, line_offset);
    parser.skip_newlines();
    if parser.at_eof() {
        return Err(parser.error("expected an expression"));
    }
    let expr = parser.expr_list()?;
    parser.skip_newlines();
    if !parser.at_eof() {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    line_offset: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, line_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            line_offset,
        }
    }

    // ---- token helpers -------------------------------------------------

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
            + self.line_offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn check_op(&self, op: Op) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op, what: &str) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{what}'")))
        }
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: Keyword, what: &str) -> Result<(), SyntaxError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{what}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line())
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Op(Op::Semicolon)
        )
    }

    // ---- statements ----------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Keyword(Keyword::If) => self.if_stmt()?,
            TokenKind::Keyword(Keyword::While) => self.while_stmt()?,
            TokenKind::Keyword(Keyword::For) => self.for_stmt()?,
            TokenKind::Keyword(Keyword::Def) => self.def_stmt()?,
            TokenKind::Keyword(Keyword::Try) => self.try_stmt()?,
            TokenKind::Indent => {
                return Err(SyntaxError::indentation("unexpected indent", line));
            }
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { kind, line }])
    }

    fn simple_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.simple_statement()?;
            stmts.push(Stmt { kind, line });
            if self.eat_op(Op::Semicolon) {
                if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(stmts)
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(stmts),
            _ => Err(self.error("invalid syntax")),
        }
    }

    fn simple_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        match self.peek() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                Ok(StmtKind::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                Ok(StmtKind::Continue)
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.expr_list()?)))
                }
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                if self.at_statement_end() {
                    Ok(StmtKind::Raise(None))
                } else {
                    Ok(StmtKind::Raise(Some(self.expr()?)))
                }
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(Op::Comma) {
                    names.push(self.expect_name()?);
                }
                Ok(StmtKind::Global(names))
            }
            TokenKind::Keyword(Keyword::Del) => {
                self.advance();
                let mut targets = Vec::new();
                loop {
                    let expr = self.postfix()?;
                    targets.push(self.to_target(expr)?);
                    if !self.eat_op(Op::Comma) || self.at_statement_end() {
                        break;
                    }
                }
                Ok(StmtKind::Delete(targets))
            }
            TokenKind::Keyword(Keyword::Import) => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let name = self.dotted_name()?;
                    let alias = if self.eat_kw(Keyword::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push(ImportName { name, alias });
                    if !self.eat_op(Op::Comma) {
                        break;
                    }
                }
                Ok(StmtKind::Import(names))
            }
            TokenKind::Keyword(Keyword::From) => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw(Keyword::Import, "import")?;
                if self.eat_op(Op::Star) {
                    return Ok(StmtKind::FromImport {
                        module,
                        names: Vec::new(),
                        star: true,
                    });
                }
                let parenthesized = self.eat_op(Op::LParen);
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name()?;
                    let alias = if self.eat_kw(Keyword::As) {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push(ImportName { name, alias });
                    if !self.eat_op(Op::Comma) {
                        break;
                    }
                    if parenthesized && self.check_op(Op::RParen) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect_op(Op::RParen, ")")?;
                }
                Ok(StmtKind::FromImport {
                    module,
                    names,
                    star: false,
                })
            }
            _ => self.expr_statement(),
        }
    }

    fn expr_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let first = self.expr_list()?;

        if self.check_op(Op::Assign) {
            let mut targets = vec![self.to_target(first)?];
            let mut value;
            loop {
                self.advance();
                value = self.expr_list()?;
                if self.check_op(Op::Assign) {
                    targets.push(self.to_target(value)?);
                    continue;
                }
                break;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug = match self.peek() {
            TokenKind::Op(Op::PlusEq) => Some(BinOp::Add),
            TokenKind::Op(Op::MinusEq) => Some(BinOp::Sub),
            TokenKind::Op(Op::StarEq) => Some(BinOp::Mul),
            TokenKind::Op(Op::SlashEq) => Some(BinOp::Div),
            TokenKind::Op(Op::DoubleSlashEq) => Some(BinOp::FloorDiv),
            TokenKind::Op(Op::PercentEq) => Some(BinOp::Mod),
            TokenKind::Op(Op::DoubleStarEq) => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let target = match self.to_target(first)? {
                Target::Tuple(_) => {
                    return Err(self.error("illegal expression for augmented assignment"))
                }
                t => t,
            };
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SyntaxError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { object, index } => {
                if matches!(*index, Expr::Slice { .. }) {
                    return Err(self.error("slice assignment is not supported"));
                }
                Ok(Target::Index {
                    object: *object,
                    index: *index,
                })
            }
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Attribute { .. } => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_name()?;
        while self.eat_op(Op::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect_op(Op::Colon, ":")?;
        if !matches!(self.peek(), TokenKind::Newline) {
            return self.simple_line();
        }
        self.advance();
        if !matches!(self.peek(), TokenKind::Indent) {
            return Err(SyntaxError::indentation(
                "expected an indented block",
                self.line(),
            ));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw(Keyword::If, "if")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw(Keyword::Elif) {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
                continue;
            }
            if self.eat_kw(Keyword::Else) {
                orelse = self.block()?;
            }
            break;
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn while_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw(Keyword::While, "while")?;
        let cond = self.expr()?;
        let body = self.block()?;
        Ok(StmtKind::While { cond, body })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw(Keyword::For, "for")?;
        let target = self.target_list()?;
        self.expect_kw(Keyword::In, "in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn target_list(&mut self) -> Result<Target, SyntaxError> {
        let first = self.postfix()?;
        if !self.check_op(Op::Comma) {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.check_kw(Keyword::In) {
                break;
            }
            items.push(self.postfix()?);
        }
        self.to_target(Expr::Tuple(items))
    }

    fn def_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw(Keyword::Def, "def")?;
        let name = self.expect_name()?;
        self.expect_op(Op::LParen, "(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(Op::RParen) {
            let pname = self.expect_name()?;
            let default = if self.eat_op(Op::Assign) {
                Some(self.expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            if params.iter().any(|p| p.name == pname) {
                return Err(self.error(format!(
                    "duplicate argument '{pname}' in function definition"
                )));
            }
            params.push(Param {
                name: pname,
                default,
            });
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen, ")")?;
        let body = self.block()?;
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef { name, params, body })))
    }

    fn try_stmt(&mut self) -> Result<StmtKind, SyntaxError> {
        self.expect_kw(Keyword::Try, "try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw(Keyword::Except) {
            let mut kinds = Vec::new();
            if self.eat_op(Op::LParen) {
                loop {
                    kinds.push(self.dotted_name()?);
                    if !self.eat_op(Op::Comma) || self.check_op(Op::RParen) {
                        break;
                    }
                }
                self.expect_op(Op::RParen, ")")?;
            } else if !self.check_op(Op::Colon) {
                kinds.push(self.dotted_name()?);
            }
            let binding = if self.eat_kw(Keyword::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(ExceptHandler {
                kinds,
                binding,
                body,
            });
        }
        let finally = if self.eat_kw(Keyword::Finally) {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }

    // ---- expressions ---------------------------------------------------

    /// One or more expressions separated by commas; more than one (or a
    /// trailing comma) makes a tuple.
    fn expr_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.expr()?;
        if !self.check_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_statement_end()
                || self.check_op(Op::Assign)
                || self.check_op(Op::RParen)
                || self.check_op(Op::Colon)
            {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        let result = self.ternary();
        self.depth -= 1;
        result
    }

    fn ternary(&mut self) -> Result<Expr, SyntaxError> {
        let then = self.or_expr()?;
        if !self.eat_kw(Keyword::If) {
            return Ok(then);
        }
        let cond = self.or_expr()?;
        self.expect_kw(Keyword::Else, "else")?;
        let orelse = self.expr()?;
        Ok(Expr::IfExp {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Box::new(orelse),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_expr()?;
        while self.eat_kw(Keyword::Or) {
            let right = self.and_expr()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_expr()?;
        while self.eat_kw(Keyword::And) {
            let right = self.not_expr()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_kw(Keyword::Not) {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.arith()?;
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::EqEq) => CmpOp::Eq,
                TokenKind::Op(Op::NotEq) => CmpOp::NotEq,
                TokenKind::Op(Op::Lt) => CmpOp::Lt,
                TokenKind::Op(Op::Gt) => CmpOp::Gt,
                TokenKind::Op(Op::Le) => CmpOp::Le,
                TokenKind::Op(Op::Ge) => CmpOp::Ge,
                TokenKind::Keyword(Keyword::In) => CmpOp::In,
                TokenKind::Keyword(Keyword::Not)
                    if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::In)) =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Keyword(Keyword::Is) => {
                    if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::Not)) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            chain.push((op, self.arith()?));
        }
        if chain.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                chain,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::Plus) => BinOp::Add,
                TokenKind::Op(Op::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::Star) => BinOp::Mul,
                TokenKind::Op(Op::Slash) => BinOp::Div,
                TokenKind::Op(Op::DoubleSlash) => BinOp::FloorDiv,
                TokenKind::Op(Op::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            TokenKind::Op(Op::Minus) => UnaryOp::Neg,
            TokenKind::Op(Op::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        let operand = self.factor();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.postfix()?;
        if self.eat_op(Op::DoubleStar) {
            let exponent = self.factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(Op::LParen) {
                expr = self.call(expr)?;
            } else if self.eat_op(Op::LBracket) {
                let index = self.subscript()?;
                self.expect_op(Op::RBracket, "]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(Op::Dot) {
                let name = self.expect_name()?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call(&mut self, func: Expr) -> Result<Expr, SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check_op(Op::RParen) {
            let is_keyword = matches!(self.peek(), TokenKind::Name(_))
                && matches!(self.peek_at(1), TokenKind::Op(Op::Assign));
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expr()?;
                if self.check_kw(Keyword::For) {
                    args.push(self.comprehension(arg)?);
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen, ")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> Result<Expr, SyntaxError> {
        let start = if self.check_op(Op::Colon) {
            None
        } else {
            Some(self.expr()?)
        };
        if !self.eat_op(Op::Colon) {
            let Some(first) = start else {
                return Err(self.error("invalid syntax"));
            };
            if self.check_op(Op::Comma) {
                let mut items = vec![first];
                while self.eat_op(Op::Comma) {
                    if self.check_op(Op::RBracket) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                return Ok(Expr::Tuple(items));
            }
            return Ok(first);
        }
        let stop = if self.check_op(Op::Colon) || self.check_op(Op::RBracket) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let step = if self.eat_op(Op::Colon) && !self.check_op(Op::RBracket) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            start: start.map(Box::new),
            stop,
            step,
        })
    }

    fn comprehension(&mut self, element: Expr) -> Result<Expr, SyntaxError> {
        self.expect_kw(Keyword::For, "for")?;
        let target = self.target_list()?;
        self.expect_kw(Keyword::In, "in")?;
        let iter = self.or_expr()?;
        let cond = if self.eat_kw(Keyword::If) {
            Some(Box::new(self.or_expr()?))
        } else {
            None
        };
        Ok(Expr::ListComp {
            element: Box::new(element),
            target: Box::new(target),
            iter: Box::new(iter),
            cond,
        })
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.advance() {
            TokenKind::Int(v) => Ok(Expr::Int(v)),
            TokenKind::Float(v) => Ok(Expr::Float(v)),
            TokenKind::Str(s) => self.strings(s, false, line),
            TokenKind::FStr(s) => self.strings(s, true, line),
            TokenKind::Name(name) => Ok(Expr::Name(name)),
            TokenKind::Keyword(Keyword::True) => Ok(Expr::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Ok(Expr::Bool(false)),
            TokenKind::Keyword(Keyword::None) => Ok(Expr::None),
            TokenKind::Op(Op::LParen) => {
                if self.eat_op(Op::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                if self.check_kw(Keyword::For) {
                    let comp = self.comprehension(first)?;
                    self.expect_op(Op::RParen, ")")?;
                    return Ok(comp);
                }
                if !self.check_op(Op::Comma) {
                    self.expect_op(Op::RParen, ")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(Op::Comma) {
                    if self.check_op(Op::RParen) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(Op::RParen, ")")?;
                Ok(Expr::Tuple(items))
            }
            TokenKind::Op(Op::LBracket) => {
                if self.eat_op(Op::RBracket) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.check_kw(Keyword::For) {
                    let comp = self.comprehension(first)?;
                    self.expect_op(Op::RBracket, "]")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat_op(Op::Comma) {
                    if self.check_op(Op::RBracket) {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(Op::RBracket, "]")?;
                Ok(Expr::List(items))
            }
            TokenKind::Op(Op::LBrace) => {
                let mut pairs = Vec::new();
                while !self.check_op(Op::RBrace) {
                    let key = self.expr()?;
                    if !self.eat_op(Op::Colon) {
                        return Err(self.error("set literals are not supported"));
                    }
                    let value = self.expr()?;
                    pairs.push((key, value));
                    if !self.eat_op(Op::Comma) {
                        break;
                    }
                }
                self.expect_op(Op::RBrace, "}")?;
                Ok(Expr::Dict(pairs))
            }
            TokenKind::Indent => Err(SyntaxError::indentation("unexpected indent", line)),
            TokenKind::Eof | TokenKind::Newline => {
                Err(SyntaxError::new("unexpected end of input", line))
            }
            _ => Err(SyntaxError::new("invalid syntax", line)),
        }
    }

    /// Adjacent string literals concatenate; any f-string in the run makes the
    /// whole run an f-string.
    fn strings(&mut self, first: String, first_is_f: bool, line: usize) -> Result<Expr, SyntaxError> {
        let mut pieces = vec![(first, first_is_f)];
        loop {
            match self.peek().clone() {
                TokenKind::Str(s) => pieces.push((s, false)),
                TokenKind::FStr(s) => pieces.push((s, true)),
                _ => break,
            }
            self.advance();
        }

        if pieces.iter().all(|(_, f)| !f) {
            return Ok(Expr::Str(pieces.into_iter().map(|(s, _)| s).collect()));
        }

        let mut parts = Vec::new();
        for (text, is_f) in pieces {
            if is_f {
                parts.extend(parse_fstring(&text, line)?);
            } else {
                parts.push(FStringPart::Literal(text));
            }
        }
        Ok(Expr::FString(parts))
    }
}

fn parse_fstring(text: &str, line: usize) -> Result<Vec<FStringPart>, SyntaxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if ch == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxError::new("f-string: single '}' is not allowed", line));
        }
        if ch != '{' {
            literal.push(ch);
            i += 1;
            continue;
        }

        // Field: find the matching close brace, tracking nesting and quotes.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut split_conv: Option<usize> = None;
        let mut split_spec: Option<usize> = None;
        let mut j = start;
        loop {
            let Some(&c) = chars.get(j) else {
                return Err(SyntaxError::new("f-string: expecting '}'", line));
            };
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '\'' | '"' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    '!' if depth == 0
                        && split_spec.is_none()
                        && chars.get(j + 1) != Some(&'=') =>
                    {
                        split_conv = Some(j)
                    }
                    ':' if depth == 0 && split_spec.is_none() => split_spec = Some(j),
                    _ => {}
                }
            }
            j += 1;
        }

        let expr_end = split_conv.or(split_spec).unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        if source.trim().is_empty() {
            return Err(SyntaxError::new("f-string: empty expression not allowed", line));
        }
        let repr = match split_conv {
            Some(at) => {
                let conv_end = split_spec.unwrap_or(j);
                let conv: String = chars[at + 1..conv_end].iter().collect();
                match conv.as_str() {
                    "r" => true,
                    "s" => false,
                    _ => {
                        return Err(SyntaxError::new(
                            "f-string: invalid conversion character",
                            line,
                        ))
                    }
                }
            }
            None => false,
        };
        let spec = split_spec.map(|at| chars[at + 1..j].iter().collect::<String>());

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        let expr = parse_expression_at(source.trim(), line.saturating_sub(1))?;
        parts.push(FStringPart::Field { expr, repr, spec });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignment_and_call() {
        let program = parse_program("a = 2\nprint(a * 3)\n").unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0].kind, StmtKind::Assign { .. }));
        assert_eq!(program.body[1].line, 2);
    }

    #[test]
    fn parses_nested_blocks() {
        let src = "def f(n):\n    total = 0\n    for i in range(n):\n        if i % 2 == 0:\n            total += i\n        else:\n            pass\n    return total\n";
        let program = parse_program(src).unwrap();
        let StmtKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params.len(), 1);
        assert_eq!(def.body.len(), 3);
    }

    #[test]
    fn parses_fstring_fields() {
        let expr = parse_expression("f'x={x:.2f} {y!r}'").unwrap();
        let Expr::FString(parts) = expr else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
        assert!(matches!(
            &parts[1],
            FStringPart::Field { spec: Some(s), repr: false, .. } if s == ".2f"
        ));
        assert!(matches!(&parts[3], FStringPart::Field { repr: true, .. }));
    }

    #[test]
    fn parses_slices_and_comprehensions() {
        assert!(matches!(
            parse_expression("xs[1:]").unwrap(),
            Expr::Index { .. }
        ));
        assert!(matches!(
            parse_expression("[x * x for x in xs if x > 1]").unwrap(),
            Expr::ListComp { .. }
        ));
    }

    #[test]
    fn reports_line_of_syntax_error() {
        let err = parse_program("a = 1\nb = (\n").unwrap_err();
        assert_eq!(err.type_name(), "SyntaxError");
        let err = parse_program("x = 1 +\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn rejects_assignment_to_literal() {
        assert!(parse_program("1 = x\n").is_err());
    }

    #[test]
    fn expression_parser_rejects_statements() {
        assert!(parse_expression("x = 1").is_err());
    }
}
