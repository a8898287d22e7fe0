use crate::error::ScriptError;
use crate::script::ast::{
    BinaryOp, Expr, FunctionDecl, LogicalOp, Pos, Stmt, StmtKind, UnaryOp,
};
use crate::script::lexer::{Lexer, Token, TokenKind};

/// Deepest nesting of blocks and expressions a script may use. Compilation
/// walks the tree recursively, so this bounds its stack use too.
pub const MAX_NESTING_DEPTH: usize = 128;

const RESERVED: &[&str] = &[
    "let", "function", "if", "else", "while", "return", "throw", "debugger", "new", "true",
    "false", "null", "undefined",
];

/// Parse a whole script into its top-level statements.
pub fn parse_script(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(src)?;
    let mut body = Vec::new();
    while parser.cur.kind != TokenKind::Eof {
        body.push(parser.parse_statement()?);
    }
    Ok(body)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    next: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ScriptError> {
        let mut lexer = Lexer::new(src);
        let cur = lexer.next_token()?;
        let next = lexer.next_token()?;
        Ok(Self {
            lexer,
            cur,
            next,
            depth: 0,
        })
    }

    fn bump(&mut self) -> Result<Token, ScriptError> {
        let following = self.lexer.next_token()?;
        let next = std::mem::replace(&mut self.next, following);
        Ok(std::mem::replace(&mut self.cur, next))
    }

    /// Enter one level of nesting. Callers pair it with [`Self::leave`].
    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        self.check_depth(0)
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Left-associative chains (`a + b + c`, `a.b.c`) deepen the tree without
    /// recursing, so they count `extra` levels on top of the current depth.
    fn check_depth(&self, extra: usize) -> Result<(), ScriptError> {
        if self.depth + extra > MAX_NESTING_DEPTH {
            return Err(ScriptError::new(
                format!("script is nested more than {MAX_NESTING_DEPTH} levels deep"),
                self.cur.pos,
            ));
        }
        Ok(())
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.cur.kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.cur.kind, TokenKind::Ident(name) if name == keyword)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ScriptError> {
        if self.cur.kind == kind {
            self.bump()
        } else {
            Err(ScriptError::new(format!("expected {what}"), self.cur.pos))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, ScriptError> {
        let pos = self.cur.pos;
        match self.bump()?.kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => Ok(name),
            TokenKind::Ident(name) => Err(ScriptError::new(
                format!("`{name}` is reserved and cannot be used as {what}"),
                pos,
            )),
            _ => Err(ScriptError::new(format!("expected {what}"), pos)),
        }
    }

    /// Statements end with `;`, which may be left out before `}` or the end of input.
    fn end_statement(&mut self) -> Result<(), ScriptError> {
        match self.cur.kind {
            TokenKind::Semi => self.bump().map(drop),
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(ScriptError::new("expected `;`", self.cur.pos)),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(TokenKind::LBrace, "`{`")?;
        self.enter()?;
        let mut body = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(ScriptError::new("expected `}`", self.cur.pos));
            }
            body.push(self.parse_statement()?);
        }
        self.leave();
        self.bump()?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ScriptError> {
        let pos = self.cur.pos;
        let keyword = match &self.cur.kind {
            TokenKind::Ident(name) => Some(name.clone()),
            _ => None,
        };

        let kind = match keyword.as_deref() {
            Some("let") => {
                self.bump()?;
                let name = self.expect_name("a variable name")?;
                let init = if self.at(&TokenKind::Assign) {
                    self.bump()?;
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.end_statement()?;
                StmtKind::Let { name, init }
            }
            Some("function") => {
                self.bump()?;
                StmtKind::Function(self.parse_function()?)
            }
            Some("if") => self.parse_if()?,
            Some("while") => {
                self.bump()?;
                self.expect(TokenKind::LParen, "`(`")?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            Some("return") => {
                self.bump()?;
                let value = match self.cur.kind {
                    TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof => None,
                    _ => Some(self.parse_expr()?),
                };
                self.end_statement()?;
                StmtKind::Return(value)
            }
            Some("throw") => {
                self.bump()?;
                let value = self.parse_expr()?;
                self.end_statement()?;
                StmtKind::Throw(value)
            }
            Some("debugger") => {
                self.bump()?;
                self.end_statement()?;
                StmtKind::Debugger
            }
            Some(name)
                if self.next.kind == TokenKind::Assign && !RESERVED.contains(&name) =>
            {
                let name = name.to_owned();
                self.bump()?;
                self.bump()?;
                let value = self.parse_expr()?;
                self.end_statement()?;
                StmtKind::Assign { name, value }
            }
            _ => {
                let expr = self.parse_expr()?;
                self.end_statement()?;
                StmtKind::Expr(expr)
            }
        };

        Ok(Stmt { kind, pos })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ScriptError> {
        self.bump()?;
        self.enter()?;
        let kind = self.parse_if_rest()?;
        self.leave();
        Ok(kind)
    }

    fn parse_if_rest(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.at_keyword("else") {
            self.bump()?;
            if self.at_keyword("if") {
                let pos = self.cur.pos;
                let kind = self.parse_if()?;
                Some(vec![Stmt { kind, pos }])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, ScriptError> {
        let name = self.expect_name("a function name")?;
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            params.push(self.expect_name("a parameter name")?);
            if !self.at(&TokenKind::RParen) {
                self.expect(TokenKind::Comma, "`,` or `)`")?;
            }
        }
        self.bump()?;
        let body = self.parse_block()?;
        Ok(FunctionDecl { name, params, body })
    }

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let expr = self.parse_or()?;
        self.leave();
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_and()?;
        let mut chain = 0;
        while self.at(&TokenKind::OrOr) {
            chain += 1;
            self.check_depth(chain)?;
            self.bump()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_equality()?;
        let mut chain = 0;
        while self.at(&TokenKind::AndAnd) {
            chain += 1;
            self.check_depth(chain)?;
            self.bump()?;
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        let mut chain = 0;
        'outer: loop {
            for (token, op) in ops {
                if self.at(token) {
                    chain += 1;
                    self.check_depth(chain)?;
                    self.bump()?;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                (TokenKind::EqEqEq, BinaryOp::StrictEq),
                (TokenKind::NotEqEq, BinaryOp::StrictNotEq),
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::NotEq),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.cur.kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.bump()?;
        self.enter()?;
        let expr = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        let mut chain = 0;
        loop {
            if matches!(self.cur.kind, TokenKind::Dot | TokenKind::LParen) {
                chain += 1;
                self.check_depth(chain)?;
            }
            match self.cur.kind {
                TokenKind::Dot => {
                    self.bump()?;
                    let pos = self.cur.pos;
                    let property = match self.bump()?.kind {
                        TokenKind::Ident(name) => name,
                        _ => return Err(ScriptError::new("expected a property name", pos)),
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LParen => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ScriptError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.at(&TokenKind::RParen) {
                self.expect(TokenKind::Comma, "`,` or `)`")?;
            }
        }
        self.bump()?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let pos: Pos = self.cur.pos;
        let token = self.bump()?;
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Str(value) => Ok(Expr::Str(value)),
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "new" => {
                    let class = self.expect_name("a constructor name")?;
                    let args = if self.at(&TokenKind::LParen) {
                        self.parse_args()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::New { class, args })
                }
                _ if RESERVED.contains(&name.as_str()) => Err(ScriptError::new(
                    format!("unexpected keyword `{name}`"),
                    pos,
                )),
                _ => Ok(Expr::Ident(name)),
            },
            TokenKind::Eof => Err(ScriptError::new("unexpected end of input", pos)),
            _ => Err(ScriptError::new("expected an expression", pos)),
        }
    }
}
