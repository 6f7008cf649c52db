//! Recursive-descent parser
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('**' | '^') unary)?
//! primary := NUMBER | IDENT | IDENT '(' args? ')' | '(' expr ')'
//! ```
//!
//! `**` binds tighter than unary minus on its left and is right-associative,
//! so `-2 ** 2 == -4` and `2 ** 3 ** 2 == 512`.

use super::functions::{self, Function};
use super::lexer::{tokenize, Token, TokenKind};
use super::{FormulaError, MAX_NESTING_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Context lookup, falling back to a built-in constant
    Variable { name: String, column: usize },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { function: Function, args: Vec<Expr> },
}

/// Parsed, reusable formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
    identifiers: Vec<String>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, depth: 0 };

        if parser.peek().kind == TokenKind::End {
            return Err(FormulaError::syntax(1, "formula is empty"));
        }

        let root = parser.expr()?;
        let trailing = parser.peek();
        if trailing.kind != TokenKind::End {
            return Err(FormulaError::syntax(
                trailing.column,
                format!("unexpected {}", describe(&trailing.kind)),
            ));
        }

        let mut identifiers = Vec::new();
        collect_identifiers(&root, &mut identifiers);

        Ok(Formula {
            source: source.to_string(),
            root,
            identifiers,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Referenced variable names, first occurrence order, no duplicates
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(|s| s.as_str())
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &'a Token {
        // tokenize always terminates the stream with End
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self, column: usize) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(FormulaError::syntax(
                column,
                format!("expression nested deeper than {} levels", MAX_NESTING_DEPTH),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.power(),
        };
        self.advance();
        self.enter(token.column)?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary { op, operand: Box::new(operand) })
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        let token = self.peek();
        if token.kind != TokenKind::Pow {
            return Ok(base);
        }
        self.advance();
        self.enter(token.column)?;
        let exponent = self.unary()?;
        self.leave();
        Ok(Expr::Binary {
            op: BinaryOp::Pow,
            lhs: Box::new(base),
            rhs: Box::new(exponent),
        })
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(*value)),
            TokenKind::LParen => {
                self.enter(token.column)?;
                let inner = self.expr()?;
                self.leave();
                self.expect_rparen(token.column)?;
                Ok(inner)
            }
            TokenKind::Ident { name, qualified } => {
                if self.peek().kind == TokenKind::LParen {
                    self.call(name, *qualified, token.column)
                } else if *qualified {
                    // math.pi / math.e are the only qualified non-call forms
                    functions::constant(name).map(Expr::Number).ok_or_else(|| {
                        FormulaError::syntax(token.column, format!("`math.{}` is not an allowed constant", name))
                    })
                } else {
                    Ok(Expr::Variable { name: name.clone(), column: token.column })
                }
            }
            other => Err(FormulaError::syntax(
                token.column,
                format!("unexpected {}", describe(other)),
            )),
        }
    }

    fn call(&mut self, name: &str, qualified: bool, column: usize) -> Result<Expr, FormulaError> {
        let function = Function::from_name(name).ok_or_else(|| {
            let shown = if qualified { format!("math.{}", name) } else { name.to_string() };
            FormulaError::syntax(column, format!("`{}` is not an allowed function", shown))
        })?;

        let open = self.advance();
        self.enter(open.column)?;

        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                args.push(self.expr()?);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.leave();
        self.expect_rparen(open.column)?;

        let arity = function.arity();
        if !arity.accepts(args.len()) {
            return Err(FormulaError::syntax(
                column,
                format!(
                    "{}() takes {} argument(s), got {}",
                    function.name(),
                    arity.describe(),
                    args.len()
                ),
            ));
        }
        Ok(Expr::Call { function, args })
    }

    fn expect_rparen(&mut self, open_column: usize) -> Result<(), FormulaError> {
        let token = self.peek();
        if token.kind == TokenKind::RParen {
            self.advance();
            return Ok(());
        }
        Err(FormulaError::syntax(
            token.column,
            format!(
                "expected `)` to close `(` at column {}, found {}",
                open_column,
                describe(&token.kind)
            ),
        ))
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(v) => format!("number `{}`", v),
        TokenKind::Ident { name, .. } => format!("name `{}`", name),
        TokenKind::Plus => "`+`".to_string(),
        TokenKind::Minus => "`-`".to_string(),
        TokenKind::Star => "`*`".to_string(),
        TokenKind::Slash => "`/`".to_string(),
        TokenKind::Percent => "`%`".to_string(),
        TokenKind::Pow => "`**`".to_string(),
        TokenKind::LParen => "`(`".to_string(),
        TokenKind::RParen => "`)`".to_string(),
        TokenKind::Comma => "`,`".to_string(),
        TokenKind::End => "end of formula".to_string(),
    }
}

fn collect_identifiers(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Variable { name, .. } => {
            if !out.iter().any(|seen| seen == name) {
                out.push(name.clone());
            }
        }
        Expr::Unary { operand, .. } => collect_identifiers(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_identifiers(lhs, out);
            collect_identifiers(rhs, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_identifiers(arg, out);
            }
        }
    }
}
