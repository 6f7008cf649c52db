//! Formula tokenizer
//!
//! Produces a flat token stream with 1-based column positions. Anything that
//! is not part of the arithmetic grammar (`=`, `.` member access, quotes,
//! brackets, ...) is rejected here with a syntax error.

use super::{FormulaError, MAX_FORMULA_LEN};

/// Prefix accepted in front of function/constant names (`math.log`)
const MATH_PREFIX: &str = "math";

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    /// Identifier; `qualified` is true when written as `math.<name>`
    Ident { name: String, qualified: bool },
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    /// `**` or `^`
    Pow,
    LParen,
    RParen,
    Comma,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub column: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    if chars.len() > MAX_FORMULA_LEN {
        return Err(FormulaError::syntax(
            MAX_FORMULA_LEN + 1,
            format!("formula longer than {} characters", MAX_FORMULA_LEN),
        ));
    }

    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let (value, next) = read_number(&chars, i)?;
            tokens.push(Token { kind: TokenKind::Number(value), column });
            i = next;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let (word, next) = read_word(&chars, i);
            i = next;

            if chars.get(i) == Some(&'.') {
                if word != MATH_PREFIX {
                    return Err(FormulaError::syntax(
                        i + 1,
                        format!("member access on `{}` is not allowed", word),
                    ));
                }
                let starts_ident = chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
                if !starts_ident {
                    return Err(FormulaError::syntax(i + 2, "expected a name after `math.`"));
                }
                let (name, next) = read_word(&chars, i + 1);
                i = next;
                if chars.get(i) == Some(&'.') {
                    return Err(FormulaError::syntax(
                        i + 1,
                        format!("member access on `math.{}` is not allowed", name),
                    ));
                }
                tokens.push(Token {
                    kind: TokenKind::Ident { name, qualified: true },
                    column,
                });
            } else {
                tokens.push(Token {
                    kind: TokenKind::Ident { name: word, qualified: false },
                    column,
                });
            }
            continue;
        }

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                TokenKind::Pow
            }
            '*' => TokenKind::Star,
            '/' if chars.get(i + 1) == Some(&'/') => {
                return Err(FormulaError::syntax(column, "floor division `//` is not supported"));
            }
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Pow,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '=' => {
                return Err(FormulaError::syntax(column, "assignment and comparison are not allowed"));
            }
            other => {
                return Err(FormulaError::syntax(column, format!("unexpected character `{}`", other)));
            }
        };
        tokens.push(Token { kind, column });
        i += 1;
    }

    tokens.push(Token {
        kind: TokenKind::End,
        column: chars.len() + 1,
    });
    Ok(tokens)
}

fn read_word(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), FormulaError> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end < chars.len() && chars[end] == '.' {
        end += 1;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
    }
    // Exponent only when digits follow; otherwise `e` starts the next token
    if end < chars.len() && (chars[end] == 'e' || chars[end] == 'E') {
        let mut probe = end + 1;
        if probe < chars.len() && (chars[probe] == '+' || chars[probe] == '-') {
            probe += 1;
        }
        if probe < chars.len() && chars[probe].is_ascii_digit() {
            end = probe;
            while end < chars.len() && chars[end].is_ascii_digit() {
                end += 1;
            }
        }
    }

    let text: String = chars[start..end].iter().collect();
    let value: f64 = text
        .parse()
        .map_err(|_| FormulaError::syntax(start + 1, format!("invalid number `{}`", text)))?;
    if !value.is_finite() {
        return Err(FormulaError::syntax(start + 1, format!("number `{}` is out of range", text)));
    }
    Ok((value, end))
}
