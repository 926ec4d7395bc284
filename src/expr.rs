//! Expression evaluation
//!
//! Two small languages share one tokenizer and one recursive-descent parser:
//!
//! - the arithmetic range language (`+ - * / %`, unary minus, parentheses,
//!   integer literals and define names), used for range endpoints and
//!   symbolic defaults;
//! - the boolean flag language on top of it (`or`, `and`, `not`,
//!   comparisons), used to prune `flag`-gated subtrees before parsing.
//!
//! In flag context unknown symbols read as 0; in range context they are an
//! error. All arithmetic is checked 64-bit.

use std::collections::HashMap;

use crate::error::RangeError;

/// Evaluate an arithmetic expression to an integer.
pub fn evaluate(expr: &str, vars: &HashMap<String, i64>) -> Result<i64, RangeError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(tokens, Mode::Arithmetic);
    let ast = parser.parse_entry()?;
    parser.expect_eof()?;
    ast.eval(vars, Mode::Arithmetic)
}

/// Evaluate a boolean flag expression; non-zero is true.
pub fn evaluate_flag(expr: &str, vars: &HashMap<String, i64>) -> Result<bool, RangeError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(tokens, Mode::Flag);
    let ast = parser.parse_entry()?;
    parser.expect_eof()?;
    Ok(ast.eval(vars, Mode::Flag)? != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Arithmetic,
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, RangeError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: i64 = expr[pos..end]
                    .parse()
                    .map_err(|_| RangeError::Overflow)?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(expr[pos..end].to_string()));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::Eq);
                    }
                    _ => return Err(RangeError::Syntax(expr.to_string())),
                }
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::Ne);
                    }
                    _ => return Err(RangeError::Syntax(expr.to_string())),
                }
            }
            '<' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            _ => return Err(RangeError::Syntax(expr.to_string())),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Sym(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, vars: &HashMap<String, i64>, mode: Mode) -> Result<i64, RangeError> {
        match self {
            Expr::Int(v) => Ok(*v),
            Expr::Sym(name) => match vars.get(name) {
                Some(v) => Ok(*v),
                // Flag expressions treat unknown symbols as 0.
                None if mode == Mode::Flag => Ok(0),
                None => Err(RangeError::UnknownSymbol(name.clone())),
            },
            Expr::Neg(inner) => inner
                .eval(vars, mode)?
                .checked_neg()
                .ok_or(RangeError::Overflow),
            Expr::Not(inner) => Ok((inner.eval(vars, mode)? == 0) as i64),
            Expr::Binary(op, lhs, rhs) => {
                // `and`/`or` short-circuit; everything else is strict.
                if *op == BinOp::And {
                    if lhs.eval(vars, mode)? == 0 {
                        return Ok(0);
                    }
                    return Ok((rhs.eval(vars, mode)? != 0) as i64);
                }
                if *op == BinOp::Or {
                    if lhs.eval(vars, mode)? != 0 {
                        return Ok(1);
                    }
                    return Ok((rhs.eval(vars, mode)? != 0) as i64);
                }

                let l = lhs.eval(vars, mode)?;
                let r = rhs.eval(vars, mode)?;
                match op {
                    BinOp::Add => l.checked_add(r).ok_or(RangeError::Overflow),
                    BinOp::Sub => l.checked_sub(r).ok_or(RangeError::Overflow),
                    BinOp::Mul => l.checked_mul(r).ok_or(RangeError::Overflow),
                    BinOp::Div => {
                        if r == 0 {
                            Err(RangeError::DivisionByZero)
                        } else {
                            l.checked_div(r).ok_or(RangeError::Overflow)
                        }
                    }
                    BinOp::Rem => {
                        if r == 0 {
                            Err(RangeError::DivisionByZero)
                        } else {
                            l.checked_rem(r).ok_or(RangeError::Overflow)
                        }
                    }
                    BinOp::Eq => Ok((l == r) as i64),
                    BinOp::Ne => Ok((l != r) as i64),
                    BinOp::Lt => Ok((l < r) as i64),
                    BinOp::Le => Ok((l <= r) as i64),
                    BinOp::Gt => Ok((l > r) as i64),
                    BinOp::Ge => Ok((l >= r) as i64),
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                }
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    mode: Mode,
}

impl Parser {
    fn new(tokens: Vec<Token>, mode: Mode) -> Self {
        Self {
            tokens,
            pos: 0,
            mode,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn expect_eof(&self) -> Result<(), RangeError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.syntax_error())
        }
    }

    fn syntax_error(&self) -> RangeError {
        RangeError::Syntax(format!("unexpected token at position {}", self.pos))
    }

    fn parse_entry(&mut self) -> Result<Expr, RangeError> {
        match self.mode {
            Mode::Arithmetic => self.parse_sum(),
            Mode::Flag => self.parse_or(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, RangeError> {
        let mut lhs = self.parse_and()?;
        while self.at_keyword("or") {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, RangeError> {
        let mut lhs = self.parse_not()?;
        while self.at_keyword("and") {
            self.bump();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, RangeError> {
        if self.at_keyword("not") {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, RangeError> {
        let lhs = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr, RangeError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> Result<Expr, RangeError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, RangeError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, RangeError> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Ident(name)) => {
                // `and`/`or`/`not` are keywords of the flag language, never
                // symbols.
                if self.mode == Mode::Flag && matches!(name.as_str(), "and" | "or" | "not") {
                    return Err(self.syntax_error());
                }
                Ok(Expr::Sym(name))
            }
            Some(Token::LParen) => {
                let inner = self.parse_entry()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.syntax_error()),
                }
            }
            _ => Err(self.syntax_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn literals_and_precedence() {
        let v = vars(&[]);
        assert_eq!(evaluate("42", &v).unwrap(), 42);
        assert_eq!(evaluate("2+3*4", &v).unwrap(), 14);
        assert_eq!(evaluate("(2+3)*4", &v).unwrap(), 20);
        assert_eq!(evaluate("10-2-3", &v).unwrap(), 5);
        assert_eq!(evaluate("17%5", &v).unwrap(), 2);
        assert_eq!(evaluate("-4+1", &v).unwrap(), -3);
    }

    #[test]
    fn symbols_resolve_through_vars() {
        let v = vars(&[("N_MAX", 16), ("OFFSET", 2)]);
        assert_eq!(evaluate("N_MAX-1", &v).unwrap(), 15);
        assert_eq!(evaluate("N_MAX*OFFSET", &v).unwrap(), 32);
    }

    #[test]
    fn unknown_symbol_is_an_error_in_range_context() {
        let v = vars(&[]);
        assert_eq!(
            evaluate("NOPE+1", &v),
            Err(RangeError::UnknownSymbol("NOPE".to_string()))
        );
    }

    #[test]
    fn division_by_zero() {
        let v = vars(&[("Z", 0)]);
        assert_eq!(evaluate("1/Z", &v), Err(RangeError::DivisionByZero));
        assert_eq!(evaluate("1%0", &v), Err(RangeError::DivisionByZero));
    }

    #[test]
    fn overflow_is_reported() {
        let v = vars(&[]);
        assert_eq!(
            evaluate("9223372036854775807+1", &v),
            Err(RangeError::Overflow)
        );
    }

    #[test]
    fn syntax_errors() {
        let v = vars(&[]);
        assert!(matches!(evaluate("1+", &v), Err(RangeError::Syntax(_))));
        assert!(matches!(evaluate("(1", &v), Err(RangeError::Syntax(_))));
        assert!(matches!(evaluate("1 2", &v), Err(RangeError::Syntax(_))));
        assert!(matches!(evaluate("$", &v), Err(RangeError::Syntax(_))));
    }

    #[test]
    fn flag_truthiness_and_defaults() {
        let v = vars(&[("FEAT", 1), ("OFF", 0)]);
        assert!(evaluate_flag("FEAT", &v).unwrap());
        assert!(!evaluate_flag("OFF", &v).unwrap());
        // Unknown symbols read as 0 in flag context.
        assert!(!evaluate_flag("MISSING", &v).unwrap());
        assert!(evaluate_flag("not MISSING", &v).unwrap());
    }

    #[test]
    fn flag_boolean_operators() {
        let v = vars(&[("A", 1), ("B", 0), ("N", 3)]);
        assert!(evaluate_flag("A and not B", &v).unwrap());
        assert!(evaluate_flag("B or A", &v).unwrap());
        assert!(!evaluate_flag("A and B", &v).unwrap());
        assert!(evaluate_flag("N >= 3", &v).unwrap());
        assert!(evaluate_flag("N+1 == 4", &v).unwrap());
        assert!(!evaluate_flag("N != 3", &v).unwrap());
        assert!(evaluate_flag("(A or B) and N < 10", &v).unwrap());
    }

    #[test]
    fn flag_short_circuit() {
        // The right operand is never evaluated, so the division by zero is
        // not observed.
        let v = vars(&[("Z", 0)]);
        assert!(!evaluate_flag("Z and 1/Z", &v).unwrap());
        assert!(evaluate_flag("1 or 1/Z", &v).unwrap());
    }
}
