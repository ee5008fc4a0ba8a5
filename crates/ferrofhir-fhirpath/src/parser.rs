//! Recursive-descent FHIRPath parser.
//!
//! Precedence, low to high: `implies`, `or`, `and`, `|`, comparisons,
//! postfix (`.field`, `.call(...)`, `[index]`).

use ferrofhir_core::time::parse_fhir_datetime;

use crate::ast::{CompareOp, Expr, Literal};
use crate::error::FhirPathError;
use crate::lexer::Token;

pub fn parse(tokens: &[Token]) -> Result<Expr, FhirPathError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_implies()?;
    if parser.pos != tokens.len() {
        return Err(FhirPathError::parse(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), FhirPathError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(FhirPathError::parse(format!(
                "expected {expected:?} {context}, found {token:?}"
            ))),
            None => Err(FhirPathError::parse(format!(
                "expected {expected:?} {context}, found end of input"
            ))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn parse_implies(&mut self) -> Result<Expr, FhirPathError> {
        let mut left = self.parse_or()?;
        while self.at_keyword("implies") {
            self.pos += 1;
            let right = self.parse_or()?;
            left = Expr::Implies(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, FhirPathError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FhirPathError> {
        let mut left = self.parse_union()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.parse_union()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Expr, FhirPathError> {
        let mut left = self.parse_compare()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.pos += 1;
            let right = self.parse_compare()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr, FhirPathError> {
        let left = self.parse_postfix()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_postfix()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, FhirPathError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name.clone(),
                        other => {
                            return Err(FhirPathError::parse(format!(
                                "expected identifier after '.', found {other:?}"
                            )));
                        }
                    };
                    if matches!(self.peek(), Some(Token::LParen)) {
                        self.pos += 1;
                        let args = self.parse_args()?;
                        expr = Expr::Function {
                            name,
                            receiver: Some(Box::new(expr)),
                            args,
                        };
                    } else {
                        expr = Expr::Dot(Box::new(expr), Box::new(Expr::Path(name)));
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = match self.advance() {
                        Some(Token::Number(raw)) => raw.parse::<i64>().map_err(|_| {
                            FhirPathError::parse(format!("non-integer index '{raw}'"))
                        })?,
                        other => {
                            return Err(FhirPathError::parse(format!(
                                "expected integer index, found {other:?}"
                            )));
                        }
                    };
                    self.expect(&Token::RBracket, "after index")?;
                    expr = Expr::Index(Box::new(expr), index);
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, FhirPathError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::String(s.clone()))),
            Some(Token::Number(raw)) => parse_number_literal(raw),
            Some(Token::DateTime(raw)) => {
                let parsed = parse_fhir_datetime(raw)
                    .map_err(|e| FhirPathError::parse(format!("bad datetime literal: {e}")))?;
                Ok(Expr::Literal(Literal::DateTime(parsed.instant)))
            }
            Some(Token::Ident(name)) => {
                // A standalone identifier followed by '(' is a
                // receiver-less function call (now, today, iif).
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Function {
                        name: name.clone(),
                        receiver: None,
                        args,
                    })
                } else {
                    Ok(Expr::Path(name.clone()))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_implies()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(expr)
            }
            other => Err(FhirPathError::parse(format!(
                "unexpected token {other:?} at start of expression"
            ))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, FhirPathError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_implies()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(FhirPathError::parse(format!(
                        "expected ',' or ')' in argument list, found {other:?}"
                    )));
                }
            }
        }
        Ok(args)
    }
}

fn parse_number_literal(raw: &str) -> Result<Expr, FhirPathError> {
    if raw.contains('.') {
        raw.parse::<f64>()
            .map(|v| Expr::Literal(Literal::Decimal(v)))
            .map_err(|_| FhirPathError::parse(format!("bad decimal literal '{raw}'")))
    } else {
        raw.parse::<i64>()
            .map(|v| Expr::Literal(Literal::Integer(v)))
            .map_err(|_| FhirPathError::parse(format!("bad integer literal '{raw}'")))
    }
}
