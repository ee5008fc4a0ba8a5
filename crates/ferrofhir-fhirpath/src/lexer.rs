//! Single-pass FHIRPath lexer.

use crate::error::FhirPathError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(String),
    Str(String),
    DateTime(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Pipe,
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, FhirPathError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(FhirPathError::lex("unexpected '!' without '='"));
                }
            }
            '<' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' => {
                let (s, next) = lex_string(bytes, i + 1)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            '@' => {
                let (s, next) = lex_datetime(bytes, i + 1);
                tokens.push(Token::DateTime(s));
                i = next;
            }
            '-' => {
                // Minus is only a sign when a digit follows.
                if i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                    let (s, next) = lex_number(bytes, i);
                    tokens.push(Token::Number(s));
                    i = next;
                } else {
                    return Err(FhirPathError::lex("unexpected '-'"));
                }
            }
            c if c.is_ascii_digit() => {
                let (s, next) = lex_number(bytes, i);
                tokens.push(Token::Number(s));
                i = next;
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let (s, next) = lex_ident(bytes, i);
                tokens.push(Token::Ident(s));
                i = next;
            }
            other => {
                return Err(FhirPathError::lex(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

fn lex_string(bytes: &[u8], mut i: usize) -> Result<(String, usize), FhirPathError> {
    let mut out = Vec::new();
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                return Ok((String::from_utf8_lossy(&out).into_owned(), i + 1));
            }
            b'\\' => {
                i += 1;
                let Some(&escaped) = bytes.get(i) else {
                    return Err(FhirPathError::lex("unterminated string literal"));
                };
                match escaped {
                    b'\\' => out.push(b'\\'),
                    b'\'' => out.push(b'\''),
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    other => {
                        return Err(FhirPathError::lex(format!(
                            "unknown escape '\\{}'",
                            other as char
                        )));
                    }
                }
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(FhirPathError::lex("unterminated string literal"))
}

fn lex_datetime(bytes: &[u8], mut i: usize) -> (String, usize) {
    let start = i;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() || matches!(b, b'-' | b':' | b'T' | b'+' | b'Z' | b'.') {
            i += 1;
        } else {
            break;
        }
    }
    (
        String::from_utf8_lossy(&bytes[start..i]).into_owned(),
        i,
    )
}

fn lex_number(bytes: &[u8], mut i: usize) -> (String, usize) {
    let start = i;
    if bytes[i] == b'-' {
        i += 1;
    }
    let mut seen_dot = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            i += 1;
        } else if b == b'.' && !seen_dot && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    (
        String::from_utf8_lossy(&bytes[start..i]).into_owned(),
        i,
    )
}

fn lex_ident(bytes: &[u8], mut i: usize) -> (String, usize) {
    let start = i;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'_' || b.is_ascii_alphanumeric() {
            i += 1;
        } else {
            break;
        }
    }
    (
        String::from_utf8_lossy(&bytes[start..i]).into_owned(),
        i,
    )
}
