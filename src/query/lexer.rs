// src/query/lexer.rs

//! Tokenizer for path-queries.

use crate::query::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    ColonColon,
    Star,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Literal(String),
    Number(f64),
    Name(String),
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match c {
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '@' => (Token::At, 1),
            ',' => (Token::Comma, 1),
            '|' => (Token::Pipe, 1),
            '*' => (Token::Star, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '!' if next == Some('=') => (Token::NotEq, 2),
            '<' if next == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if next == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            ':' if next == Some(':') => (Token::ColonColon, 2),
            '.' if next == Some('.') => (Token::DotDot, 2),
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, width) = lex_number(&chars, i);
                (Token::Number(number), width)
            }
            '.' => (Token::Dot, 1),
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| QueryError::syntax(i, "unterminated string literal"))?;
                let literal: String = chars[i + 1..i + 1 + end].iter().collect();
                (Token::Literal(literal), end + 2)
            }
            c if c.is_ascii_digit() => {
                let (number, width) = lex_number(&chars, i);
                (Token::Number(number), width)
            }
            c if c.is_alphabetic() || c == '_' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|&&ch| ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.'))
                    .count();
                let name: String = chars[i..i + width].iter().collect();
                (Token::Name(name), width)
            }
            other => {
                return Err(QueryError::syntax(
                    i,
                    format!("unexpected character '{other}'"),
                ));
            }
        };

        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> (f64, usize) {
    let mut width = 0;
    let mut seen_dot = false;
    for &ch in &chars[start..] {
        if ch.is_ascii_digit() {
            width += 1;
        } else if ch == '.' && !seen_dot {
            seen_dot = true;
            width += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..start + width].iter().collect();
    (text.parse().unwrap_or(f64::NAN), width)
}
