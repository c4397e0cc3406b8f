//! Tokenizer for the expression language
//!
//! Handles the notational variants users type: `**` and `^`, unicode
//! operators, superscript squares, glued function names (`sinx`) and
//! runs of single-letter variables (`xy` is `x*y`).

use crate::ast::Func;
use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Var(String),
    Func(Func),
    Pi,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Pipe,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Num(v) => v.to_string(),
            Self::Var(name) => name.clone(),
            Self::Func(f) => f.name().to_string(),
            Self::Pi => "pi".to_string(),
            Self::Plus => "+".to_string(),
            Self::Minus => "-".to_string(),
            Self::Star => "*".to_string(),
            Self::Slash => "/".to_string(),
            Self::Caret => "^".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::Pipe => "|".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) pos: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let pos = i;
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(literal.clone()))?;
                out.push(Spanned { token: Token::Num(value), pos });
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect::<String>().to_ascii_lowercase();
                // digits glued to a trailing letter form a subscript: x1, y2
                let digits_start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let subscript: String = chars[digits_start..i].iter().collect();
                push_word(&word, &subscript, pos, &mut out);
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push(Spanned { token: Token::Caret, pos });
                i += 2;
            }
            '²' | '³' => {
                out.push(Spanned { token: Token::Caret, pos });
                let exp = if ch == '²' { 2.0 } else { 3.0 };
                out.push(Spanned { token: Token::Num(exp), pos });
                i += 1;
            }
            _ => {
                let token = match ch {
                    '+' => Token::Plus,
                    '-' | '\u{2212}' => Token::Minus,
                    '*' | '\u{00d7}' | '\u{00b7}' => Token::Star,
                    '/' | '\u{00f7}' => Token::Slash,
                    '^' => Token::Caret,
                    '(' | '[' => Token::LParen,
                    ')' | ']' => Token::RParen,
                    '|' => Token::Pipe,
                    '\u{221a}' => Token::Func(Func::Sqrt),
                    '\u{03c0}' => Token::Pi,
                    other => return Err(ExprError::UnexpectedChar { ch: other, pos }),
                };
                out.push(Spanned { token, pos });
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Split an alphabetic run into function names, `pi` and single-letter variables.
fn push_word(word: &str, subscript: &str, pos: usize, out: &mut Vec<Spanned>) {
    let mut rest = word;
    let mut subscript_used = false;
    while !rest.is_empty() {
        if let Some(func) = Func::longest_prefix(rest) {
            out.push(Spanned { token: Token::Func(func), pos });
            rest = &rest[func.name().len()..];
            continue;
        }
        if rest.starts_with("pi") {
            out.push(Spanned { token: Token::Pi, pos });
            rest = &rest[2..];
            continue;
        }
        let letter = &rest[..1];
        rest = &rest[1..];
        let name = if rest.is_empty() {
            subscript_used = true;
            format!("{letter}{subscript}")
        } else {
            letter.to_string()
        };
        out.push(Spanned { token: Token::Var(name), pos });
    }
    // `sin2x` and `pi2`: the digits were not a subscript
    if !subscript_used && !subscript.is_empty() {
        if let Ok(value) = subscript.parse::<f64>() {
            out.push(Spanned { token: Token::Num(value), pos });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn double_star_is_power() {
        assert_eq!(
            kinds("x**2"),
            vec![Token::Var("x".into()), Token::Caret, Token::Num(2.0)]
        );
    }

    #[test]
    fn glued_letters_split() {
        assert_eq!(kinds("xy"), vec![Token::Var("x".into()), Token::Var("y".into())]);
        assert_eq!(kinds("sinx"), vec![Token::Func(Func::Sin), Token::Var("x".into())]);
    }

    #[test]
    fn subscripts_attach_to_last_letter() {
        assert_eq!(kinds("x1"), vec![Token::Var("x1".into())]);
    }

    #[test]
    fn unicode_operators() {
        assert_eq!(
            kinds("2\u{00d7}x\u{2212}1"),
            vec![
                Token::Num(2.0),
                Token::Star,
                Token::Var("x".into()),
                Token::Minus,
                Token::Num(1.0)
            ]
        );
        assert_eq!(kinds("x²"), vec![Token::Var("x".into()), Token::Caret, Token::Num(2.0)]);
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(matches!(
            tokenize("x # 2"),
            Err(ExprError::UnexpectedChar { ch: '#', pos: 2 })
        ));
    }
}
