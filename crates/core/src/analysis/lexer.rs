//! Tokenizer for Solidity source

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(String),
    Str(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

// Longest first so that greedy matching picks multi-character operators
const PUNCTUATION: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "**", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<", ">>", "=>", "->", ":=", "{", "}", "(", ")",
    "[", "]", ";", ",", ".", "?", ":", "=", "+", "-", "*", "/", "%", "!", "~", "&", "|", "^",
    "<", ">", "@",
];

/// Splits source text into tokens, dropping whitespace and comments.
///
/// Unterminated comments or string literals cannot be recovered from and
/// fail with a parse error.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(Error::Parse {
                            line: start_line,
                            message: "unterminated block comment".to_string(),
                        })
                    }
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some('\n') => {
                        line += 1;
                        i += 1;
                    }
                    Some(_) => i += 1,
                }
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(chars[start..i].iter().collect()),
                line,
            });
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                // A dot only continues the literal when a digit follows
                if chars[i] == '.' && !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                    break;
                }
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number(chars[start..i].iter().collect()),
                line,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None | Some('\n') => {
                        return Err(Error::Parse {
                            line: start_line,
                            message: "unterminated string literal".to_string(),
                        })
                    }
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            value.push(*next);
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        value.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                line,
            });
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 4)].iter().collect();
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(&p) => {
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    line,
                });
                i += p.chars().count();
            }
            None => {
                // Unknown characters are skipped; the parser reports what it cannot use
                tracing::debug!("Skipping unexpected character {:?} on line {}", c, line);
                i += 1;
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_idents() {
        assert_eq!(
            kinds("a >>= b ** 2;"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(">>="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("**"),
                TokenKind::Number("2".into()),
                TokenKind::Punct(";"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = tokenize("// header\n/* block\n comment */ x\n'y'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".into()));
        assert_eq!(tokens[0].line, 3);
        assert_eq!(tokens[1].kind, TokenKind::Str("y".into()));
        assert_eq!(tokens[1].line, 4);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1e18 0xff 1.5"),
            vec![
                TokenKind::Number("1e18".into()),
                TokenKind::Number("0xff".into()),
                TokenKind::Number("1.5".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_literals_fail() {
        assert!(matches!(
            tokenize("string s = \"oops;"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(matches!(
            tokenize("x\n/* never closed"),
            Err(Error::Parse { line: 2, .. })
        ));
    }
}
