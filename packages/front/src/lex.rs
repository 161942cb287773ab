use cu::pre::*;

use crate::{Token, TokenKind};

/// Hard keywords; contextual keywords (`override`, `final`) stay identifiers
const KEYWORDS: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "auto", "const", "volatile", "constexpr", "consteval", "constinit", "static", "inline",
    "extern", "virtual", "struct", "class", "union", "enum", "namespace", "using", "typedef",
    "template", "typename", "concept", "requires", "return", "if", "else", "while", "for",
    "true", "false", "nullptr", "this", "operator", "public", "private", "protected", "friend",
    "noexcept", "sizeof", "decltype", "static_assert", "static_cast", "reinterpret_cast",
    "const_cast", "dynamic_cast", "new", "delete", "default", "explicit", "break", "continue",
];

/// Multi-character operators and punctuators, longest first. `>` is always
/// emitted alone so the parser can close nested template argument lists;
/// adjacent `>` `>` merge back into a shift during expression parsing.
const MULTI: &[&str] = &[
    "...", "->*", "<=>", "::", "->", "++", "--", "<<", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=",
];

const PUNCTS: &str = "(){}[];,:?";

/// Lex a source buffer into the finite token sequence the stream adapter
/// consumes. This is the in-tree token source; the adapter accepts any
/// producer of the same shape.
pub fn lex(source: &str, file: u16) -> cu::Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut toks = vec![];
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    macro_rules! push {
        ($kind:expr, $text:expr, $col:expr) => {
            toks.push(Token {
                kind: $kind,
                text: $text.into(),
                line,
                col: $col,
                file,
            })
        };
    }

    while i < bytes.len() {
        let c = bytes[i] as char;
        // whitespace
        if c == '\n' {
            line += 1;
            col = 1;
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            col += 1;
            continue;
        }
        // comments
        if c == '/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                i += 2;
                col += 2;
                loop {
                    if i + 1 >= bytes.len() {
                        cu::bail!("unterminated block comment at line {line}");
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        col += 2;
                        break;
                    }
                    if bytes[i] == b'\n' {
                        line += 1;
                        col = 1;
                    } else {
                        col += 1;
                    }
                    i += 1;
                }
                continue;
            }
        }
        // preprocessor lines are outside this front-end; skip them whole
        if c == '#' && col == 1 {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        // identifier / keyword
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            let start_col = col;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
                col += 1;
            }
            let text = &source[start..i];
            let kind = if KEYWORDS.contains(&text) {
                TokenKind::Keyword
            } else {
                TokenKind::Ident
            };
            push!(kind, text, start_col);
            continue;
        }
        // numeric literal
        if c.is_ascii_digit() {
            let start = i;
            let start_col = col;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric()
                    || bytes[i] == b'.'
                    || bytes[i] == b'\''
                    || ((bytes[i] == b'+' || bytes[i] == b'-')
                        && matches!(bytes[i - 1], b'e' | b'E' | b'p' | b'P')))
            {
                i += 1;
                col += 1;
            }
            push!(TokenKind::Literal, &source[start..i], start_col);
            continue;
        }
        // string / char literal
        if c == '"' || c == '\'' {
            let quote = bytes[i];
            let start = i;
            let start_col = col;
            i += 1;
            col += 1;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\\' {
                    i += 1;
                    col += 1;
                }
                if i < bytes.len() && bytes[i] == b'\n' {
                    cu::bail!("unterminated literal at line {line}");
                }
                i += 1;
                col += 1;
            }
            cu::ensure!(i < bytes.len(), "unterminated literal at line {line}")?;
            i += 1;
            col += 1;
            push!(TokenKind::Literal, &source[start..i], start_col);
            continue;
        }
        // multi-char operators, longest match first
        let rest = &source[i..];
        if let Some(m) = MULTI.iter().find(|m| rest.starts_with(**m)) {
            let kind = if matches!(*m, "::" | "...") {
                TokenKind::Punct
            } else {
                TokenKind::Op
            };
            push!(kind, *m, col);
            i += m.len();
            col += m.len() as u32;
            continue;
        }
        // single-char tokens
        let kind = if PUNCTS.contains(c) {
            TokenKind::Punct
        } else if "+-*/%<>=!&|^~.".contains(c) {
            TokenKind::Op
        } else {
            cu::bail!("unexpected character '{c}' at {line}:{col}");
        };
        push!(kind, &source[i..i + 1], col);
        i += 1;
        col += 1;
    }
    toks.push(Token::eof());
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        lex(src, 0)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text.to_string())
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            texts("int x = 42;"),
            vec!["int", "x", "=", "42", ";"]
        );
    }

    #[test]
    fn test_template_angle_brackets_split() {
        // '>' is never merged, so nested closers work
        assert_eq!(
            texts("Tuple<Tuple<int>>"),
            vec!["Tuple", "<", "Tuple", "<", "int", ">", ">"]
        );
    }

    #[test]
    fn test_multichar_operators() {
        assert_eq!(
            texts("a::b->c && d... <<="),
            vec!["a", "::", "b", "->", "c", "&&", "d", "...", "<<", "="]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let toks = lex("int a; // c\n/* b\nlines */ int b;", 0).unwrap();
        let b = toks.iter().find(|t| t.is("b")).unwrap();
        assert_eq!(b.line, 3);
    }

    #[test]
    fn test_keyword_classification() {
        let toks = lex("template override", 0).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Keyword);
        // contextual keyword stays an identifier
        assert_eq!(toks[1].kind, TokenKind::Ident);
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            texts(r#"3.14 0x1F 'a' "hi\n""#),
            vec!["3.14", "0x1F", "'a'", "\"hi\\n\""]
        );
    }
}
