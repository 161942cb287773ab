use cu::pre::*;
use embercc_arena::{ArcStr, Cursor, loc};

/// Token classification produced by the token source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Keyword,
    Literal,
    Punct,
    Op,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: ArcStr,
    pub line: u32,
    pub col: u32,
    pub file: u16,
}

impl Token {
    pub fn eof() -> Self {
        Self {
            kind: TokenKind::Eof,
            text: ArcStr::new(""),
            line: 0,
            col: 0,
            file: 0,
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text.as_ref() == text
    }

    pub fn is_kw(&self, text: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.as_ref() == text
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    pos: u32,
    line: u32,
    col: u32,
    file: u16,
}

/// Pull adapter over the finite token sequence
///
/// Exposes one-token lookahead and cheap cursor save/restore. A full save
/// captures the position and the last diagnostic location; a lexer-only
/// restore rewinds the position while keeping every AST node created since
/// the save. Saved cursors stay valid for the compilation's lifetime, which
/// is what lets template declarations defer their bodies.
pub struct Tokens {
    toks: Vec<Token>,
    pos: usize,
    saved: Vec<SavedCursor>,
}

impl Tokens {
    pub fn new(mut toks: Vec<Token>) -> Self {
        if !matches!(toks.last(), Some(t) if t.kind == TokenKind::Eof) {
            toks.push(Token::eof());
        }
        Self {
            toks,
            pos: 0,
            saved: vec![],
        }
    }

    pub fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    pub fn peek_ahead(&self, n: usize) -> &Token {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)]
    }

    pub fn advance(&mut self) {
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        let t = self.peek();
        loc::record(t.file, t.line, t.col);
    }

    pub fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Raw position, for speculation marks
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.toks.len() - 1);
    }

    /// Full save: position plus the current diagnostic location
    pub fn save_cursor(&mut self) -> Cursor {
        let t = self.peek();
        let saved = SavedCursor {
            pos: self.pos as u32,
            line: t.line,
            col: t.col,
            file: t.file,
        };
        let id = Cursor(self.saved.len() as u32);
        self.saved.push(saved);
        id
    }

    /// Restore position and the diagnostic location record
    pub fn restore_full(&mut self, cursor: Cursor) {
        let s = self.saved[cursor.0 as usize];
        self.pos = (s.pos as usize).min(self.toks.len() - 1);
        loc::record(s.file, s.line, s.col);
    }

    /// Rewind the lexer state only; AST nodes created since the save are
    /// preserved
    pub fn restore_lexer_only(&mut self, cursor: Cursor) {
        let s = self.saved[cursor.0 as usize];
        self.pos = (s.pos as usize).min(self.toks.len() - 1);
    }

    /// Saved cursors are compilation-lifetime; discarding is advisory
    pub fn discard_saved_cursor(&mut self, _cursor: Cursor) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(kind: TokenKind, text: &str) -> Token {
        Token {
            kind,
            text: text.into(),
            line: 1,
            col: 1,
            file: 0,
        }
    }

    #[test]
    fn test_peek_advance() {
        let mut t = Tokens::new(vec![
            tok(TokenKind::Keyword, "int"),
            tok(TokenKind::Ident, "x"),
            tok(TokenKind::Punct, ";"),
        ]);
        assert!(t.peek().is_kw("int"));
        t.advance();
        assert!(t.peek().is("x"));
        assert!(t.peek_ahead(1).is(";"));
        t.advance();
        t.advance();
        assert!(t.at_eof());
        t.advance();
        assert!(t.at_eof());
    }

    #[test]
    fn test_cursor_restore() {
        let mut t = Tokens::new(vec![
            tok(TokenKind::Ident, "a"),
            tok(TokenKind::Ident, "b"),
            tok(TokenKind::Ident, "c"),
        ]);
        t.advance();
        let c = t.save_cursor();
        t.advance();
        assert!(t.peek().is("c"));
        t.restore_lexer_only(c);
        assert!(t.peek().is("b"));
        t.restore_full(c);
        assert!(t.peek().is("b"));
    }
}
