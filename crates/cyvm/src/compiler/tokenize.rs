use crate::compiler::token::{Pos, Token, TokenKind, keyword_kind};
use crate::compiler::{Stage, SyntaxError};

/// Converts source text into tokens, turning leading whitespace into
/// `Indent`/`Dedent` pairs and line ends into `Newline`.
pub struct Tokenizer<'a> {
    source: &'a str,
    offset: usize,
    line: u32,
    col: u32,
    bracket_depth: usize,
    indents: Vec<u32>,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer {
            source,
            offset: 0,
            line: 1,
            col: 1,
            bracket_depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        loop {
            if at_line_start && self.bracket_depth == 0 {
                if !self.lex_indentation()? {
                    break;
                }
                at_line_start = false;
            }

            self.skip_inline_whitespace();

            let Some(ch) = self.current_char() else {
                break;
            };

            match ch {
                '\n' => {
                    let pos = self.pos();
                    self.bump();
                    if self.bracket_depth == 0 {
                        self.push_newline_at(pos);
                        at_line_start = true;
                    }
                }
                '-' if self.peek_char(1) == Some('-') => self.skip_comment(),
                ';' => {
                    let pos = self.pos();
                    self.bump();
                    if self.bracket_depth == 0 {
                        self.push_newline_at(pos);
                    }
                }
                '0'..='9' => self.lex_number()?,
                '\'' | '"' => self.lex_string(ch)?,
                c if c == '_' || c.is_ascii_alphabetic() => self.lex_name(),
                _ => self.lex_symbol(ch)?,
            }
        }

        let pos = self.pos();
        self.push_newline_at(pos);
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens.push(Token::new(TokenKind::Dedent, pos));
        }
        self.tokens.push(Token::new(TokenKind::Eof, pos));
        Ok(self.tokens)
    }

    // ============ Reader ============

    #[inline]
    fn current_char(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }

    #[inline]
    fn peek_char(&self, n: usize) -> Option<char> {
        self.source[self.offset..].chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(ch) = self.current_char() {
            self.offset += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(ch) = self.current_char() {
            if !pred(ch) {
                break;
            }
            self.bump();
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
            offset: self.offset,
        }
    }

    fn error(&self, message: impl Into<String>, pos: Pos) -> SyntaxError {
        SyntaxError::new(Stage::Token, message, pos)
    }

    // ============ Layout ============

    fn skip_inline_whitespace(&mut self) {
        self.eat_while(|ch| ch == ' ' || ch == '\t' || ch == '\r');
    }

    fn skip_comment(&mut self) {
        self.eat_while(|ch| ch != '\n');
    }

    fn push_newline_at(&mut self, pos: Pos) {
        match self.tokens.last() {
            None => {}
            Some(last)
                if matches!(
                    last.kind,
                    TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
                ) => {}
            Some(_) => self.tokens.push(Token::new(TokenKind::Newline, pos)),
        }
    }

    /// Measures the indentation of the next non-blank line and emits the
    /// matching layout tokens. Returns false at end of input.
    fn lex_indentation(&mut self) -> Result<bool, SyntaxError> {
        loop {
            let mut width = 0u32;
            while let Some(ch) = self.current_char() {
                match ch {
                    ' ' => width += 1,
                    '\t' => {
                        return Err(self.error("Tabs are not allowed for indentation.", self.pos()));
                    }
                    '\r' => {}
                    _ => break,
                }
                self.bump();
            }

            match self.current_char() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some('-') if self.peek_char(1) == Some('-') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }

            let pos = self.pos();
            let top = *self.indents.last().unwrap_or(&0);
            if width > top {
                self.indents.push(width);
                self.tokens.push(Token::new(TokenKind::Indent, pos));
            } else if width < top {
                while self.indents.last().is_some_and(|&level| level > width) {
                    self.indents.pop();
                    self.tokens.push(Token::new(TokenKind::Dedent, pos));
                }
                if self.indents.last() != Some(&width) {
                    return Err(self.error(
                        "Dedent does not match any outer indentation level.",
                        pos,
                    ));
                }
            }
            return Ok(true);
        }
    }

    // ============ Tokens ============

    fn lex_number(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos();

        if self.current_char() == Some('0') && matches!(self.peek_char(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits_start = self.offset;
            self.eat_while(|ch| ch.is_ascii_hexdigit());
            if self.offset == digits_start {
                return Err(self.error("Malformed number literal.", start));
            }
        } else {
            self.eat_while(|ch| ch.is_ascii_digit());
            if self.current_char() == Some('.')
                && self.peek_char(1).is_some_and(|ch| ch.is_ascii_digit())
            {
                self.bump();
                self.eat_while(|ch| ch.is_ascii_digit());
            }
            if matches!(self.current_char(), Some('e' | 'E')) {
                self.bump();
                if matches!(self.current_char(), Some('+' | '-')) {
                    self.bump();
                }
                let exp_start = self.offset;
                self.eat_while(|ch| ch.is_ascii_digit());
                if self.offset == exp_start {
                    return Err(self.error("Malformed number literal.", start));
                }
            }
        }

        if self
            .current_char()
            .is_some_and(|ch| ch == '_' || ch.is_ascii_alphanumeric())
        {
            return Err(self.error("Malformed number literal.", start));
        }

        let text = &self.source[start.offset..self.offset];
        self.tokens
            .push(Token::with_text(TokenKind::Number, start, text));
        Ok(())
    }

    fn lex_string(&mut self, quote: char) -> Result<(), SyntaxError> {
        let start = self.pos();
        self.bump();

        let mut value = String::new();
        loop {
            match self.current_char() {
                None | Some('\n') => {
                    return Err(self.error("Unterminated string literal.", start));
                }
                Some('\\') => {
                    let escape_pos = self.pos();
                    self.bump();
                    let escaped = match self.current_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('\'') => '\'',
                        Some('"') => '"',
                        _ => return Err(self.error("Unknown escape sequence.", escape_pos)),
                    };
                    value.push(escaped);
                    self.bump();
                }
                Some(ch) if ch == quote => {
                    self.bump();
                    break;
                }
                Some(ch) => {
                    value.push(ch);
                    self.bump();
                }
            }
        }

        self.tokens
            .push(Token::with_text(TokenKind::String, start, value));
        Ok(())
    }

    fn lex_name(&mut self) {
        let start = self.pos();
        self.eat_while(|ch| ch == '_' || ch.is_ascii_alphanumeric());
        let text = &self.source[start.offset..self.offset];
        let token = match keyword_kind(text) {
            Some(kind) => Token::new(kind, start),
            None => Token::with_text(TokenKind::Name, start, text),
        };
        self.tokens.push(token);
    }

    fn lex_symbol(&mut self, ch: char) -> Result<(), SyntaxError> {
        let start = self.pos();
        let next = self.peek_char(1);
        let (kind, width) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('^', _) => (TokenKind::Caret, 1),
            ('(', _) => (TokenKind::LeftParen, 1),
            (')', _) => (TokenKind::RightParen, 1),
            ('[', _) => (TokenKind::LeftBracket, 1),
            (']', _) => (TokenKind::RightBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('.', _) => (TokenKind::Dot, 1),
            (':', _) => (TokenKind::Colon, 1),
            _ => {
                return Err(self.error(format!("Unknown character `{}`.", ch.escape_default()), start));
            }
        };

        match kind {
            TokenKind::LeftParen | TokenKind::LeftBracket => self.bracket_depth += 1,
            TokenKind::RightParen | TokenKind::RightBracket => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1)
            }
            _ => {}
        }

        for _ in 0..width {
            self.bump();
        }
        self.tokens.push(Token::new(kind, start));
        Ok(())
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Tokenizer::new(source).tokenize()
}
