use smol_str::SmolStr;

/// Source position (1-based line and column, byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals and names
    Number,
    String,
    Name,

    // Keywords
    Import,
    Var,
    Func,
    Return,
    If,
    Else,
    While,
    Break,
    Pass,
    And,
    Or,
    Not,
    True,
    False,
    None,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Name => "identifier",
            TokenKind::Import => "`import`",
            TokenKind::Var => "`var`",
            TokenKind::Func => "`func`",
            TokenKind::Return => "`return`",
            TokenKind::If => "`if`",
            TokenKind::Else => "`else`",
            TokenKind::While => "`while`",
            TokenKind::Break => "`break`",
            TokenKind::Pass => "`pass`",
            TokenKind::And => "`and`",
            TokenKind::Or => "`or`",
            TokenKind::Not => "`not`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::None => "`none`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Caret => "`^`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::Le => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::Ge => "`>=`",
            TokenKind::Assign => "`=`",
            TokenKind::LeftParen => "`(`",
            TokenKind::RightParen => "`)`",
            TokenKind::LeftBracket => "`[`",
            TokenKind::RightBracket => "`]`",
            TokenKind::Comma => "`,`",
            TokenKind::Dot => "`.`",
            TokenKind::Colon => "`:`",
            TokenKind::Newline => "end of line",
            TokenKind::Indent => "indentation",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "end of input",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
    /// Name text, unescaped string contents or number text.
    pub text: SmolStr,
}

impl Token {
    pub fn new(kind: TokenKind, pos: Pos) -> Self {
        Token {
            kind,
            pos,
            text: SmolStr::default(),
        }
    }

    pub fn with_text(kind: TokenKind, pos: Pos, text: impl Into<SmolStr>) -> Self {
        Token {
            kind,
            pos,
            text: text.into(),
        }
    }
}

pub(crate) fn keyword_kind(name: &str) -> Option<TokenKind> {
    let kind = match name {
        "import" => TokenKind::Import,
        "var" => TokenKind::Var,
        "func" => TokenKind::Func,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "break" => TokenKind::Break,
        "pass" => TokenKind::Pass,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "none" => TokenKind::None,
        _ => return None,
    };
    Some(kind)
}
