use std::fmt;

/// A token of the IR textual form.
///
/// Operation mnemonics and type heads are ordinary identifiers; the parser
/// matches them by spelling, so the token set stays closed while the
/// grammar grows.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    Ident(String),
    Int(i64),
    Float(f64),
    /// `%name` — an SSA value reference or binding.
    ValueName(String),
    /// `@name` — a routine symbol.
    SymbolName(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    Comma,
    Colon,
    Equal,
    Arrow,
    Minus,
    Question,
    Eof,
}

impl fmt::Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lexeme::Ident(name) => write!(f, "{}", name),
            Lexeme::Int(value) => write!(f, "{}", value),
            Lexeme::Float(value) => write!(f, "{}", value),
            Lexeme::ValueName(name) => write!(f, "%{}", name),
            Lexeme::SymbolName(name) => write!(f, "@{}", name),
            Lexeme::LParen => write!(f, "("),
            Lexeme::RParen => write!(f, ")"),
            Lexeme::LBrace => write!(f, "{{"),
            Lexeme::RBrace => write!(f, "}}"),
            Lexeme::LBracket => write!(f, "["),
            Lexeme::RBracket => write!(f, "]"),
            Lexeme::LAngle => write!(f, "<"),
            Lexeme::RAngle => write!(f, ">"),
            Lexeme::Comma => write!(f, ","),
            Lexeme::Colon => write!(f, ":"),
            Lexeme::Equal => write!(f, "="),
            Lexeme::Arrow => write!(f, "->"),
            Lexeme::Minus => write!(f, "-"),
            Lexeme::Question => write!(f, "?"),
            Lexeme::Eof => write!(f, "<eof>"),
        }
    }
}
