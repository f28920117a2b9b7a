//! Token types for the Flow lexer

use logos::Logos;

/// The kind of token produced by the lexer
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    // ========== Keywords ==========
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("var")]
    Var,
    #[token("handler")]
    Handler,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,
    #[token("in")]
    In,
    #[token("xor")]
    Xor,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ========== Literals ==========
    /// Integer literal
    #[regex(r"[0-9][0-9_]*")]
    Number,

    /// IPv4 literal (dotted quad)
    #[regex(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+")]
    Ipv4,

    /// IPv6 literal (colon form; validated by the parser)
    #[regex(r"([0-9A-Fa-f]{0,4}:){2,7}[0-9A-Fa-f]{0,4}")]
    Ipv6,

    /// String literal, single or double quoted
    #[regex(r#""(?:\\.|[^"\\])*""#)]
    #[regex(r"'(?:\\.|[^'\\])*'")]
    Str,

    /// Regex literal `/pattern/`; the body may not contain unescaped
    /// whitespace, which keeps `/` available as the division operator
    #[regex(r"/(?:[^ \t\r\n/\\]|\\[^\r\n])+/")]
    Regex,

    /// Identifier, optionally dotted (`req.path`)
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*")]
    Ident,

    // ========== Operators ==========
    #[token("=^")]
    PrefixMatch,
    #[token("=$")]
    SuffixMatch,
    #[token("=~")]
    RegexMatch,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("**")]
    StarStar,
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // ========== Delimiters ==========
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenKind::Import => "'import'",
            TokenKind::From => "'from'",
            TokenKind::Var => "'var'",
            TokenKind::Handler => "'handler'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::Return => "'return'",
            TokenKind::In => "'in'",
            TokenKind::Xor => "'xor'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Number => "number",
            TokenKind::Ipv4 | TokenKind::Ipv6 => "IP address",
            TokenKind::Str => "string",
            TokenKind::Regex => "regex",
            TokenKind::Ident => "identifier",
            TokenKind::PrefixMatch => "'=^'",
            TokenKind::SuffixMatch => "'=$'",
            TokenKind::RegexMatch => "'=~'",
            TokenKind::EqEq => "'=='",
            TokenKind::BangEq => "'!='",
            TokenKind::LtEq => "'<='",
            TokenKind::GtEq => "'>='",
            TokenKind::AmpAmp => "'&&'",
            TokenKind::PipePipe => "'||'",
            TokenKind::StarStar => "'**'",
            TokenKind::Eq => "'='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::Bang => "'!'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
        };
        f.write_str(s)
    }
}
