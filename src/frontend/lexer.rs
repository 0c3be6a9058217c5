use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{Display, EnumString};

use crate::frontend::{
    SourceFile,
    location::{Position, Range},
};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    line: usize,
    column: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
    errors: Vec<(Range, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // class
    LowerIdentifier,  // main
    UpperIdentifier,  // Main
    Underscore,       // _

    /* Literals */
    BooleanLiteral, // true
    IntegerLiteral, // 1
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon,       // :
    DoubleColon, // ::
    Arrow,       // ->
    Dot,         // .
    Bar,         // |
    Equals,      // =

    /* Unary Ops */
    Bang, // !

    /* Unary + Binary Ops */
    Minus, // -

    /* Binary Ops */
    Asterisk,             // *
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Anything the lexer could not make sense of */
    Unknown,
}

impl TokenKind {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::NotEquals
                | Self::DoubleEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_unary_operator(&self) -> bool {
        matches!(self, Self::Bang | Self::Minus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "camelCase")]
pub enum Keyword {
    Import,
    From,
    Class,
    Val,
    Function,
    Method,
    Private,
    If,
    Then,
    Else,
    Match,
    This,
    As,
    Panic,
    Println,
    IntToString,
    StringToInt,
    Unit,
    Bool,
    Int,
    String,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        ('!', TokenKind::Bang),
        (':', TokenKind::Colon),
        ('.', TokenKind::Dot),
        ('|', TokenKind::Bar),
        ('*', TokenKind::Asterisk),
        ('-', TokenKind::Minus),
        ('=', TokenKind::Equals),
        ('+', TokenKind::Plus),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

/// Byte offsets into the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            line: 0,
            column: 0,
            peek_buffer: VecDeque::new(),
            errors: Vec::new(),
        }
    }

    pub fn source(&self) -> &SourceFile {
        self.source
    }

    /// Position just after the last consumed character
    pub fn current_position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    /// Errors found while scanning, drained by the parser when it finishes
    pub fn take_errors(&mut self) -> Vec<(Range, String)> {
        std::mem::take(&mut self.errors)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();

        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }

        Some(c)
    }

    fn ignore_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn ignore_line(&mut self) {
        while self.chars.peek().is_some_and(|c| *c != '\n') {
            self.advance();
        }
    }

    fn ignore_block_comment(&mut self) {
        let start = self.current_position();

        // Consume the opening `/*`
        self.advance();
        self.advance();

        loop {
            match self.advance() {
                Some('*') if self.chars.peek().is_some_and(|c| *c == '/') => {
                    self.advance();
                    return;
                }
                Some(_) => {}
                None => {
                    self.errors.push((
                        Range::new(start, self.current_position()),
                        "Unterminated block comment.".into(),
                    ));
                    return;
                }
            }
        }
    }

    fn read_string(&mut self) -> Token {
        let start_position = self.position;
        let start = self.current_position();

        // Consume opening quote
        self.advance();

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.advance();

            // If we encountered an escape sequence, keep going
            if c == '\\' && self.chars.peek().is_some_and(|c| *c != '\n') {
                self.advance();
                continue;
            }

            if c == '"' {
                return self.new_token(TokenKind::StringLiteral, start_position, start);
            }
        }

        let token = self.new_token(TokenKind::StringLiteral, start_position, start);
        self.errors
            .push((token.range, "Unterminated string literal.".into()));
        token
    }

    // Keyword, identifier, or boolean literal
    fn read_word(&mut self) -> Token {
        let start_position = self.position;
        let start = self.current_position();

        while self
            .chars
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            self.advance();
        }

        let value = &self.source.contents[start_position..self.position];

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            match value {
                "true" | "false" => TokenKind::BooleanLiteral,
                "_" => TokenKind::Underscore,
                v if v.starts_with(|c: char| c.is_ascii_lowercase()) => TokenKind::LowerIdentifier,
                v if v.starts_with(|c: char| c.is_ascii_uppercase()) => TokenKind::UpperIdentifier,
                _ => TokenKind::Unknown,
            }
        };

        self.new_token(kind, start_position, start)
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let start = self.current_position();

        while self.chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        self.new_token(TokenKind::IntegerLiteral, start_position, start)
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let start = self.current_position();

        self.advance();

        self.new_token(kind, start_position, start)
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;
        let start = self.current_position();

        self.advance();
        self.advance();

        self.new_token(kind, start_position, start)
    }

    fn new_token(&self, kind: TokenKind, start_position: usize, start: Position) -> Token {
        Token {
            kind,
            span: Span {
                start: start_position,
                end: self.position,
            },
            range: Range::new(start, self.current_position()),
        }
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.peek_nth(0)
    }

    /// Looks `n` tokens ahead without consuming anything
    pub fn peek_nth(&mut self, n: usize) -> Option<Token> {
        while self.peek_buffer.len() <= n {
            let token = self.scan()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(n).copied()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.scan()
    }

    fn scan(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '/') => {
                    self.ignore_line();
                    continue;
                }
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '*') => {
                    self.ignore_block_comment();
                    continue;
                }

                // String literals
                '"' => self.read_string(),

                // Integer literals
                n if n.is_ascii_digit() => self.read_number(),

                // Identifiers, keywords, and boolean literals
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                // Arrow (->)
                '-' if self.chars.peek_nth(1).is_some_and(|c| *c == '>') => {
                    self.read_double(TokenKind::Arrow)
                }
                // Double colon (::)
                ':' if self.chars.peek_nth(1).is_some_and(|c| *c == ':') => {
                    self.read_double(TokenKind::DoubleColon)
                }

                // Double Equals (==)
                '=' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                // Not Equals (!=)
                '!' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                // Less than or equal (<=)
                '<' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                // Greater than or equal (>=)
                '>' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }

                // Logical And (&&)
                '&' if self.chars.peek_nth(1).is_some_and(|c| *c == '&') => {
                    self.read_double(TokenKind::LogicalAnd)
                }
                // Logical Or (||)
                '|' if self.chars.peek_nth(1).is_some_and(|c| *c == '|') => {
                    self.read_double(TokenKind::LogicalOr)
                }

                s => match SINGLE_TOKENS.get(&s) {
                    Some(kind) => self.read_single(*kind),
                    None => {
                        let token = self.read_single(TokenKind::Unknown);
                        self.errors
                            .push((token.range, format!("Unexpected character `{s}`.")));
                        continue;
                    }
                },
            };

            return Some(token);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFileOrigin;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = SourceFile {
            contents: text.into(),
            origin: SourceFileOrigin::Memory,
        };
        let mut lexer = Lexer::new(&source);
        std::iter::from_fn(|| lexer.next()).map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_class_header() {
        assert_eq!(
            kinds("private class Main<T>(val a: int)"),
            vec![
                TokenKind::Keyword(Keyword::Private),
                TokenKind::Keyword(Keyword::Class),
                TokenKind::UpperIdentifier,
                TokenKind::LessThan,
                TokenKind::UpperIdentifier,
                TokenKind::GreaterThan,
                TokenKind::OpenParen,
                TokenKind::Keyword(Keyword::Val),
                TokenKind::LowerIdentifier,
                TokenKind::Colon,
                TokenKind::Keyword(Keyword::Int),
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn lexes_operators_and_skips_comments() {
        assert_eq!(
            kinds("a::b // trailing\n /* block */ -> || && <= _ intToString"),
            vec![
                TokenKind::LowerIdentifier,
                TokenKind::DoubleColon,
                TokenKind::LowerIdentifier,
                TokenKind::Arrow,
                TokenKind::LogicalOr,
                TokenKind::LogicalAnd,
                TokenKind::LessThanOrEqualTo,
                TokenKind::Underscore,
                TokenKind::Keyword(Keyword::IntToString),
            ]
        );
    }

    #[test]
    fn tracks_token_ranges() {
        let source = SourceFile {
            contents: "a\n  \"s\\\"\"".into(),
            origin: SourceFileOrigin::Memory,
        };
        let mut lexer = Lexer::new(&source);

        lexer.next();
        let string = lexer.next().unwrap();

        assert_eq!(string.kind, TokenKind::StringLiteral);
        assert_eq!(string.range.start, Position::new(1, 2));
        assert_eq!(string.range.end, Position::new(1, 7));
        assert!(lexer.take_errors().is_empty());
    }
}
