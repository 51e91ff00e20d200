use crate::lang::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    As,
    Break,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    False,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    None,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    True,
    Try,
    While,
}

impl Keyword {
    pub(crate) fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident {
            "and" => Self::And,
            "as" => Self::As,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "def" => Self::Def,
            "del" => Self::Del,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "except" => Self::Except,
            "False" => Self::False,
            "finally" => Self::Finally,
            "for" => Self::For,
            "from" => Self::From,
            "global" => Self::Global,
            "if" => Self::If,
            "import" => Self::Import,
            "in" => Self::In,
            "is" => Self::Is,
            "None" => Self::None,
            "not" => Self::Not,
            "or" => Self::Or,
            "pass" => Self::Pass,
            "raise" => Self::Raise,
            "return" => Self::Return,
            "True" => Self::True,
            "try" => Self::Try,
            "while" => Self::While,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed, braces untouched.
    FStr(String),
    Keyword(Keyword),
    Op(Op),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    // Bracket nesting; newlines inside brackets are not significant.
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn push_newline(&mut self) {
        let needs = matches!(
            self.tokens.last(),
            Some(tok) if !matches!(tok.kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        );
        if needs {
            self.push(TokenKind::Newline, self.line);
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        loop {
            if self.at_line_start && self.depth == 0 && !self.indentation()? {
                continue;
            }
            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' => {
                    let line = self.line;
                    self.bump();
                    if self.depth == 0 {
                        if !matches!(self.tokens.last(), Some(t) if t.kind == TokenKind::Newline) {
                            self.push(TokenKind::Newline, line);
                        }
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.peek() != Some('\n') {
                        return Err(SyntaxError::new(
                            "unexpected character after line continuation character",
                            self.line,
                        ));
                    }
                    self.bump();
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.lex_number()?
                }
                c if is_ident_start(c) => self.lex_name()?,
                '"' | '\'' => self.lex_string(false, false)?,
                _ => self.lex_op()?,
            }
        }

        if self.depth > 0 {
            return Err(SyntaxError::new(
                "unexpected EOF while parsing (unclosed bracket)",
                self.line,
            ));
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.line);
        }
        self.push(TokenKind::Eof, self.line);
        Ok(self.tokens)
    }

    /// Handles leading whitespace of a logical line. Returns `false` when the
    /// line was blank (or comment-only) and has been consumed entirely.
    fn indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0usize;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }
        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(false);
            }
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.bump();
                self.bump();
                return Ok(false);
            }
            Some(_) => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.line);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(SyntaxError::indentation(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_number(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(ch) = self.peek() {
                    if ch.is_digit(radix) {
                        digits.push(ch);
                    } else if ch != '_' {
                        break;
                    }
                    self.bump();
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| SyntaxError::new("invalid integer literal", line))?;
                self.push(TokenKind::Int(value), line);
                return Ok(());
            }
        }

        let mut buf = String::new();
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                buf.push(ch);
            } else if ch == '_' {
                // digit separator
            } else if ch == '.' && !is_float {
                is_float = true;
                buf.push(ch);
            } else if (ch == 'e' || ch == 'E')
                && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
            {
                is_float = true;
                buf.push('e');
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    buf.push(sign);
                    self.bump();
                }
                continue;
            } else {
                break;
            }
            self.bump();
        }

        if is_float {
            let value = buf
                .parse::<f64>()
                .map_err(|_| SyntaxError::new(format!("invalid number literal `{buf}`"), line))?;
            self.push(TokenKind::Float(value), line);
        } else {
            let value = buf
                .parse::<i64>()
                .map_err(|_| SyntaxError::new("integer literal too large", line))?;
            self.push(TokenKind::Int(value), line);
        }
        Ok(())
    }

    fn lex_name(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                buf.push(ch);
                self.bump();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = buf.to_ascii_lowercase();
            match lower.as_str() {
                "f" => return self.lex_string(false, true),
                "r" => return self.lex_string(true, false),
                "rf" | "fr" => return self.lex_string(true, true),
                _ => {}
            }
        }

        let kind = match Keyword::from_ident(&buf) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(buf),
        };
        self.push(kind, line);
        Ok(())
    }

    fn lex_string(&mut self, raw: bool, fstring: bool) -> Result<(), SyntaxError> {
        let line = self.line;
        let Some(quote) = self.bump() else {
            return Err(SyntaxError::new("unterminated string literal", line));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut buf = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(SyntaxError::new("unterminated string literal", line));
            };
            if ch == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                buf.push(ch);
                continue;
            }
            if ch == '\n' && !triple {
                return Err(SyntaxError::new("unterminated string literal", line));
            }
            if ch != '\\' {
                buf.push(ch);
                continue;
            }

            let Some(next) = self.bump() else {
                return Err(SyntaxError::new("unterminated string literal", line));
            };
            if raw {
                buf.push('\\');
                buf.push(next);
                continue;
            }
            match next {
                'n' => buf.push('\n'),
                't' => buf.push('\t'),
                'r' => buf.push('\r'),
                '0' => buf.push('\0'),
                '\\' => buf.push('\\'),
                '\'' => buf.push('\''),
                '"' => buf.push('"'),
                '\n' => {}
                other => {
                    buf.push('\\');
                    buf.push(other);
                }
            }
        }

        let kind = if fstring {
            TokenKind::FStr(buf)
        } else {
            TokenKind::Str(buf)
        };
        self.push(kind, line);
        Ok(())
    }

    fn lex_op(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        let c0 = self.peek().unwrap_or('\0');
        let c1 = self.peek_at(1).unwrap_or('\0');
        let c2 = self.peek_at(2).unwrap_or('\0');

        let (op, len) = match (c0, c1, c2) {
            ('/', '/', '=') => (Op::DoubleSlashEq, 3),
            ('*', '*', '=') => (Op::DoubleStarEq, 3),
            ('*', '*', _) => (Op::DoubleStar, 2),
            ('/', '/', _) => (Op::DoubleSlash, 2),
            ('=', '=', _) => (Op::EqEq, 2),
            ('!', '=', _) => (Op::NotEq, 2),
            ('<', '=', _) => (Op::Le, 2),
            ('>', '=', _) => (Op::Ge, 2),
            ('+', '=', _) => (Op::PlusEq, 2),
            ('-', '=', _) => (Op::MinusEq, 2),
            ('*', '=', _) => (Op::StarEq, 2),
            ('/', '=', _) => (Op::SlashEq, 2),
            ('%', '=', _) => (Op::PercentEq, 2),
            ('(', _, _) => (Op::LParen, 1),
            (')', _, _) => (Op::RParen, 1),
            ('[', _, _) => (Op::LBracket, 1),
            (']', _, _) => (Op::RBracket, 1),
            ('{', _, _) => (Op::LBrace, 1),
            ('}', _, _) => (Op::RBrace, 1),
            (',', _, _) => (Op::Comma, 1),
            (':', _, _) => (Op::Colon, 1),
            (';', _, _) => (Op::Semicolon, 1),
            ('.', _, _) => (Op::Dot, 1),
            ('=', _, _) => (Op::Assign, 1),
            ('+', _, _) => (Op::Plus, 1),
            ('-', _, _) => (Op::Minus, 1),
            ('*', _, _) => (Op::Star, 1),
            ('/', _, _) => (Op::Slash, 1),
            ('%', _, _) => (Op::Percent, 1),
            ('<', _, _) => (Op::Lt, 1),
            ('>', _, _) => (Op::Gt, 1),
            _ => {
                return Err(SyntaxError::new(
                    format!("invalid character '{c0}'"),
                    line,
                ))
            }
        };

        match op {
            Op::LParen | Op::LBracket | Op::LBrace => self.depth += 1,
            Op::RParen | Op::RBracket | Op::RBrace => {
                if self.depth == 0 {
                    return Err(SyntaxError::new(format!("unmatched '{c0}'"), line));
                }
                self.depth -= 1;
            }
            _ => {}
        }

        for _ in 0..len {
            self.bump();
        }
        self.push(TokenKind::Op(op), line);
        Ok(())
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn emits_indent_and_dedent_around_blocks() {
        let toks = kinds("if x:\n    y = 1\nz\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn blank_and_comment_lines_do_not_change_indentation() {
        let toks = kinds("def f():\n\n    # note\n    return 1\n");
        let indents = toks.iter().filter(|t| **t == TokenKind::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn lexes_numbers_and_strings() {
        assert_eq!(
            kinds("1_000 2.5 1e3 0x1f 'a\\nb' f\"{x}\""),
            vec![
                TokenKind::Int(1000),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Int(31),
                TokenKind::Str("a\nb".into()),
                TokenKind::FStr("{x}".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_bad_dedent() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert!(err.indentation);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("'abc\n").is_err());
    }
}
