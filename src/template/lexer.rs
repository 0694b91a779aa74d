use crate::ArcStr;
use crate::error::PanError;
use crate::template::SourceRange;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(ArcStr),
    Str(ArcStr),
    Long(i64),
    Double(f64),
    /// Unquoted absolute path at the start of a statement.
    Path(ArcStr),
    /// Template name following the `template` keyword.
    Name(ArcStr),
    Punct(&'static str),
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) | TokenKind::Path(s) | TokenKind::Name(s) => format!("'{s}'"),
            TokenKind::Str(s) => format!("string '{s}'"),
            TokenKind::Long(v) => v.to_string(),
            TokenKind::Double(v) => v.to_string(),
            TokenKind::Punct(p) => format!("'{p}'"),
            TokenKind::Eof => String::from("end of file"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub range: SourceRange,
    /// `#@` comments directly before the token.
    pub doc: Option<String>,
}

const PUNCTS: [&str; 25] = [
    "?=", "==", "!=", "<=", ">=", "&&", "||", "=", "<", ">", "+", "-", "*", "/", "%", "!", "(",
    ")", "[", "]", "{", "}", ";", ",", ":",
];

/// On-demand tokenizer. Tokens are produced one at a time so that reading a
/// template header never scans the whole file.
pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
    last: (u32, u32),
    prev: Option<TokenKind>,
    doc: Vec<String>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Lexer {
            src,
            pos: 0,
            line: 1,
            column: 1,
            last: (1, 0),
            prev: None,
            doc: Vec::new(),
        }
    }

    /// Documentation comments seen since the last call.
    fn take_doc(&mut self) -> Option<String> {
        if self.doc.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.doc).join("\n"))
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        self.last = (self.line, self.column);
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &src[start..self.pos]
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    let comment = self.bump_while(|c| c != '\n');
                    if let Some(text) = comment.strip_prefix("#@") {
                        self.doc.push(text.trim().to_string());
                    }
                }
                _ => return,
            }
        }
    }

    fn expects_path(&self) -> bool {
        match &self.prev {
            None => true,
            Some(TokenKind::Punct(";")) => true,
            Some(TokenKind::Ident(word)) => matches!(&**word, "final" | "bind"),
            _ => false,
        }
    }

    fn expects_name(&self) -> bool {
        matches!(&self.prev, Some(TokenKind::Ident(word)) if &**word == "template")
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, PanError> {
        self.skip_trivia();
        let doc = self.take_doc();
        let begin = (self.line, self.column);

        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some('/') if self.expects_path() => {
                let path = self.bump_while(|c| !c.is_whitespace() && !matches!(c, '=' | '?' | ';'));
                TokenKind::Path(ArcStr::from(path))
            }
            Some(_) if self.expects_name() => {
                let name = self.bump_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '/' | '+' | '-'));
                if name.is_empty() {
                    return Err(self.error(begin, "expected template name"));
                }
                TokenKind::Name(ArcStr::from(name))
            }
            Some('\'') => self.single_quoted(begin)?,
            Some('"') => self.double_quoted(begin)?,
            Some(c) if c.is_ascii_digit() => self.number(begin)?,
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.bump_while(|c| c.is_alphanumeric() || c == '_');
                TokenKind::Ident(ArcStr::from(ident))
            }
            Some(c) => {
                let rest = &self.src[self.pos..];
                let Some(punct) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
                    self.bump();
                    return Err(self.error(begin, &format!("unexpected character '{c}'")));
                };
                for _ in 0..punct.len() {
                    self.bump();
                }
                TokenKind::Punct(punct)
            }
        };

        let range = self.range_from(begin);
        self.prev = Some(kind.clone());
        Ok(Token { kind, range, doc })
    }

    fn range_from(&self, begin: (u32, u32)) -> SourceRange {
        let (end_line, end_column) = if self.last < begin { begin } else { self.last };
        SourceRange::new(begin.0, begin.1, end_line, end_column)
    }

    fn error(&self, begin: (u32, u32), message: &str) -> PanError {
        PanError::syntax(message, Some(self.range_from(begin)))
    }

    fn single_quoted(&mut self, begin: (u32, u32)) -> Result<TokenKind, PanError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.bump();
                    out.push('\'');
                }
                Some('\'') => return Ok(TokenKind::Str(ArcStr::from(out))),
                Some(c) => out.push(c),
                None => return Err(self.error(begin, "unterminated string")),
            }
        }
    }

    fn double_quoted(&mut self, begin: (u32, u32)) -> Result<TokenKind, PanError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(ArcStr::from(out))),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(c) => {
                        return Err(self.error(begin, &format!("invalid escape sequence '\\{c}'")));
                    }
                    None => return Err(self.error(begin, "unterminated string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error(begin, "unterminated string")),
            }
        }
    }

    fn number(&mut self, begin: (u32, u32)) -> Result<TokenKind, PanError> {
        let start = self.pos;

        if self.peek() == Some('0') && matches!(self.peek_second(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits = self.bump_while(|c| c.is_ascii_hexdigit());
            return i64::from_str_radix(digits, 16)
                .map(TokenKind::Long)
                .map_err(|_| self.error(begin, "invalid hexadecimal literal"));
        }

        self.bump_while(|c| c.is_ascii_digit());
        let mut double = false;
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            double = true;
            self.bump();
            self.bump_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            double = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.bump_while(|c| c.is_ascii_digit());
        }

        let text = &self.src[start..self.pos];
        if double {
            text.parse()
                .map(TokenKind::Double)
                .map_err(|_| self.error(begin, &format!("invalid number '{text}'")))
        } else if text.len() > 1 && text.starts_with('0') {
            i64::from_str_radix(&text[1..], 8)
                .map(TokenKind::Long)
                .map_err(|_| self.error(begin, &format!("invalid octal literal '{text}'")))
        } else {
            text.parse()
                .map(TokenKind::Long)
                .map_err(|_| self.error(begin, &format!("invalid number '{text}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_header_tokens() {
        let tokens = kinds("object template site/node-1.example;");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("object".into()),
                TokenKind::Ident("template".into()),
                TokenKind::Name("site/node-1.example".into()),
                TokenKind::Punct(";"),
            ]
        );
    }

    #[test]
    fn test_bare_path_only_at_statement_start() {
        let tokens = kinds("/a/b = 4 / 2;");
        assert_eq!(tokens[0], TokenKind::Path("/a/b".into()));
        assert_eq!(tokens[3], TokenKind::Punct("/"));
    }

    #[test]
    fn test_literals() {
        let tokens = kinds(r#"'it''s' "a\tb" 0x1F 017 12 1.5 2e3"#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\tb".into()),
                TokenKind::Long(31),
                TokenKind::Long(15),
                TokenKind::Long(12),
                TokenKind::Double(1.5),
                TokenKind::Double(2000.0),
            ]
        );
    }

    #[test]
    fn test_doc_comments_and_ranges() {
        let mut lexer = Lexer::new("# plain\n#@ first\n#@ second\n  x");
        let token = lexer.next_token().unwrap();
        assert_eq!(token.range, SourceRange::new(4, 3, 4, 3));
        assert_eq!(token.doc.as_deref(), Some("first\nsecond"));
        assert_eq!(lexer.next_token().unwrap().doc, None);
    }

    #[test]
    fn test_errors() {
        assert!(Lexer::new("'open").next_token().is_err());
        assert!(Lexer::new("\"bad \\q\"").next_token().is_err());
        assert!(Lexer::new("x = 09").next_token().is_ok());
        let mut lexer = Lexer::new("09");
        lexer.prev = Some(TokenKind::Punct("="));
        assert!(lexer.next_token().is_err());
    }
}
