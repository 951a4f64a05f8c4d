//=====================================================
// File: tokenizer/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata lexer
// Objective: Turn UTF-8 source into positioned tokens while tracking the
//            active syntax level through a mode stack
//=====================================================

pub mod tables;
pub mod token;

use thiserror::Error;

pub use token::{
    InterpolationPart, MathSymbol, NumberLiteral, NumericSuffix, Position, SyntaxLevel, Token,
    TokenKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {reason}")]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

/// Tokenizes a whole source file.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Tokenizer::new(source).tokenize()
}

#[derive(Debug, Clone, Copy)]
struct Mode {
    level: SyntaxLevel,
    /// Mode is dropped once the brace depth falls below this value.
    min_depth: usize,
    scoped: bool,
}

/// Tokenizer for Strata source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    depth: usize,
    modes: Vec<Mode>,
    pending_doc: Option<String>,
    last_kind: Option<TokenKind>,
    origin: Position,
    initial_level: SyntaxLevel,
    finished: bool,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self::with_origin(input, SyntaxLevel::Medium, Position::new(1, 1, 0))
    }

    /// Tokenizer whose positions start at `origin`, used for embedded
    /// interpolation expressions.
    fn with_origin(input: &str, level: SyntaxLevel, origin: Position) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: origin.line,
            column: origin.column,
            depth: 0,
            modes: vec![Mode {
                level,
                min_depth: 0,
                scoped: false,
            }],
            pending_doc: None,
            last_kind: None,
            origin,
            initial_level: level,
            finished: false,
        }
    }

    /// Restarts tokenization from the beginning of the input.
    pub fn reset(&mut self) {
        self.position = 0;
        self.line = self.origin.line;
        self.column = self.origin.column;
        self.depth = 0;
        self.modes.truncate(1);
        self.modes[0].level = self.initial_level;
        self.pending_doc = None;
        self.last_kind = None;
        self.finished = false;
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        for token in self.by_ref() {
            tokens.push(token?);
        }
        tracing::debug!(count = tokens.len(), "tokenized source");
        Ok(tokens)
    }

    fn level(&self) -> SyntaxLevel {
        self.modes
            .last()
            .map(|mode| mode.level)
            .unwrap_or(SyntaxLevel::Medium)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input.get(self.position).copied().unwrap_or('\0')
    }

    fn peek_char(&self, distance: usize) -> char {
        self.input
            .get(self.position + distance)
            .copied()
            .unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.current_char();
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.origin.offset + self.position)
    }

    fn error_at(&self, position: Position, reason: impl Into<String>) -> LexError {
        LexError {
            line: position.line,
            column: position.column,
            reason: reason.into(),
        }
    }

    fn lexeme_from(&self, start: usize) -> String {
        self.input[start..self.position].iter().collect()
    }

    fn make_token(&mut self, kind: TokenKind, start: usize, position: Position) -> Token {
        let mut token = Token::new(kind, self.lexeme_from(start), position, self.level());
        token.doc = self.pending_doc.take();
        self.last_kind = Some(token.kind.clone());
        token
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(newline) = self.skip_trivia()? {
            return Ok(newline);
        }
        let start = self.position;
        let position = self.current_position();
        if self.is_at_end() {
            self.finished = true;
            return Ok(self.make_token(TokenKind::Eof, start, position));
        }

        let ch = self.current_char();
        if let Some(symbol) = MathSymbol::from_char(ch) {
            self.advance();
            return Ok(self.make_token(TokenKind::MathSymbol(symbol), start, position));
        }
        if ch == '@' {
            return self.lex_at(start, position);
        }
        if ch == '$' && self.peek_char(1) == '"' {
            self.advance();
            let parts = self.lex_interpolated(position)?;
            return Ok(self.make_token(TokenKind::InterpolatedString(parts), start, position));
        }
        if ch == '"' {
            let text = if self.peek_char(1) == '"' && self.peek_char(2) == '"' {
                self.lex_triple_quoted(position)?
            } else {
                self.lex_string(position)?
            };
            return Ok(self.make_token(TokenKind::Str(text), start, position));
        }
        if ch == '\'' {
            let value = self.lex_char(position)?;
            return Ok(self.make_token(TokenKind::Char(value), start, position));
        }
        if ch.is_ascii_digit() {
            let literal = self.lex_number(position)?;
            return Ok(self.make_token(TokenKind::Number(literal), start, position));
        }
        if ch.is_alphabetic() || ch == '_' {
            let kind = self.lex_word();
            return Ok(self.make_token(kind, start, position));
        }
        let kind = self.lex_operator(position)?;
        match kind {
            TokenKind::LeftBrace => self.depth += 1,
            TokenKind::RightBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        let token = self.make_token(kind, start, position);
        if token.kind == TokenKind::RightBrace {
            while self.modes.len() > 1
                && self.modes.last().is_some_and(|mode| mode.min_depth > self.depth)
            {
                self.modes.pop();
            }
        }
        Ok(token)
    }

    /// Skips whitespace and comments. Inside assembly a line break becomes a
    /// `Newline` token.
    fn skip_trivia(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            let ch = self.current_char();
            if self.is_at_end() {
                return Ok(None);
            }
            if ch == '\n' && self.level().is_asm() {
                let start = self.position;
                let position = self.current_position();
                self.advance();
                if !matches!(
                    self.last_kind,
                    Some(TokenKind::Newline) | Some(TokenKind::LeftBrace) | None
                ) {
                    return Ok(Some(self.make_token(TokenKind::Newline, start, position)));
                }
                continue;
            }
            if ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '/' && self.peek_char(1) == '/' {
                let is_doc = self.peek_char(2) == '/' && self.peek_char(3) != '/';
                let mut text = String::new();
                while !self.is_at_end() && self.current_char() != '\n' {
                    text.push(self.advance());
                }
                if is_doc {
                    let line = text.trim_start_matches('/').trim().to_string();
                    match &mut self.pending_doc {
                        Some(doc) => {
                            doc.push('\n');
                            doc.push_str(&line);
                        }
                        None => self.pending_doc = Some(line),
                    }
                }
                continue;
            }
            if ch == '/' && self.peek_char(1) == '*' {
                self.skip_block_comment()?;
                continue;
            }
            return Ok(None);
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let position = self.current_position();
        self.advance();
        self.advance();
        let mut nesting = 1;
        while nesting > 0 {
            if self.is_at_end() {
                return Err(self.error_at(position, "unterminated block comment"));
            }
            if self.current_char() == '/' && self.peek_char(1) == '*' {
                self.advance();
                self.advance();
                nesting += 1;
            } else if self.current_char() == '*' && self.peek_char(1) == '/' {
                self.advance();
                self.advance();
                nesting -= 1;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    /// `@level` markers and `@"verbatim"` strings.
    fn lex_at(&mut self, start: usize, position: Position) -> Result<Token, LexError> {
        if self.peek_char(1) == '"' {
            self.advance();
            let text = self.lex_verbatim(position)?;
            return Ok(self.make_token(TokenKind::Str(text), start, position));
        }
        self.advance();
        let mut name = String::new();
        while self.current_char().is_alphanumeric() || self.current_char() == '_' {
            name.push(self.advance());
        }
        let mut level = tables::level_from_marker(&name)
            .ok_or_else(|| self.error_at(position, format!("unknown syntax level marker '@{name}'")))?;
        if level == SyntaxLevel::Asm {
            let save = (self.position, self.line, self.column);
            while self.current_char() == ' ' || self.current_char() == '\t' {
                self.advance();
            }
            let mut word = String::new();
            while self.current_char().is_alphanumeric() {
                word.push(self.advance());
            }
            if word == "spirv" {
                level = SyntaxLevel::AsmSpirv;
            } else {
                (self.position, self.line, self.column) = save;
            }
        }
        let token = self.make_token(TokenKind::LevelMarker(level), start, position);

        let mut lookahead = self.position;
        while self.input.get(lookahead).is_some_and(|c| c.is_whitespace()) {
            lookahead += 1;
        }
        let scoped = self.input.get(lookahead) == Some(&'{');
        if scoped {
            self.modes.push(Mode {
                level,
                min_depth: self.depth + 1,
                scoped: true,
            });
        } else {
            if let Some(top) = self.modes.last() {
                if !top.scoped && top.min_depth == self.depth && self.modes.len() > 1 {
                    self.modes.pop();
                }
            }
            self.modes.push(Mode {
                level,
                min_depth: self.depth,
                scoped: false,
            });
        }
        let mut token = token;
        token.level = level;
        Ok(token)
    }

    fn read_escape(&mut self, position: Position) -> Result<char, LexError> {
        let escape_position = self.current_position();
        self.advance();
        if self.is_at_end() {
            return Err(self.error_at(position, "unterminated string literal"));
        }
        let ch = self.advance();
        let value = match ch {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            'u' => {
                let mut digits = String::new();
                if self.current_char() == '{' {
                    self.advance();
                    while self.current_char().is_ascii_hexdigit() {
                        digits.push(self.advance());
                    }
                    if self.current_char() != '}' || digits.is_empty() || digits.len() > 6 {
                        return Err(self.error_at(escape_position, "invalid unicode escape"));
                    }
                    self.advance();
                } else {
                    for _ in 0..4 {
                        if !self.current_char().is_ascii_hexdigit() {
                            return Err(self.error_at(escape_position, "invalid unicode escape"));
                        }
                        digits.push(self.advance());
                    }
                }
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error_at(escape_position, "invalid unicode scalar value"))?
            }
            other => {
                return Err(self.error_at(escape_position, format!("invalid escape sequence '\\{other}'")))
            }
        };
        Ok(value)
    }

    fn lex_string(&mut self, position: Position) -> Result<String, LexError> {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() || self.current_char() == '\n' {
                return Err(self.error_at(position, "unterminated string literal"));
            }
            match self.current_char() {
                '"' => {
                    self.advance();
                    return Ok(value);
                }
                '\\' => value.push(self.read_escape(position)?),
                _ => value.push(self.advance()),
            }
        }
    }

    fn lex_verbatim(&mut self, position: Position) -> Result<String, LexError> {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() {
                return Err(self.error_at(position, "unterminated verbatim string literal"));
            }
            if self.current_char() == '"' {
                if self.peek_char(1) == '"' {
                    self.advance();
                    self.advance();
                    value.push('"');
                    continue;
                }
                self.advance();
                return Ok(value);
            }
            value.push(self.advance());
        }
    }

    fn lex_triple_quoted(&mut self, position: Position) -> Result<String, LexError> {
        for _ in 0..3 {
            self.advance();
        }
        let mut raw = String::new();
        loop {
            if self.is_at_end() {
                return Err(self.error_at(position, "unterminated triple-quoted string"));
            }
            if self.current_char() == '"' && self.peek_char(1) == '"' && self.peek_char(2) == '"' {
                for _ in 0..3 {
                    self.advance();
                }
                break;
            }
            raw.push(self.advance());
        }
        Ok(dedent_block(&raw))
    }

    fn lex_char(&mut self, position: Position) -> Result<char, LexError> {
        self.advance();
        let value = match self.current_char() {
            '\\' => self.read_escape(position)?,
            '\'' => return Err(self.error_at(position, "empty character literal")),
            '\n' | '\0' if self.is_at_end() || self.current_char() == '\n' => {
                return Err(self.error_at(position, "unterminated character literal"))
            }
            _ => self.advance(),
        };
        if self.current_char() != '\'' {
            return Err(self.error_at(position, "unterminated character literal"));
        }
        self.advance();
        Ok(value)
    }

    /// Body of `$"..."`: literal runs and `{expression}` holes.
    fn lex_interpolated(&mut self, position: Position) -> Result<Vec<InterpolationPart>, LexError> {
        self.advance();
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            if self.is_at_end() || self.current_char() == '\n' {
                return Err(self.error_at(position, "unterminated interpolated string"));
            }
            match self.current_char() {
                '"' => {
                    self.advance();
                    break;
                }
                '\\' => literal.push(self.read_escape(position)?),
                '{' if self.peek_char(1) == '{' => {
                    self.advance();
                    self.advance();
                    literal.push('{');
                }
                '}' if self.peek_char(1) == '}' => {
                    self.advance();
                    self.advance();
                    literal.push('}');
                }
                '{' => {
                    if !literal.is_empty() {
                        parts.push(InterpolationPart::Literal(std::mem::take(&mut literal)));
                    }
                    self.advance();
                    let origin = self.current_position();
                    let source = self.read_interpolation_hole(position)?;
                    let mut inner = Tokenizer::with_origin(&source, self.level(), origin);
                    parts.push(InterpolationPart::Expression(inner.tokenize()?));
                }
                _ => literal.push(self.advance()),
            }
        }
        if !literal.is_empty() {
            parts.push(InterpolationPart::Literal(literal));
        }
        Ok(parts)
    }

    fn read_interpolation_hole(&mut self, position: Position) -> Result<String, LexError> {
        let mut source = String::new();
        let mut braces = 1;
        let mut in_string = false;
        loop {
            if self.is_at_end() || self.current_char() == '\n' {
                return Err(self.error_at(position, "unterminated interpolation expression"));
            }
            let ch = self.current_char();
            if in_string {
                if ch == '\\' {
                    source.push(self.advance());
                } else if ch == '"' {
                    in_string = false;
                }
            } else if ch == '"' {
                in_string = true;
            } else if ch == '{' {
                braces += 1;
            } else if ch == '}' {
                braces -= 1;
                if braces == 0 {
                    self.advance();
                    return Ok(source);
                }
            }
            source.push(self.advance());
        }
    }

    fn lex_number(&mut self, position: Position) -> Result<NumberLiteral, LexError> {
        let radix = match (self.current_char(), self.peek_char(1)) {
            ('0', 'x' | 'X') => Some(16),
            ('0', 'b' | 'B') => Some(2),
            ('0', 'o' | 'O') => Some(8),
            _ => None,
        };
        if let Some(radix) = radix {
            self.advance();
            self.advance();
            let mut value = 0f64;
            let mut digits = 0;
            loop {
                let ch = self.current_char();
                if ch == '_' {
                    self.advance();
                    continue;
                }
                match ch.to_digit(radix) {
                    Some(digit) => {
                        value = value * f64::from(radix) + f64::from(digit);
                        digits += 1;
                        self.advance();
                    }
                    None => break,
                }
            }
            if digits == 0 || self.current_char().is_alphanumeric() {
                return Err(self.error_at(position, "malformed number literal"));
            }
            return Ok(NumberLiteral {
                value,
                is_integer: true,
                suffix: None,
            });
        }

        let mut text = String::new();
        let mut is_integer = true;
        self.read_digits(&mut text);
        if self.current_char() == '.' && self.peek_char(1).is_ascii_digit() {
            is_integer = false;
            text.push(self.advance());
            self.read_digits(&mut text);
        }
        if matches!(self.current_char(), 'e' | 'E') {
            let next = self.peek_char(1);
            let signed = matches!(next, '+' | '-') && self.peek_char(2).is_ascii_digit();
            if next.is_ascii_digit() || signed {
                is_integer = false;
                text.push(self.advance());
                if signed {
                    text.push(self.advance());
                }
                self.read_digits(&mut text);
            }
        }
        let suffix = match self.current_char() {
            'f' | 'F' => Some(NumericSuffix::Float),
            'd' | 'D' => Some(NumericSuffix::Double),
            'm' | 'M' => Some(NumericSuffix::Decimal),
            _ => None,
        };
        if suffix.is_some() {
            self.advance();
            is_integer = false;
        }
        if self.current_char().is_alphanumeric() || self.current_char() == '_' {
            return Err(self.error_at(position, "malformed number literal"));
        }
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error_at(position, "malformed number literal"))?;
        Ok(NumberLiteral {
            value,
            is_integer,
            suffix,
        })
    }

    fn read_digits(&mut self, text: &mut String) {
        while self.current_char().is_ascii_digit() || self.current_char() == '_' {
            let ch = self.advance();
            if ch != '_' {
                text.push(ch);
            }
        }
    }

    fn lex_word(&mut self) -> TokenKind {
        let level = self.level();
        if level == SyntaxLevel::High {
            if let Some(kind) = self.match_phrase() {
                return kind;
            }
        }
        let mut word = String::new();
        while self.current_char().is_alphanumeric() || self.current_char() == '_' {
            if MathSymbol::from_char(self.current_char()).is_some() {
                break;
            }
            word.push(self.advance());
        }
        if level.is_asm() {
            return TokenKind::AsmText(word);
        }
        tables::classify_word(level, &word).unwrap_or(TokenKind::Identifier(word))
    }

    /// Longest multi-word @high operator starting at the cursor.
    fn match_phrase(&mut self) -> Option<TokenKind> {
        for (words, kind) in tables::HIGH_PHRASES.iter() {
            if let Some(end) = self.phrase_end(words) {
                while self.position < end {
                    self.advance();
                }
                return Some(kind.clone());
            }
        }
        None
    }

    fn phrase_end(&self, words: &[&str]) -> Option<usize> {
        let mut cursor = self.position;
        for (index, word) in words.iter().enumerate() {
            if index > 0 {
                let before = cursor;
                while matches!(self.input.get(cursor), Some(' ' | '\t')) {
                    cursor += 1;
                }
                if cursor == before {
                    return None;
                }
            }
            for expected in word.chars() {
                if self.input.get(cursor) != Some(&expected) {
                    return None;
                }
                cursor += 1;
            }
            if self
                .input
                .get(cursor)
                .is_some_and(|c| c.is_alphanumeric() || *c == '_')
            {
                return None;
            }
        }
        Some(cursor)
    }

    fn lex_operator(&mut self, position: Position) -> Result<TokenKind, LexError> {
        let ch = self.advance();
        let next = self.current_char();
        let kind = match ch {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,
            '?' => match next {
                '?' => {
                    self.advance();
                    if self.current_char() == '=' {
                        self.advance();
                        TokenKind::NullCoalesceAssign
                    } else {
                        TokenKind::NullCoalesce
                    }
                }
                '.' if !self.peek_char(1).is_ascii_digit() => {
                    self.advance();
                    TokenKind::QuestionDot
                }
                '[' => {
                    self.advance();
                    TokenKind::QuestionBracket
                }
                _ => TokenKind::Question,
            },
            '.' => {
                if next == '.' {
                    self.advance();
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '=' => match next {
                '=' => {
                    self.advance();
                    TokenKind::EqualEqual
                }
                '>' => {
                    self.advance();
                    TokenKind::FatArrow
                }
                _ => TokenKind::Assign,
            },
            '!' => {
                if next == '=' {
                    self.advance();
                    TokenKind::NotEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => match next {
                '=' => {
                    self.advance();
                    if self.current_char() == '>' {
                        self.advance();
                        TokenKind::Spaceship
                    } else {
                        TokenKind::LessEqual
                    }
                }
                _ => TokenKind::Less,
            },
            '>' => {
                if next == '=' {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '+' => match next {
                '+' => {
                    self.advance();
                    TokenKind::PlusPlus
                }
                '=' => {
                    self.advance();
                    TokenKind::PlusAssign
                }
                _ => TokenKind::Plus,
            },
            '-' => match next {
                '-' => {
                    self.advance();
                    TokenKind::MinusMinus
                }
                '=' => {
                    self.advance();
                    TokenKind::MinusAssign
                }
                '>' => {
                    self.advance();
                    TokenKind::Arrow
                }
                _ => TokenKind::Minus,
            },
            '*' => match next {
                '*' => {
                    self.advance();
                    TokenKind::StarStar
                }
                '=' => {
                    self.advance();
                    TokenKind::StarAssign
                }
                _ => TokenKind::Star,
            },
            '/' => {
                if next == '=' {
                    self.advance();
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if next == '=' {
                    self.advance();
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            '&' => {
                if next == '&' {
                    self.advance();
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if next == '|' {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            other => {
                return Err(self.error_at(position, format!("unexpected character '{other}'")));
            }
        };
        Ok(kind)
    }
}

impl Iterator for Tokenizer {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }
}

/// Drops the first line break, the trailing blank line and the common
/// indentation of a triple-quoted block.
fn dedent_block(raw: &str) -> String {
    let body = raw.strip_prefix("\r\n").or_else(|| raw.strip_prefix('\n')).unwrap_or(raw);
    let mut lines: Vec<&str> = body.split('\n').collect();
    if lines.len() > 1 && lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.len() >= indent {
                &line[indent..]
            } else {
                line.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn number(source: &str) -> NumberLiteral {
        match &kinds(source)[0] {
            TokenKind::Number(literal) => *literal,
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn numeric_literal_forms() {
        assert_eq!(number("0xFF").value, 255.0);
        assert_eq!(number("0b1010").value, 10.0);
        assert_eq!(number("0o17").value, 15.0);
        assert_eq!(number("1_000_000").value, 1_000_000.0);
        assert_eq!(number("1.5e3").value, 1500.0);
        assert!(number("42").is_integer);
        assert!(!number("2.5").is_integer);
        assert_eq!(number("3m").suffix, Some(NumericSuffix::Decimal));
        assert_eq!(number("2f").suffix, Some(NumericSuffix::Float));
    }

    #[test]
    fn range_is_not_a_float() {
        assert_eq!(
            kinds("1..5"),
            vec![
                TokenKind::Number(NumberLiteral {
                    value: 1.0,
                    is_integer: true,
                    suffix: None
                }),
                TokenKind::DotDot,
                TokenKind::Number(NumberLiteral {
                    value: 5.0,
                    is_integer: true,
                    suffix: None
                }),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = tokenize("12abc").unwrap_err();
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn comments_produce_no_tokens() {
        assert_eq!(kinds("// line\n/* block /* nested */ */"), vec![TokenKind::Eof]);
    }

    #[test]
    fn unterminated_block_comment_fails() {
        assert!(tokenize("/* open").is_err());
    }

    #[test]
    fn doc_comments_attach_to_next_token() {
        let tokens = tokenize("/// Adds one\nfunction inc() {}").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(tokens[0].doc.as_deref(), Some("Adds one"));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\u0041\u{1F600}""#)[0],
            TokenKind::Str("a\tbA\u{1F600}".into())
        );
        let err = tokenize(r#""bad \q""#).unwrap_err();
        assert!(err.reason.contains("invalid escape"));
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn verbatim_and_triple_quoted_strings() {
        assert_eq!(
            kinds(r#"@"C:\dir ""q""""#)[0],
            TokenKind::Str("C:\\dir \"q\"".into())
        );
        let source = "\"\"\"\n    line one\n      line two\n    \"\"\"";
        assert_eq!(kinds(source)[0], TokenKind::Str("line one\n  line two".into()));
    }

    #[test]
    fn interpolated_string_parts() {
        let tokens = kinds(r#"$"sum = {a + b}!""#);
        let TokenKind::InterpolatedString(parts) = &tokens[0] else {
            panic!("expected interpolated string");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], InterpolationPart::Literal("sum = ".into()));
        match &parts[1] {
            InterpolationPart::Expression(inner) => {
                let inner: Vec<_> = inner.iter().map(|t| t.kind.clone()).collect();
                assert_eq!(inner[1], TokenKind::Plus);
                assert_eq!(inner.last(), Some(&TokenKind::Eof));
            }
            other => panic!("expected expression part, got {other:?}"),
        }
    }

    #[test]
    fn math_symbols_are_tokens() {
        let tokens = kinds("x ∈ xs ≤ π");
        assert_eq!(tokens[1], TokenKind::MathSymbol(MathSymbol::ElementOf));
        assert_eq!(tokens[3], TokenKind::MathSymbol(MathSymbol::LessEq));
        assert_eq!(tokens[4], TokenKind::MathSymbol(MathSymbol::Pi));
    }

    #[test]
    fn operators_take_longest_match() {
        assert_eq!(
            kinds("a ??= b ?. c <=> d ** e"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::NullCoalesceAssign,
                TokenKind::Identifier("b".into()),
                TokenKind::QuestionDot,
                TokenKind::Identifier("c".into()),
                TokenKind::Spaceship,
                TokenKind::Identifier("d".into()),
                TokenKind::StarStar,
                TokenKind::Identifier("e".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn high_level_phrases() {
        let tokens = kinds("@high\nset x to a is greater than or equal to b plus 1");
        assert_eq!(tokens[0], TokenKind::LevelMarker(SyntaxLevel::High));
        assert_eq!(tokens[1], TokenKind::Set);
        assert_eq!(tokens[3], TokenKind::To);
        assert_eq!(tokens[5], TokenKind::GreaterEqual);
        assert_eq!(tokens[7], TokenKind::Plus);
    }

    #[test]
    fn scoped_marker_ends_with_its_block() {
        let tokens = tokenize("@asm {\n push 1\n add\n}\nvar x = 1;").unwrap();
        let push = tokens.iter().find(|t| t.lexeme == "push").unwrap();
        assert_eq!(push.kind, TokenKind::AsmText("push".into()));
        assert_eq!(push.level, SyntaxLevel::Asm);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Newline));
        let var = tokens.iter().find(|t| t.lexeme == "var").unwrap();
        assert_eq!(var.kind, TokenKind::Var);
        assert_eq!(var.level, SyntaxLevel::Medium);
    }

    #[test]
    fn unscoped_marker_is_replaced_at_same_depth() {
        let tokens = tokenize("@low fn f() {} @medium function g() {}").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Fn);
        assert_eq!(tokens[1].level, SyntaxLevel::Low);
        let g = tokens.iter().find(|t| t.lexeme == "function").unwrap();
        assert_eq!(g.level, SyntaxLevel::Medium);
    }

    #[test]
    fn marker_inside_block_ends_with_block() {
        let tokens = tokenize("{ @low fn } fn").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Fn);
        assert_eq!(tokens[4].kind, TokenKind::Identifier("fn".into()));
    }

    #[test]
    fn spirv_marker() {
        let tokens = kinds("@asm spirv { OpNop }");
        assert_eq!(tokens[0], TokenKind::LevelMarker(SyntaxLevel::AsmSpirv));
    }

    #[test]
    fn unknown_marker_fails() {
        let err = tokenize("@fancy").unwrap_err();
        assert!(err.reason.contains("@fancy"));
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("var x\n  = 1;").unwrap();
        assert_eq!((tokens[0].line(), tokens[0].column()), (1, 1));
        assert_eq!((tokens[2].line(), tokens[2].column()), (2, 3));
    }

    #[test]
    fn reset_restarts_iteration() {
        let mut tokenizer = Tokenizer::new("a b");
        let first: Vec<_> = tokenizer.by_ref().collect();
        tokenizer.reset();
        let second: Vec<_> = tokenizer.collect();
        assert_eq!(first, second);
    }
}
