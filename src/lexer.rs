use crate::error::{FloError, Span};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,
    Dot,
    DotDot,
    Question,

    // Arithmetic
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    PlusPlus,
    MinusMinus,

    // Assignment
    Equal,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    AmpersandEqual,
    CaretEqual,
    PipeEqual,

    // Comparison
    EqualEqual,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Bitwise
    ShiftLeft,
    ShiftRight,
    Ampersand,
    Pipe,
    Caret,
    Tilde,

    // Literals
    Identifier,
    Number,
    Float,
    String,
    BuiltinType,

    // Keywords
    Let,
    Static,
    Mut,
    Fn,
    Class,
    Enum,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Unreachable,
    Delete,
    Pass,
    And,
    Or,
    Not,
    Alloc,

    // Layout
    BlockStart,
    BlockEnd,
    Shebang,
    Eof,
}

const SYMBOLS: &[(&str, TokenType)] = &[
    ("==", TokenType::EqualEqual),
    ("!=", TokenType::BangEqual),
    ("//", TokenType::SlashSlash),
    (">=", TokenType::GreaterEqual),
    ("<=", TokenType::LessEqual),
    ("**", TokenType::StarStar),
    ("++", TokenType::PlusPlus),
    ("--", TokenType::MinusMinus),
    ("+=", TokenType::PlusEqual),
    ("-=", TokenType::MinusEqual),
    ("*=", TokenType::StarEqual),
    ("/=", TokenType::SlashEqual),
    ("%=", TokenType::PercentEqual),
    ("&=", TokenType::AmpersandEqual),
    ("^=", TokenType::CaretEqual),
    ("|=", TokenType::PipeEqual),
    ("<<", TokenType::ShiftLeft),
    (">>", TokenType::ShiftRight),
    ("..", TokenType::DotDot),
    (".", TokenType::Dot),
    (":", TokenType::Colon),
    (",", TokenType::Comma),
    ("(", TokenType::LeftParen),
    (")", TokenType::RightParen),
    ("[", TokenType::LeftBracket),
    ("]", TokenType::RightBracket),
    ("{", TokenType::LeftBrace),
    ("}", TokenType::RightBrace),
    ("+", TokenType::Plus),
    ("-", TokenType::Minus),
    ("*", TokenType::Star),
    ("/", TokenType::Slash),
    ("%", TokenType::Percent),
    ("=", TokenType::Equal),
    (">", TokenType::Greater),
    ("<", TokenType::Less),
    ("|", TokenType::Pipe),
    ("&", TokenType::Ampersand),
    ("~", TokenType::Tilde),
    ("^", TokenType::Caret),
    ("?", TokenType::Question),
];

const BUILTIN_TYPES: &[&str] = &[
    "int", "float", "str", "bool", "obj", "char", "i8", "u8", "i16", "u16", "i32", "u32", "i64",
    "u64", "f32", "f64",
];

/// Names kept free for future language features.
pub const RESERVED_WORDS: &[&str] = &[
    "as", "async", "await", "case", "catch", "const", "default", "defer", "do", "extends",
    "finally", "from", "goto", "impl", "import", "interface", "is", "loop", "match", "mod",
    "new", "private", "protected", "pub", "public", "self", "struct", "super", "switch", "throw",
    "trait", "try", "type", "typeof", "union", "use", "var", "where", "with", "yield",
];

const INDENT_WIDTH: usize = 4;

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: Span,
    /// 1-based source line.
    pub line: usize,
    /// 0-based column, in characters.
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span, line: usize, column: usize) -> Self {
        Self {
            token_type,
            lexeme,
            span,
            line,
            column,
        }
    }
}

pub struct Lexer {
    source: String,
    filename: String,
    tokens: Vec<Token>,
    symbols: Vec<(&'static str, TokenType)>,
    keywords: HashMap<&'static str, TokenType>,
    indent: usize,
    bracket_depth: usize,
}

impl Lexer {
    pub fn new(source: String, filename: &str) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert("let", TokenType::Let);
        keywords.insert("static", TokenType::Static);
        keywords.insert("mut", TokenType::Mut);
        keywords.insert("fn", TokenType::Fn);
        keywords.insert("class", TokenType::Class);
        keywords.insert("enum", TokenType::Enum);
        keywords.insert("if", TokenType::If);
        keywords.insert("elif", TokenType::Elif);
        keywords.insert("else", TokenType::Else);
        keywords.insert("while", TokenType::While);
        keywords.insert("for", TokenType::For);
        keywords.insert("in", TokenType::In);
        keywords.insert("return", TokenType::Return);
        keywords.insert("break", TokenType::Break);
        keywords.insert("continue", TokenType::Continue);
        keywords.insert("unreachable", TokenType::Unreachable);
        keywords.insert("delete", TokenType::Delete);
        keywords.insert("pass", TokenType::Pass);
        keywords.insert("and", TokenType::And);
        keywords.insert("or", TokenType::Or);
        keywords.insert("not", TokenType::Not);
        keywords.insert("@alloc", TokenType::Alloc);
        for name in BUILTIN_TYPES {
            keywords.insert(name, TokenType::BuiltinType);
        }

        // longest first, so '+=' wins over '+'
        let mut symbols = SYMBOLS.to_vec();
        symbols.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            source,
            filename: filename.to_string(),
            tokens: Vec::new(),
            symbols,
            keywords,
            indent: 0,
            bracket_depth: 0,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, FloError> {
        let source = self.source.clone();
        let mut offset = 0;
        let mut line_nr = 0;

        for raw_line in source.split('\n') {
            line_nr += 1;
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            self.scan_line(line, offset, line_nr)?;
            offset += raw_line.len() + 1;
        }

        let end = source.len();
        while self.indent > 0 {
            self.push(TokenType::BlockEnd, String::new(), Span::new(end, end), line_nr, 0);
            self.indent -= 1;
        }
        self.push(TokenType::Eof, String::new(), Span::new(end, end), line_nr, 0);

        reject_ambiguous_unary(&self.tokens)?;

        tracing::debug!(
            filename = %self.filename,
            tokens = self.tokens.len(),
            "tokenized source"
        );
        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_line(&mut self, line: &str, offset: usize, line_nr: usize) -> Result<(), FloError> {
        // recorded before comment handling, '#' would swallow it otherwise
        if line.starts_with("#!") {
            let text = line.trim_end();
            self.push(
                TokenType::Shebang,
                text.to_string(),
                Span::new(offset, offset + text.len()),
                line_nr,
                0,
            );
            return Ok(());
        }

        let spaces = line.len() - line.trim_start_matches(' ').len();
        let rest = &line[spaces..];
        if rest.trim().is_empty() || rest.trim_start().starts_with('#') {
            return Ok(());
        }

        if self.bracket_depth == 0 {
            if rest.starts_with('\t') {
                let leading = line.len() - line.trim_start_matches([' ', '\t']).len();
                return Err(FloError::new_with_help(
                    crate::error::ErrorKind::LexError,
                    Span::new(offset, offset + leading),
                    "Tabs are not allowed in indentation".to_string(),
                    "Indent blocks with exactly 4 spaces per level.".to_string(),
                ));
            }
            self.indentation(spaces, offset, line_nr)?;
        }

        let mut pos = spaces;
        'scan: while pos < line.len() {
            let rest = &line[pos..];
            let column = line[..pos].chars().count();
            let start = offset + pos;

            let Some(c) = rest.chars().next() else {
                break;
            };

            if c == ' ' || c == '\t' {
                pos += 1;
                continue;
            }

            if c == '#' && line[..pos].ends_with([' ', '\t']) {
                // rest of the line is a comment
                break;
            }

            for &(symbol, token_type) in &self.symbols {
                if rest.starts_with(symbol) {
                    match token_type {
                        TokenType::LeftParen | TokenType::LeftBracket | TokenType::LeftBrace => {
                            self.bracket_depth += 1;
                        }
                        TokenType::RightParen | TokenType::RightBracket | TokenType::RightBrace => {
                            self.bracket_depth = self.bracket_depth.saturating_sub(1);
                        }
                        _ => {}
                    }
                    let end = start + symbol.len();
                    self.push(token_type, symbol.to_string(), Span::new(start, end), line_nr, column);
                    pos += symbol.len();
                    continue 'scan;
                }
            }

            if c.is_ascii_alphabetic() || c == '_' || c == '@' {
                let word_len = word_length(rest);
                let word = &rest[..word_len];
                let span = Span::new(start, start + word_len);

                if let Some(token_type) = self.keywords.get(word).copied() {
                    self.push(token_type, word.to_string(), span, line_nr, column);
                    pos += word_len;
                    continue;
                }

                if c != '@' {
                    if RESERVED_WORDS.contains(&word) {
                        return Err(FloError::new_with_help(
                            crate::error::ErrorKind::LexError,
                            span,
                            format!("'{}' is a reserved word", word),
                            "Reserved words cannot be used as names. Pick a different identifier."
                                .to_string(),
                        ));
                    }
                    self.push(TokenType::Identifier, word.to_string(), span, line_nr, column);
                    pos += word_len;
                    continue;
                }
            }

            if c.is_ascii_digit() {
                let len = self.number(rest, start, line_nr, column)?;
                pos += len;
                continue;
            }

            if c == '"' || c == '\'' || c == '`' {
                let len = self.string(rest, c, start, line_nr, column)?;
                pos += len;
                continue;
            }

            return Err(FloError::lex_error(
                Span::new(start, start + c.len_utf8()),
                format!("Unexpected character: '{}'", c),
            ));
        }

        Ok(())
    }

    fn indentation(&mut self, spaces: usize, offset: usize, line_nr: usize) -> Result<(), FloError> {
        if spaces % INDENT_WIDTH != 0 {
            return Err(FloError::new_with_help(
                crate::error::ErrorKind::LexError,
                Span::new(offset, offset + spaces),
                format!("Indentation is not a multiple of {} (found {})", INDENT_WIDTH, spaces),
                "Indent blocks with exactly 4 spaces per level.".to_string(),
            ));
        }

        let level = spaces / INDENT_WIDTH;
        let at = Span::new(offset + spaces, offset + spaces);
        while level > self.indent {
            self.push(TokenType::BlockStart, String::new(), at, line_nr, spaces);
            self.indent += 1;
        }
        while level < self.indent {
            self.push(TokenType::BlockEnd, String::new(), at, line_nr, spaces);
            self.indent -= 1;
        }
        Ok(())
    }

    /// Hex, integer or float literal at the start of `rest`; returns its byte length.
    fn number(&mut self, rest: &str, start: usize, line: usize, column: usize) -> Result<usize, FloError> {
        let bytes = rest.as_bytes();

        if rest.starts_with("0x") && bytes.get(2).is_some_and(|b| b.is_ascii_hexdigit()) {
            let len = 2 + rest[2..].bytes().take_while(|b| b.is_ascii_hexdigit()).count();
            let text = &rest[..len];
            if u32::from_str_radix(&text[2..], 16).is_err() {
                return Err(FloError::lex_error(
                    Span::new(start, start + len),
                    format!("Hex literal does not fit in 32 bits: {}", text),
                ));
            }
            self.push(TokenType::Number, text.to_string(), Span::new(start, start + len), line, column);
            return Ok(len);
        }

        let mut len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        let mut is_float = false;

        // "10." is a float, "0..5" is a range
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1) != Some(&b'.') {
            is_float = true;
            len += 1;
            len += bytes[len..].iter().take_while(|b| b.is_ascii_digit()).count();
        }

        if matches!(bytes.get(len), Some(b'e' | b'E')) {
            let mut exp = len + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            let digits = bytes[exp.min(bytes.len())..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 {
                is_float = true;
                len = exp + digits;
            }
        }

        let text = &rest[..len];
        let span = Span::new(start, start + len);
        if is_float {
            if text.parse::<f64>().is_err() {
                return Err(FloError::lex_error(span, format!("Invalid float: {}", text)));
            }
            self.push(TokenType::Float, text.to_string(), span, line, column);
        } else {
            match text.parse::<u64>() {
                Ok(value) if value <= u64::from(u32::MAX) => {}
                _ => {
                    return Err(FloError::lex_error(
                        span,
                        format!("Integer literal does not fit in 32 bits: {}", text),
                    ))
                }
            }
            self.push(TokenType::Number, text.to_string(), span, line, column);
        }
        Ok(len)
    }

    /// String literal delimited by `quote`; returns its byte length in the source.
    fn string(
        &mut self,
        rest: &str,
        quote: char,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<usize, FloError> {
        let mut content = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((i, c)) = chars.next() {
            if c == quote {
                let len = i + c.len_utf8();
                self.push(TokenType::String, content, Span::new(start, start + len), line, column);
                return Ok(len);
            }
            if c == '\\' {
                match chars.next() {
                    Some((_, 'n')) => content.push('\n'),
                    Some((_, 't')) => content.push('\t'),
                    Some((_, 'r')) => content.push('\r'),
                    Some((_, '0')) => content.push('\0'),
                    Some((_, escaped)) if escaped == quote || escaped == '\\' => content.push(escaped),
                    Some((_, other)) => {
                        content.push('\\');
                        content.push(other);
                    }
                    None => break,
                }
            } else {
                content.push(c);
            }
        }

        Err(FloError::new_with_help(
            crate::error::ErrorKind::LexError,
            Span::new(start, start + rest.len()),
            "Unterminated string".to_string(),
            format!("Close the string with {} on the same line.", quote),
        ))
    }

    fn push(&mut self, token_type: TokenType, lexeme: String, span: Span, line: usize, column: usize) {
        self.tokens.push(Token::new(token_type, lexeme, span, line, column));
    }
}

/// Tokenize `source`, attributing tokens to `filename`.
pub fn tokenize(source: &str, filename: &str) -> Result<Vec<Token>, FloError> {
    Lexer::new(source.to_string(), filename).scan_tokens()
}

/// Length of the identifier-like word at the start of `text`, including a
/// leading '@'.
fn word_length(text: &str) -> usize {
    let skip = usize::from(text.starts_with('@'));
    skip + text[skip..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count()
}

fn is_sign_operator(token_type: TokenType) -> bool {
    matches!(
        token_type,
        TokenType::Plus | TokenType::Minus | TokenType::PlusPlus | TokenType::MinusMinus
    )
}

/// Touching runs like `---x` or `--+x` have no single obvious reading.
fn reject_ambiguous_unary(tokens: &[Token]) -> Result<(), FloError> {
    for pair in tokens.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        let touching = first.span.end == second.span.start;
        let has_step = matches!(first.token_type, TokenType::PlusPlus | TokenType::MinusMinus)
            || matches!(second.token_type, TokenType::PlusPlus | TokenType::MinusMinus);

        if touching && has_step && is_sign_operator(first.token_type) && is_sign_operator(second.token_type) {
            return Err(FloError::parse_error_with_help(
                first.span.to(&second.span),
                format!(
                    "Ambiguous operator sequence '{}{}'",
                    first.lexeme, second.lexeme
                ),
                "Separate the operators with parentheses, e.g. '-(--x)'.".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn types(source: &str) -> Vec<TokenType> {
        tokenize(source, "test")
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn longest_symbol_wins() {
        assert_eq!(
            types("a += 1"),
            vec![TokenType::Identifier, TokenType::PlusEqual, TokenType::Number, TokenType::Eof]
        );
        assert_eq!(
            types("+-*===x"),
            vec![
                TokenType::Plus,
                TokenType::Minus,
                TokenType::Star,
                TokenType::EqualEqual,
                TokenType::Equal,
                TokenType::Identifier,
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn keywords_respect_identifier_boundary() {
        let tokens = tokenize("fn function int integer", "test").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Fn);
        assert_eq!(tokens[1].token_type, TokenType::Identifier);
        assert_eq!(tokens[1].lexeme, "function");
        assert_eq!(tokens[2].token_type, TokenType::BuiltinType);
        assert_eq!(tokens[3].token_type, TokenType::Identifier);
    }

    #[test]
    fn numbers() {
        let tokens = tokenize("10 10. 10.5 1E3 1.2e-3 0xFF", "test").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| (t.token_type, t.lexeme.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (TokenType::Number, "10"),
                (TokenType::Float, "10."),
                (TokenType::Float, "10.5"),
                (TokenType::Float, "1E3"),
                (TokenType::Float, "1.2e-3"),
                (TokenType::Number, "0xFF"),
                (TokenType::Eof, ""),
            ]
        );
    }

    #[test]
    fn range_does_not_swallow_dot() {
        assert_eq!(
            types("0..5"),
            vec![TokenType::Number, TokenType::DotDot, TokenType::Number, TokenType::Eof]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""a\"b" 'it\'s' `x\\y`"#, "test").unwrap();
        assert_eq!(tokens[0].lexeme, "a\"b");
        assert_eq!(tokens[1].lexeme, "it's");
        assert_eq!(tokens[2].lexeme, "x\\y");
    }

    #[test]
    fn unterminated_string() {
        let error = tokenize("\"hello", "test").unwrap_err();
        assert_eq!(error.kind, ErrorKind::LexError);
        assert_eq!(error.message, "Unterminated string");
    }

    #[test]
    fn comments_need_leading_whitespace() {
        assert_eq!(types("1 # comment"), vec![TokenType::Number, TokenType::Eof]);
        assert_eq!(types("# whole line"), vec![TokenType::Eof]);
        let error = tokenize("1# comment", "test").unwrap_err();
        assert_eq!(error.span, Span::new(1, 2));
    }

    #[test]
    fn indentation_blocks() {
        let source = "if x:\n    y\n        z\nw\n";
        assert_eq!(
            types(source),
            vec![
                TokenType::If,
                TokenType::Identifier,
                TokenType::Colon,
                TokenType::BlockStart,
                TokenType::Identifier,
                TokenType::BlockStart,
                TokenType::Identifier,
                TokenType::BlockEnd,
                TokenType::BlockEnd,
                TokenType::Identifier,
                TokenType::Eof
            ]
        );
    }

    #[test]
    fn blank_lines_keep_indentation() {
        let source = "fn f():\n    a\n\n    # note\n    b\n";
        let block_ends = types(source)
            .into_iter()
            .filter(|t| *t == TokenType::BlockEnd)
            .count();
        assert_eq!(block_ends, 1);
    }

    #[test]
    fn indentation_flushed_at_eof() {
        let tokens = types("while x:\n    while y:\n        z");
        assert_eq!(&tokens[tokens.len() - 3..], &[TokenType::BlockEnd, TokenType::BlockEnd, TokenType::Eof]);
    }

    #[test]
    fn bad_indentation() {
        let error = tokenize("if x:\n   y", "test").unwrap_err();
        assert_eq!(error.kind, ErrorKind::LexError);
        assert!(error.message.contains("multiple of 4"));
    }

    #[test]
    fn tab_indentation_rejected() {
        let error = tokenize("if x:\n\ty\n", "test").unwrap_err();
        assert_eq!(error.kind, ErrorKind::LexError);
        assert_eq!(error.message, "Tabs are not allowed in indentation");

        let error = tokenize("if x:\n    \ty\n", "test").unwrap_err();
        assert_eq!(error.message, "Tabs are not allowed in indentation");

        // tabs after the first token are plain whitespace
        assert!(tokenize("x =\t1\n", "test").is_ok());
    }

    #[test]
    fn continuation_lines_inside_brackets() {
        let source = "let x = [1,\n        2]\n";
        assert!(!types(source).contains(&TokenType::BlockStart));
    }

    #[test]
    fn shebang_before_comment_rules() {
        let tokens = tokenize("#!script\n1", "test").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Shebang);
        assert_eq!(tokens[0].lexeme, "#!script");
    }

    #[test]
    fn reserved_words_rejected() {
        let error = tokenize("let int import = 0", "test").unwrap_err();
        assert_eq!(error.kind, ErrorKind::LexError);
        assert!(error.message.contains("reserved"));
    }

    #[test]
    fn ambiguous_unary_chains() {
        for source in ["---x", "--+x", "+++x", "-++x", "x+++y"] {
            let error = tokenize(source, "test").unwrap_err();
            assert_eq!(error.kind, ErrorKind::ParseError, "{}", source);
        }
        assert!(tokenize("- --x", "test").is_ok());
        assert!(tokenize("1 +- 2", "test").is_ok());
    }

    #[test]
    fn alloc_keyword() {
        assert_eq!(types("@alloc"), vec![TokenType::Alloc, TokenType::Eof]);
        assert_eq!(
            types("@alloc buffer"),
            vec![TokenType::Alloc, TokenType::Identifier, TokenType::Eof]
        );
    }

    #[test]
    fn positions() {
        let tokens = tokenize("a\n  # c\nbb + 1", "test").unwrap();
        let plus = &tokens[2];
        assert_eq!(plus.token_type, TokenType::Plus);
        assert_eq!(plus.line, 3);
        assert_eq!(plus.column, 3);
    }

    #[test]
    fn unknown_character() {
        let error = tokenize("a $ b", "test").unwrap_err();
        assert_eq!(error.message, "Unexpected character: '$'");
        assert_eq!(error.span, Span::new(2, 3));
    }
}
