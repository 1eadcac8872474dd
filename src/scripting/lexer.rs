//! Tokenizer for the script language

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Backtick literal split into raw text and `${...}` source
    Template(Vec<TemplatePiece>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePiece {
    Text(String),
    Code(String),
}

/// Token with the line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

// Longest first so that "===" wins over "=="
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "++",
    "--", "{", "}", "(", ")", "[", "]", ";", ",", ".", ":", "?", "+", "-", "*", "/", "%", "<",
    ">", "=", "!",
];

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<Vec<Spanned>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let Some(c) = self.peek() else {
                tokens.push(Spanned { token: Token::Eof, line });
                return Ok(tokens);
            };

            let token = if c.is_ascii_digit()
                || (c == '.' && self.rest()[1..].starts_with(|d: char| d.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c == '`' {
                self.template()?
            } else if c == '_' || c == '$' || c.is_alphabetic() {
                self.ident()
            } else {
                self.punct()?
            };
            tokens.push(Spanned { token, line });
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        loop {
            let rest = self.rest();
            if rest.starts_with("//") {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else if rest.starts_with("/*") {
                let start_line = self.line;
                self.bump();
                self.bump();
                loop {
                    if self.rest().starts_with("*/") {
                        self.bump();
                        self.bump();
                        break;
                    }
                    if self.bump().is_none() {
                        return Err(ScriptError::Syntax {
                            line: start_line,
                            message: "Unterminated comment".into(),
                        });
                    }
                }
            } else if self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            } else {
                return Ok(());
            }
        }
    }

    fn number(&mut self) -> Result<Token, ScriptError> {
        let start = self.pos;
        let rest = self.rest();
        if rest.starts_with("0x") || rest.starts_with("0X") {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = &self.src[digits_start..self.pos];
            return i64::from_str_radix(digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| self.error("Invalid hexadecimal literal"));
        }

        let mut seen_dot = false;
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_digit() => {}
                // `arr[0].id` must leave the dot for member access
                Some('.')
                    if !seen_dot
                        && self.rest()[1..].starts_with(|d: char| d.is_ascii_digit()) =>
                {
                    seen_dot = true;
                }
                _ => break,
            }
            self.bump();
        }
        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            self.bump();
            if self.peek().is_some_and(|c| c == '+' || c == '-') {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("Invalid number '{}'", text)))
    }

    fn escape(&mut self) -> Result<char, ScriptError> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('u') => {
                let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("Invalid unicode escape"))
            }
            Some(c) => Ok(c),
            None => Err(self.error("Unterminated string")),
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, ScriptError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("Unterminated string")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<Token, ScriptError> {
        self.bump();
        let mut pieces = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(TemplatePiece::Code(self.template_code()?));
                }
                Some(c) => text.push(c),
                None => return Err(self.error("Unterminated template literal")),
            }
        }
        if !text.is_empty() {
            pieces.push(TemplatePiece::Text(text));
        }
        Ok(Token::Template(pieces))
    }

    /// Source of one `${...}` hole, braces balanced
    fn template_code(&mut self) -> Result<String, ScriptError> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some('{') => depth += 1,
                Some('}') if depth == 0 => {
                    let code = self.src[start..self.pos].to_string();
                    self.bump();
                    return Ok(code);
                }
                Some('}') => depth -= 1,
                Some(_) => {}
                None => return Err(self.error("Unterminated template expression")),
            }
            self.bump();
        }
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c == '_' || c == '$' || c.is_alphanumeric())
        {
            self.bump();
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }

    fn punct(&mut self) -> Result<Token, ScriptError> {
        let rest = self.rest();
        let found = PUNCTUATORS.iter().find(|p| rest.starts_with(**p));
        match found {
            Some(p) => {
                for _ in 0..p.len() {
                    self.bump();
                }
                Ok(Token::Punct(p))
            }
            None => {
                let c = self.peek().unwrap_or(' ');
                Err(self.error(format!("Unexpected character '{}'", c)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            kinds("let x = 1.5;"),
            vec![
                Token::Ident("let".into()),
                Token::Ident("x".into()),
                Token::Punct("="),
                Token::Number(1.5),
                Token::Punct(";"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            kinds("a !== b"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("!=="),
                Token::Ident("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        let tokens = kinds("// note\n'it\\'s' /* block */ \"two\\n\"");
        assert_eq!(
            tokens,
            vec![Token::Str("it's".into()), Token::Str("two\n".into()), Token::Eof]
        );
    }

    #[test]
    fn test_template_pieces() {
        let tokens = kinds("`id=${ user.id }!`");
        assert_eq!(
            tokens[0],
            Token::Template(vec![
                TemplatePiece::Text("id=".into()),
                TemplatePiece::Code(" user.id ".into()),
                TemplatePiece::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_index_then_member() {
        assert_eq!(
            kinds("a[0].id"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("["),
                Token::Number(0.0),
                Token::Punct("]"),
                Token::Punct("."),
                Token::Ident("id".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\n\nb").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 1, .. }));
    }
}
