use std::{collections::HashMap, fmt, iter::Fuse, str::Chars};

use lazy_static::lazy_static;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    If,
    Then,
    Else,
    Ident(String),
    Number(f64),
    Punct(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::If => write!(f, "'if'"),
            Token::Then => write!(f, "'then'"),
            Token::Else => write!(f, "'else'"),
            Token::Ident(ident) => write!(f, "identifier '{}'", ident),
            Token::Number(num) => write!(f, "number {}", num),
            Token::Punct(c) => write!(f, "'{}'", c),
        }
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, Token> = {
        let mut keywords = HashMap::new();
        keywords.insert("def", Token::Def);
        keywords.insert("extern", Token::Extern);
        keywords.insert("if", Token::If);
        keywords.insert("then", Token::Then);
        keywords.insert("else", Token::Else);
        keywords
    };
}

/// Streaming lexer holding a single character of lookahead.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: Fuse<I>,
    /// `None` once the input is exhausted
    last_char: Option<char>,
}

impl<'s> Lexer<Chars<'s>> {
    pub fn from_source(source: &'s str) -> Self {
        Lexer::new(source.chars())
    }
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        Lexer {
            chars: chars.fuse(),
            last_char: Some(' '),
        }
    }

    fn bump(&mut self) {
        self.last_char = self.chars.next();
    }

    /// Produces the next token. Once the input runs out every call returns [`Token::Eof`].
    pub fn next_token(&mut self) -> Token {
        loop {
            while let Some(c) = self.last_char {
                if !c.is_ascii_whitespace() {
                    break;
                }
                self.bump();
            }

            match self.last_char {
                None => return Token::Eof,
                Some('#') => self.skip_comment(),
                Some(c) if c.is_ascii_alphabetic() => return self.identifier(c),
                Some(c) if c.is_ascii_digit() => return self.number(c),
                Some(c) => {
                    self.bump();
                    return Token::Punct(c);
                }
            }
        }
    }

    fn skip_comment(&mut self) {
        loop {
            self.bump();
            match self.last_char {
                None | Some('\n') | Some('\r') => break,
                _ => (),
            }
        }
    }

    fn identifier(&mut self, first: char) -> Token {
        let mut ident = first.to_string();
        loop {
            self.bump();
            match self.last_char {
                Some(c) if c.is_ascii_alphanumeric() => ident.push(c),
                _ => break,
            }
        }

        match KEYWORDS.get(ident.as_str()) {
            Some(keyword) => keyword.clone(),
            None => Token::Ident(ident),
        }
    }

    fn number(&mut self, first: char) -> Token {
        let mut value = 0.0;
        let mut digit = first;
        loop {
            value = value * 10.0 + f64::from(digit as u8 - b'0');
            self.bump();
            match self.last_char {
                Some(c) if c.is_ascii_digit() => digit = c,
                _ => break,
            }
        }
        Token::Number(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// the last token is always [`Token::Eof`]
    fn lex(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::from_source(input);
        let mut res = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token == Token::Eof;
            res.push(token);
            if done {
                break;
            }
        }
        res
    }

    fn ident(name: &str) -> Token {
        Token::Ident(name.to_string())
    }

    #[test]
    fn lex_works() {
        let input = "def add(x, y) x+y;";
        let tokenized = vec![
            Token::Def,
            ident("add"),
            Token::Punct('('),
            ident("x"),
            Token::Punct(','),
            ident("y"),
            Token::Punct(')'),
            ident("x"),
            Token::Punct('+'),
            ident("y"),
            Token::Punct(';'),
            Token::Eof,
        ];
        assert_eq!(lex(input), tokenized);
    }

    #[test]
    fn keywords_are_recognized() {
        assert_eq!(
            lex("extern if then else iffy"),
            vec![
                Token::Extern,
                Token::If,
                Token::Then,
                Token::Else,
                ident("iffy"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn ignore_works() {
        assert_eq!(lex("# somebody \na"), vec![ident("a"), Token::Eof]);
        assert_eq!(lex("a # trailing"), vec![ident("a"), Token::Eof]);
        assert_eq!(lex("#one\r#two\nb"), vec![ident("b"), Token::Eof]);
    }

    #[test]
    fn numbers_are_integral() {
        assert_eq!(
            lex("42 1.5"),
            vec![
                Token::Number(42.0),
                Token::Number(1.0),
                Token::Punct('.'),
                Token::Number(5.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn identifiers_stop_at_non_alphanumerics() {
        assert_eq!(
            lex("x1_y"),
            vec![ident("x1"), Token::Punct('_'), ident("y"), Token::Eof]
        );
    }

    #[test]
    fn eof_is_sticky() {
        let mut lexer = Lexer::from_source("  ");
        assert_eq!(lexer.next_token(), Token::Eof);
        assert_eq!(lexer.next_token(), Token::Eof);
        assert_eq!(lexer.next_token(), Token::Eof);
    }
}
