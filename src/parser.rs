use std::{collections::HashMap, str::Chars};

use lazy_static::lazy_static;

#[cfg(test)]
use crate::ast::ASTNode;
use crate::ast::{Expression, Function, Prototype};
use crate::lexer::{Lexer, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unexpected {0} while expecting an expression")]
    UnexpectedToken(Token),
    #[error("expected ')' but found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected ')' or ',' in argument list but found {0}")]
    ExpectedArgDelimiter(Token),
    #[error("expected function name in prototype but found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected '(' in prototype but found {0}")]
    ExpectedPrototypeOpen(Token),
    #[error("expected ')' in prototype but found {0}")]
    ExpectedPrototypeClose(Token),
    #[error("expected 'then' but found {0}")]
    ExpectedThen(Token),
    #[error("expected 'else' but found {0}")]
    ExpectedElse(Token),
    #[error("duplicate parameter {1} in prototype of {0}")]
    DuplicateParameter(String, String),
}

pub type PartialParseResult = Result<Expression, ParserError>;

lazy_static! {
    /// Binding strength of the binary operators, higher binds tighter.
    static ref OPERATOR_PRECEDENCE: HashMap<char, u32> = {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert('<', 10);
        operator_precedence.insert('>', 10);
        operator_precedence.insert('+', 20);
        operator_precedence.insert('-', 20);
        operator_precedence.insert('*', 40);
        operator_precedence.insert('/', 40);
        operator_precedence
    };
}

/// Recursive descent parser with a single token of lookahead.
///
/// Productions start on the first token of their construct and, on success, leave
/// [`Parser::current`] on the first token after it. A failed production leaves the
/// offending token current; recovering from that is up to the caller.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
}

impl<'s> Parser<Chars<'s>> {
    pub fn from_source(source: &'s str) -> Self {
        Parser::new(Lexer::from_source(source))
    }
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(mut lexer: Lexer<I>) -> Self {
        let current = lexer.next_token();
        Parser { lexer, current }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Moves to the next token, handing back the one that was current.
    pub fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    fn current_operator(&self) -> Option<(char, u32)> {
        match self.current {
            Token::Punct(op) => OPERATOR_PRECEDENCE.get(&op).map(|&pr| (op, pr)),
            _ => None,
        }
    }

    fn parse_number(&mut self, num: f64) -> PartialParseResult {
        self.advance();
        Ok(Expression::Number(num))
    }

    fn parse_identifier(&mut self, ident: String) -> PartialParseResult {
        self.advance();
        if self.current != Token::Punct('(') {
            return Ok(Expression::Variable(ident));
        }
        self.advance();

        let mut args = Vec::new();
        if self.current != Token::Punct(')') {
            loop {
                args.push(self.parse_expression()?);

                match self.current {
                    Token::Punct(')') => break,
                    Token::Punct(',') => {
                        self.advance();
                    }
                    ref other => return Err(ParserError::ExpectedArgDelimiter(other.clone())),
                }
            }
        }
        self.advance();

        Ok(Expression::Call(ident, args))
    }

    fn parse_nested(&mut self) -> PartialParseResult {
        self.advance();
        let res = self.parse_expression()?;
        if self.current != Token::Punct(')') {
            return Err(ParserError::ExpectedCloseParen(self.current.clone()));
        }
        self.advance();
        Ok(res)
    }

    fn parse_conditional(&mut self) -> PartialParseResult {
        self.advance();
        let cond = self.parse_expression()?;

        if self.current != Token::Then {
            return Err(ParserError::ExpectedThen(self.current.clone()));
        }
        self.advance();
        let then = self.parse_expression()?;

        if self.current != Token::Else {
            return Err(ParserError::ExpectedElse(self.current.clone()));
        }
        self.advance();
        let otherwise = self.parse_expression()?;

        Ok(Expression::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_primary(&mut self) -> PartialParseResult {
        match self.current {
            Token::Number(num) => self.parse_number(num),
            Token::Ident(ref ident) => {
                let ident = ident.clone();
                self.parse_identifier(ident)
            }
            Token::Punct('(') => self.parse_nested(),
            Token::If => self.parse_conditional(),
            ref other => Err(ParserError::UnexpectedToken(other.clone())),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: u32, lhs: Expression) -> PartialParseResult {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match self.current_operator() {
                Some((op, pr)) if pr >= expr_precedence => (op, pr),
                _ => return Ok(result),
            };
            self.advance();

            let mut rhs = self.parse_primary()?;

            if let Some((_, next_precedence)) = self.current_operator() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            result = Expression::Binary(operator, Box::new(result), Box::new(rhs));
        }
    }

    pub fn parse_expression(&mut self) -> PartialParseResult {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    fn parse_prototype(&mut self) -> Result<Prototype, ParserError> {
        let name = match self.current {
            Token::Ident(ref name) => name.clone(),
            ref other => return Err(ParserError::ExpectedFunctionName(other.clone())),
        };
        self.advance();

        if self.current != Token::Punct('(') {
            return Err(ParserError::ExpectedPrototypeOpen(self.current.clone()));
        }
        self.advance();

        let mut args: Vec<String> = Vec::new();
        loop {
            match self.current {
                Token::Ident(ref arg) => {
                    if args.contains(arg) {
                        return Err(ParserError::DuplicateParameter(name, arg.clone()));
                    }
                    args.push(arg.clone());
                }
                Token::Punct(',') => (),
                _ => break,
            }
            self.advance();
        }

        if self.current != Token::Punct(')') {
            return Err(ParserError::ExpectedPrototypeClose(self.current.clone()));
        }
        self.advance();

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&mut self) -> Result<Function, ParserError> {
        self.advance();
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> Result<Prototype, ParserError> {
        self.advance();
        self.parse_prototype()
    }

    pub fn parse_top_level_expression(&mut self) -> Result<Function, ParserError> {
        let body = self.parse_expression()?;
        Ok(Function {
            prototype: Prototype::anonymous(),
            body,
        })
    }
}

/// Strict whole-input parsing, used to check what the productions build.
#[cfg(test)]
impl<I: Iterator<Item = char>> Parser<I> {
    /// Parses everything up to end of input, stopping at the first error.
    pub(crate) fn parse_program(&mut self) -> Result<Vec<ASTNode>, ParserError> {
        let mut ast = Vec::new();

        loop {
            let node = match self.current {
                Token::Eof => break,
                Token::Punct(';') => {
                    self.advance();
                    continue;
                }
                Token::Def => ASTNode::Function(self.parse_definition()?),
                Token::Extern => ASTNode::Extern(self.parse_extern()?),
                _ => ASTNode::Function(self.parse_top_level_expression()?),
            };
            ast.push(node);
        }

        Ok(ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_expr(input: &str) -> PartialParseResult {
        Parser::from_source(input).parse_expression()
    }

    fn num(value: f64) -> Box<Expression> {
        Box::new(Expression::Number(value))
    }

    fn var(name: &str) -> Box<Expression> {
        Box::new(Expression::Variable(name.to_string()))
    }

    fn binary(op: char, lhs: Box<Expression>, rhs: Box<Expression>) -> Box<Expression> {
        Box::new(Expression::Binary(op, lhs, rhs))
    }

    #[test]
    fn parse_expr_works() {
        let res = parse_expr("x + 1 * (2 - 3)").unwrap();
        let target = binary('+', var("x"), binary('*', num(1.0), binary('-', num(2.0), num(3.0))));
        assert_eq!(Box::new(res), target);
    }

    #[test]
    fn higher_precedence_nests_right() {
        let res = parse_expr("1+2*3").unwrap();
        assert_eq!(Box::new(res), binary('+', num(1.0), binary('*', num(2.0), num(3.0))));
    }

    #[test]
    fn higher_precedence_nests_left() {
        let res = parse_expr("1*2+3").unwrap();
        assert_eq!(Box::new(res), binary('+', binary('*', num(1.0), num(2.0)), num(3.0)));
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        let res = parse_expr("1-2-3").unwrap();
        assert_eq!(Box::new(res), binary('-', binary('-', num(1.0), num(2.0)), num(3.0)));

        let res = parse_expr("8/4*2").unwrap();
        assert_eq!(Box::new(res), binary('*', binary('/', num(8.0), num(4.0)), num(2.0)));
    }

    #[test]
    fn comparisons_bind_loosest() {
        let res = parse_expr("a+1 < b*2").unwrap();
        assert_eq!(
            Box::new(res),
            binary('<', binary('+', var("a"), num(1.0)), binary('*', var("b"), num(2.0)))
        );
    }

    #[test]
    fn mixed_chain() {
        let res = parse_expr("1+2*3-4").unwrap();
        assert_eq!(
            Box::new(res),
            binary('-', binary('+', num(1.0), binary('*', num(2.0), num(3.0))), num(4.0))
        );
    }

    #[test]
    fn parses_calls() {
        let res = parse_expr("foo(1, x+2, bar())").unwrap();
        assert_eq!(
            res,
            Expression::Call(
                "foo".to_string(),
                vec![
                    Expression::Number(1.0),
                    *binary('+', var("x"), num(2.0)),
                    Expression::Call("bar".to_string(), vec![]),
                ]
            )
        );
    }

    #[test]
    fn parses_conditionals() {
        let res = parse_expr("if 1 then 2 else 3").unwrap();
        assert_eq!(res, Expression::Conditional(num(1.0), num(2.0), num(3.0)));

        let res = parse_expr("if x < 3 then 1 else if x > 5 then 2 else 3").unwrap();
        assert_eq!(
            res,
            Expression::Conditional(
                binary('<', var("x"), num(3.0)),
                num(1.0),
                Box::new(Expression::Conditional(
                    binary('>', var("x"), num(5.0)),
                    num(2.0),
                    num(3.0)
                )),
            )
        );
    }

    #[test]
    fn stops_after_expression() {
        let mut parser = Parser::from_source("1 + 2; 3");
        parser.parse_expression().unwrap();
        assert_eq!(parser.current(), &Token::Punct(';'));
    }

    #[test]
    fn reports_syntax_errors() {
        assert_eq!(
            parse_expr("foo(1 2)"),
            Err(ParserError::ExpectedArgDelimiter(Token::Number(2.0)))
        );
        assert_eq!(
            parse_expr("(1 + 2"),
            Err(ParserError::ExpectedCloseParen(Token::Eof))
        );
        assert_eq!(
            parse_expr("if 1 else 2"),
            Err(ParserError::ExpectedThen(Token::Else))
        );
        assert_eq!(
            parse_expr("if 1 then 2"),
            Err(ParserError::ExpectedElse(Token::Eof))
        );
        assert_eq!(
            parse_expr(")"),
            Err(ParserError::UnexpectedToken(Token::Punct(')')))
        );
    }

    #[test]
    fn failure_leaves_offending_token_current() {
        let mut parser = Parser::from_source("1 + ) 4");
        assert!(parser.parse_expression().is_err());
        assert_eq!(parser.current(), &Token::Punct(')'));
    }

    #[test]
    fn parses_definitions_and_externs() {
        let ast = Parser::from_source("extern sin(x); def add(a, b) a + b; add(1, 2)")
            .parse_program()
            .unwrap();
        assert_eq!(
            ast,
            vec![
                ASTNode::Extern(Prototype {
                    name: "sin".to_string(),
                    args: vec!["x".to_string()],
                }),
                ASTNode::Function(Function {
                    prototype: Prototype {
                        name: "add".to_string(),
                        args: vec!["a".to_string(), "b".to_string()],
                    },
                    body: *binary('+', var("a"), var("b")),
                }),
                ASTNode::Function(Function {
                    prototype: Prototype::anonymous(),
                    body: Expression::Call(
                        "add".to_string(),
                        vec![Expression::Number(1.0), Expression::Number(2.0)]
                    ),
                }),
            ]
        );
    }

    #[test]
    fn prototype_errors() {
        assert_eq!(
            Parser::from_source("def 1(a) a").parse_definition(),
            Err(ParserError::ExpectedFunctionName(Token::Number(1.0)))
        );
        assert_eq!(
            Parser::from_source("extern foo a").parse_extern(),
            Err(ParserError::ExpectedPrototypeOpen(Token::Ident("a".to_string())))
        );
        assert_eq!(
            Parser::from_source("extern foo(a;").parse_extern(),
            Err(ParserError::ExpectedPrototypeClose(Token::Punct(';')))
        );
        assert_eq!(
            Parser::from_source("def foo(a, a) a").parse_definition(),
            Err(ParserError::DuplicateParameter("foo".to_string(), "a".to_string()))
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let source = "def fib(x) if x < 3 then 1 else fib(x-1)+fib(x-2); fib(10)";
        let first = Parser::from_source(source).parse_program().unwrap();
        let second = Parser::from_source(source).parse_program().unwrap();
        assert_eq!(first, second);
    }
}
