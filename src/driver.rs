use crate::ast::ASTNode;
use crate::codegen::Codegen;
use crate::error::CompileError;
use crate::lexer::Token;
use crate::parser::{Parser, ParserError};

/// What a compilation run got through.
#[derive(Debug, Default)]
pub struct Summary {
    pub definitions: usize,
    pub externs: usize,
    pub expressions: usize,
    /// results of the top-level expressions, only filled when evaluating
    pub values: Vec<f64>,
    pub errors: Vec<CompileError>,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Feeds top-level units from the parser into code generation until the input runs out.
///
/// A failing unit is logged and recorded, then compilation carries on. After a syntax
/// error the offending token is skipped; this can produce follow-up errors while the
/// parser resynchronises.
pub struct Driver<'c, 'ctx, I: Iterator<Item = char>> {
    parser: Parser<I>,
    codegen: &'c mut Codegen<'ctx>,
    evaluate: bool,
}

impl<'c, 'ctx, I: Iterator<Item = char>> Driver<'c, 'ctx, I> {
    pub fn new(parser: Parser<I>, codegen: &'c mut Codegen<'ctx>) -> Self {
        Driver {
            parser,
            codegen,
            evaluate: false,
        }
    }

    /// JIT-run every top-level expression right after generating it.
    pub fn evaluate(mut self, evaluate: bool) -> Self {
        self.evaluate = evaluate;
        self
    }

    pub fn run(mut self) -> Summary {
        let mut summary = Summary::default();

        loop {
            let node = match self.parser.current() {
                Token::Eof => break,
                Token::Punct(';') => {
                    self.parser.advance();
                    continue;
                }
                Token::Def => self.parse(Parser::parse_definition).map(ASTNode::Function),
                Token::Extern => self.parse(Parser::parse_extern).map(ASTNode::Extern),
                _ => self
                    .parse(Parser::parse_top_level_expression)
                    .map(ASTNode::Function),
            };

            if let Err(err) = node.and_then(|node| self.compile(node, &mut summary)) {
                log::error!("{:?} error: {}", err.kind(), err);
                summary.errors.push(err);
            }
        }

        log::info!(
            "compiled {} definitions, {} externs and {} expressions",
            summary.definitions,
            summary.externs,
            summary.expressions
        );
        summary
    }

    /// Runs a production, skipping the token it stopped on if it fails.
    fn parse<T>(
        &mut self,
        production: impl FnOnce(&mut Parser<I>) -> Result<T, ParserError>,
    ) -> Result<T, CompileError> {
        let result = production(&mut self.parser);
        result.map_err(|err| {
            self.parser.advance();
            err.into()
        })
    }

    fn compile(&mut self, node: ASTNode, summary: &mut Summary) -> Result<(), CompileError> {
        match node {
            ASTNode::Extern(proto) => {
                log::debug!("declared extern {}", proto.name);
                self.codegen.declare_extern(proto)?;
                summary.externs += 1;
            }
            ASTNode::Function(function) if function.prototype.is_anonymous() => {
                let compiled = self.codegen.compile_fn(function)?;
                summary.expressions += 1;

                if self.evaluate {
                    let value = self.codegen.evaluate(compiled)?;
                    log::info!("evaluated to {}", value);
                    summary.values.push(value);
                }
            }
            ASTNode::Function(function) => {
                self.codegen.compile_fn(function)?;
                summary.definitions += 1;
            }
        }

        Ok(())
    }
}
