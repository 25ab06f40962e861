use crate::codegen::CodegenError;
use crate::parser::ParserError;

/// Broad category of a failed top-level unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Resolution,
    Arity,
    Redefinition,
    Verification,
    Execution,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParserError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Syntax(_) => ErrorKind::Syntax,
            CompileError::Codegen(err) => match err {
                CodegenError::UnknownVariable(_)
                | CodegenError::UnknownOperator(_)
                | CodegenError::UnknownFunction(_) => ErrorKind::Resolution,
                CodegenError::InvalidCall(..) => ErrorKind::Arity,
                CodegenError::Redefinition(_) | CodegenError::IncompatibleRedefinition(..) => {
                    ErrorKind::Redefinition
                }
                CodegenError::InvalidFunction(_)
                | CodegenError::NoInsertBlock
                | CodegenError::NoValue(_) => ErrorKind::Verification,
                CodegenError::ExecutionEngine(_) => ErrorKind::Execution,
            },
        }
    }
}
