use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("lex error at {line}:{col}: {message}")]
    Lex { line: u32, col: u32, message: String },
    #[error("parse error at {line}:{col}: {message}")]
    Parse { line: u32, col: u32, message: String },
    #[error("rewrite rule '{rule}' violated an invariant: {message}")]
    RewriteInvariant { rule: &'static str, message: String },
    #[error("node '{node}' reached the backend without a location")]
    MissingLocation { node: &'static str },
    #[error("invalid timestamp format '{0}'")]
    InvalidStampFormat(String),
    #[error("{source_name}:{line}:{col}: compilation error: {message}")]
    Compilation {
        source_name: String,
        line: u32,
        col: u32,
        message: String,
    },
    #[error("failed to instantiate compiled unit: {0}")]
    Instantiation(wasmi::Error),
    #[error("{0}")]
    Execution(wasmi::Error),
}

impl CoreError {
    /// Returns true for errors raised by the executed program itself.
    pub fn is_execution_fault(&self) -> bool {
        matches!(self, CoreError::Execution(_))
    }
}
