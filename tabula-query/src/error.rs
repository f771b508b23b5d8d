use sqlparser::parser::ParserError;

#[derive(Debug, thiserror::Error)]
/// An error that can occur while parsing query text.
pub enum ParseError {
    #[error("Syntax Error: {0}")]
    Syntax(String),
    #[error("Unsupported expression: {0}")]
    /// The text is valid SQL but uses a construct with no meaning
    /// within a table query.
    Unsupported(String),
    #[error("Invalid assignment {0:?}, expected `name := expression`")]
    InvalidAssignment(String),
    #[error("A projection must either assign every item or none of them")]
    MixedProjection,
    #[error("The {0} is empty")]
    Empty(&'static str),
}

impl From<ParserError> for ParseError {
    fn from(err: ParserError) -> Self {
        Self::Syntax(err.to_string())
    }
}
