use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("unknown source alias: {0}")]
    UnknownAlias(String),

    #[error("unknown field: {alias}.{field}")]
    UnknownField { alias: String, field: String },

    #[error("comparison operator {op:?} requires a right-hand operand")]
    MissingOperand { op: String },

    #[error("expected an array operand for {op}")]
    ExpectedArrayOperand { op: String },

    #[error("invalid like pattern: {0}")]
    InvalidLikePattern(String),

    #[error("data source error: {0}")]
    DataSource(#[from] anyhow::Error),
}
