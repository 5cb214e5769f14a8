#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown comparison operator: '{0}'")]
    UnknownOperator(String),

    #[error("Unknown metric name: '{0}'")]
    UnknownMetric(String),
}
