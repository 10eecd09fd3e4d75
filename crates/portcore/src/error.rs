use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Activity error: {0}")]
    Activity(#[from] ActivityError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid value for parameter '{name}': expected {expected}, got '{actual}'")]
    InvalidParameter {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown port '{0}'")]
    UnknownPort(String),

    #[error("Port '{port}' expects {expected} data, got {actual}")]
    PortTypeMismatch {
        port: String,
        expected: String,
        actual: String,
    },

    #[error("Port '{0}' is an input port and cannot be fired")]
    NotAnOutputPort(String),

    #[error("Value error: {0}")]
    Value(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Invalid flow: {0}")]
    Invalid(String),

    #[error("Cycle through '{0}' is not closed by a loop-back connection")]
    UnbrokenCycle(String),

    #[error("Activity not found: {0}")]
    ActivityNotFound(String),

    #[error("Duplicate activity id: {0}")]
    DuplicateActivity(String),

    #[error("Unknown activity type: {0}")]
    UnknownActivityType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Activity '{activity}' is missing required parameter '{parameter}'")]
    MissingParameter {
        activity: String,
        parameter: String,
    },

    #[error("Activity '{activity}' has no parameter named '{parameter}'")]
    UnknownParameter {
        activity: String,
        parameter: String,
    },

    #[error("No execution strategy for {0} activities")]
    NoStrategy(String),
}
