use thiserror::Error;

/// Why a subscription name could not be turned into a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("Missing ?")]
    MissingSeparator,

    #[error("Invalid JSON")]
    InvalidEncoding,

    #[error("Missing parameter \"table\"")]
    MissingTable,

    #[error("Missing parameter \"query\"")]
    MissingQuery,

    #[error("\"order\" and \"limit\" must be used together")]
    OrderLimitMismatch,

    #[error("Invalid parameter \"{0}\"")]
    InvalidParameter(&'static str),

    #[error("Malformed condition at index {0}")]
    MalformedCondition(usize),

    #[error("Unknown operator {0}")]
    UnknownOperator(String),

    #[error("'in' operator requires a JSON array")]
    InOperatorRequiresArray,

    #[error("Invalid pattern {0}")]
    InvalidPattern(String),
}

/// A rejected subscription name together with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("QUERY ERROR | {kind} (input: {input})")]
pub struct ParseError {
    pub input: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(input: &str, kind: ParseErrorKind) -> Self {
        Self { input: input.to_string(), kind }
    }
}

/// Errors surfaced by the database or list-publishing collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("change feed failed: {0}")]
    Feed(String),

    #[error("publish failed: {0}")]
    Publish(String),
}

/// Terminal failures of a single search session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Error while retrieving initial value: {0}")]
    InitialRetrieval(BackendError),

    #[error("Error while receiving change notification: {0}")]
    ChangeNotification(BackendError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Registry invariant violated: {0}")]
    RegistryInvariant(String),
}
