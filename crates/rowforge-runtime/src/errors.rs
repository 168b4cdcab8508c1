use thiserror::Error;

use rowforge_core::RowId;

use crate::output::OutputError;

/// Errors emitted by the recipe runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Forward references allocated during a pass that no row claimed.
    #[error("Reference(s) not fulfilled: {}", .names.join(","))]
    UnresolvedReference { names: Vec<String> },
    /// The stopping table did not grow during a full pass.
    #[error(
        "{table} max ID was {previous} before evaluating recipe and is {current} after. At this rate we will never hit our target of {target}!"
    )]
    NoProgress {
        table: String,
        previous: RowId,
        current: RowId,
        target: RowId,
    },
    #[error("Scope must be \"current-iteration\" or \"prior-and-current-iterations\" not {0:?}")]
    UnknownScope(String),
    #[error("There is no table or nickname `{0}` at this point in the recipe.")]
    MissingName(String),
    #[error("Cannot find a definition for `{0}`")]
    UnknownName(String),
    #[error("{table}({id}) has not been generated yet; forward references can only be stored, not read")]
    NotYetGenerated { table: String, id: RowId },
    #[error("history consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("malformed continuation: {0}")]
    MalformedContinuation(String),
    #[error("slot `{name}` cannot be {action} while {state}")]
    SlotContract {
        name: String,
        action: &'static str,
        state: &'static str,
    },
    #[error("unique random references cannot target nickname `{0}`")]
    UniqueAlias(String),
    #[error("no unused rows of `{0}` remain for a unique random reference")]
    UniqueExhausted(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("option `{0}` is required and has no default")]
    MissingOption(String),
    #[error("provider `{name}` failed: {message}")]
    Provider { name: String, message: String },
    /// Wraps an error with the field being evaluated when it happened.
    #[error("{table}.{field}{}: {source}", .line.map(|line| format!(" (line {line})")).unwrap_or_default())]
    Field {
        table: String,
        field: String,
        line: Option<u32>,
        #[source]
        source: Box<RuntimeError>,
    },
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("history store error: {0}")]
    History(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Attach the location of the field being evaluated.
    pub fn in_field(self, table: &str, field: &str, line: Option<u32>) -> Self {
        match self {
            located @ RuntimeError::Field { .. } => located,
            other => RuntimeError::Field {
                table: table.to_string(),
                field: field.to_string(),
                line,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, without field location wrappers.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<rowforge_core::Error> for RuntimeError {
    fn from(err: rowforge_core::Error) -> Self {
        RuntimeError::InvalidValue(err.to_string())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
