use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("invalid remote configuration: {0}")]
    Configuration(String),

    #[error("connection to {remote} failed: {message}")]
    Connection { remote: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote already exists: {0}")]
    NameConflict(String),

    #[error("remote {0} is listed in the default try-list")]
    #[diagnostic(help("drop it from the default list before removing it"))]
    InUse(String),

    #[error("missing value for parameter `{param}` of registry {registry}")]
    MissingParameter { registry: String, param: String },

    #[error("registry {registry} has no parameter `{param}`")]
    UnknownParameter { registry: String, param: String },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("registry {0} already exists on the remote with a different parameter schema")]
    SchemaMismatch(String),

    #[error("{registry} ({assignment}) was not found on any default remote")]
    NotFoundAnywhere {
        registry: String,
        assignment: String,
    },

    #[error("failed to read config file: {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RegistryError {
    pub fn connection(remote: impl Into<String>, message: impl Into<String>) -> Self {
        RegistryError::Connection {
            remote: remote.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}
