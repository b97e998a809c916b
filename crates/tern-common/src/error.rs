use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration {migration} failed: {message}")]
    Execution { migration: String, message: String },

    #[error("{}", verification_message(.migration, .message, .revert_error))]
    Verification {
        migration: String,
        message: String,
        revert_error: Option<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process exit code for a CLI run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Lock(_) => 3,
            Error::Database(_) | Error::Execution { .. } => 4,
            Error::Verification { .. } => 5,
            Error::Io(_) | Error::Serialization(_) | Error::Other(_) => 1,
        }
    }

    /// Whether the database may be left in a state that needs an operator:
    /// a migration failed verification and its cleanup revert failed too.
    pub fn needs_intervention(&self) -> bool {
        matches!(
            self,
            Error::Verification {
                revert_error: Some(_),
                ..
            }
        )
    }
}

fn verification_message(migration: &str, message: &str, revert_error: &Option<String>) -> String {
    match revert_error {
        None => format!("migration {migration} failed verification: {message} (reverted)"),
        Some(revert) => format!(
            "migration {migration} failed verification: {message}; \
             cleanup revert also failed: {revert}. \
             The schema may be inconsistent and needs manual repair"
        ),
    }
}
