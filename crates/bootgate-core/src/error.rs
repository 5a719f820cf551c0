use thiserror::Error;

/// Coarse classification used to decide whether a failure is retried,
/// blocks dependents, or is a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The database is not accepting connections yet. Absorbed by the prober.
    TransientUnavailable,
    /// Bad credential, missing privilege, invalid config. Never retried.
    ConfigurationFatal,
    /// An external tool (migration apply) exited non-zero. Never retried here.
    ExternalToolFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum BootgateError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid identifier '{0}': must match [A-Za-z_][A-Za-z0-9_]{{0,62}}")]
    InvalidIdentifier(String),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("duplicate unit: {0}")]
    DuplicateUnit(String),

    #[error("unit '{unit}' requires unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("invalid transition for unit '{unit}' from {from} to {to}")]
    InvalidTransition {
        unit: String,
        from: String,
        to: String,
    },

    #[error("database unavailable at {target}: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("database at {target} not ready after {attempts} attempts")]
    ProbeTimedOut { target: String, attempts: u32 },

    #[error("bootstrap step '{step}' failed: {reason}")]
    BootstrapStep { step: String, reason: String },

    #[error("migration tool not found: {0}")]
    MigrationToolMissing(String),

    #[error("failed to spawn migration tool: {0}")]
    MigrationSpawn(String),

    #[error("migration apply exited with {}", exit_label(.code))]
    MigrationFailed { code: Option<i32> },

    #[error("failed to launch unit '{unit}': {reason}")]
    LaunchFailed { unit: String, reason: String },

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

impl BootgateError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BootgateError::Unavailable { .. } => ErrorClass::TransientUnavailable,
            BootgateError::MigrationFailed { .. }
            | BootgateError::MigrationSpawn(_)
            | BootgateError::MigrationToolMissing(_)
            | BootgateError::LaunchFailed { .. } => ErrorClass::ExternalToolFailure,
            BootgateError::ConfigNotFound(_)
            | BootgateError::InvalidConfig(_)
            | BootgateError::InvalidIdentifier(_)
            | BootgateError::SecretNotFound(_)
            | BootgateError::UnitNotFound(_)
            | BootgateError::DuplicateUnit(_)
            | BootgateError::UnknownDependency { .. }
            | BootgateError::DependencyCycle(_)
            | BootgateError::ProbeTimedOut { .. }
            | BootgateError::BootstrapStep { .. }
            | BootgateError::Sql(_)
            | BootgateError::Url(_)
            | BootgateError::Yaml(_) => ErrorClass::ConfigurationFatal,
            BootgateError::InvalidTransition { .. }
            | BootgateError::Io(_)
            | BootgateError::Json(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootgateError>;
