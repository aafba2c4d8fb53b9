//! Top-level error types for Chime.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading and rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render persona for preference key '{key}': {source}")]
    PersonaRender {
        key: String,
        source: minijinja::Error,
    },
}

/// Lifecycle pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("hook '{hook}' failed: {source}")]
    HookFailed {
        hook: String,
        source: anyhow::Error,
    },
}

/// Proactive engine and LLM collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("llm request failed: {0}")]
    LlmRequest(String),

    #[error("malformed llm response: {0}")]
    MalformedResponse(String),

    #[error("knowledge retrieval failed: {0}")]
    Retrieval(String),
}

/// Database and archival errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to archive thread {thread_id}: {source}")]
    Archive {
        thread_id: crate::ThreadId,
        source: sqlx::Error,
    },
}
