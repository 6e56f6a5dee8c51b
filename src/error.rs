use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to load configuration: {source}"))]
    Env {
        #[snafu(source)]
        source: envy::Error,
    },

    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("Malformed message: {source}"))]
    Decode {
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Failed to serialize {what}: {source}"))]
    Serialize {
        what: &'static str,
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Stored document for {msg_id} is corrupt: {source}"))]
    CorruptDocument {
        msg_id: String,
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    MigrationError {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("Transport error: {message}"))]
    Transport {
        message: String,
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Enrichment failed for {msg_id}: {message}"))]
    Enrichment { msg_id: String, message: String },

    #[snafu(display("Admission gate is closed"))]
    GateClosed,

    #[snafu(display("Inflight registry is closed"))]
    RegistryClosed,

    #[snafu(display("Drain deadline elapsed with {remaining} task(s) in flight"))]
    DrainTimeout { remaining: usize },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError { source }
    }
}

impl From<envy::Error> for Error {
    fn from(source: envy::Error) -> Self {
        Self::Env { source }
    }
}

impl Error {
    pub fn transport(message: impl Into<String>, e: impl Into<eyre::Report>) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(e.into()),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn enrichment(msg_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Enrichment {
            msg_id: msg_id.into(),
            message: message.into(),
        }
    }

    pub fn serialize(what: &'static str, source: serde_json::Error) -> Self {
        Self::Serialize { what, source }
    }

    /// Whether this error means the message itself can never be processed.
    ///
    /// Only inbound decode failures qualify. Failures to serialize outbound
    /// data are retried like any other processing error.
    pub fn is_unprocessable(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
