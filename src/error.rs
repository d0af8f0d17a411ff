//! Error handling for the remote node exporter.

/// A specialized `Result` type for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// The main error type for exporter operations.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// Establishing the remote channel failed (transport or authentication)
    #[error("Connect error: {0}")]
    Connect(String),

    /// A remote command could not be run, even after reconnecting
    #[error("Exec error: {0}")]
    Exec(String),

    /// Remote text did not have the expected numeric or textual shape
    #[error("Format error: {0}")]
    Format(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExporterError {
    /// Create a new connect error
    pub fn connect_error(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a new exec error
    pub fn exec_error(msg: impl Into<String>) -> Self {
        Self::Exec(msg.into())
    }

    /// Create a new format error
    pub fn format_error(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Whether this error came from the remote transport rather than parsing.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Exec(_))
    }
}
