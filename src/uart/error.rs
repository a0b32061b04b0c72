/// Error types for the serial link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Cannot open serial port {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial link lost: {0}")]
    Disconnected(String),

    #[error("Framing error: {len} bytes buffered without a line terminator")]
    Framing { len: usize },

    #[error("Malformed message {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("Write attempted on closed transport")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    pub(crate) fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
