//! Errors surfaced by flows.

use std::error::Error;
use std::fmt;
use std::io;

/// An error delivered to a flow handler.
///
/// Transport errors from the lower flow are passed through verbatim;
/// every TLS engine failure collapses into the one general [`Tls`]
/// variant at this boundary. Cancellation is not an error: a canceled
/// operation's handler is simply never invoked.
///
/// [`Tls`]: FlowError::Tls
#[derive(Debug)]
pub enum FlowError {
    /// An error from the inner transport flow.
    Io(io::Error),
    /// A TLS handshake or record-layer failure.
    Tls(String),
}

impl FlowError {
    /// The general TLS failure with an engine-supplied description.
    pub fn tls(detail: impl Into<String>) -> FlowError {
        FlowError::Tls(detail.into())
    }

    /// Whether this is a TLS engine failure rather than a transport
    /// error.
    pub fn is_tls(&self) -> bool {
        matches!(self, FlowError::Tls(_))
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Io(err) => write!(f, "{}", err),
            FlowError::Tls(detail) => write!(f, "tls error: {}", detail),
        }
    }
}

impl Error for FlowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FlowError::Io(err) => Some(err),
            FlowError::Tls(_) => None,
        }
    }
}

impl From<io::Error> for FlowError {
    fn from(err: io::Error) -> FlowError {
        FlowError::Io(err)
    }
}
