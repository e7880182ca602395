use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum RelayError {
    // Registry errors
    AddressBanned(IpAddr),
    SessionLock(String),

    // Messages errors
    MessageParseError(String),
    MessageTooLarge(usize),

    // Classifier errors
    ClassifierError(String),
    ClassifierTimeout,

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressBanned(ip) => write!(f, "Address is banned: {}", ip),
            Self::SessionLock(msg) => write!(f, "Session lock error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::ClassifierError(msg) => write!(f, "Classifier error: {}", msg),
            Self::ClassifierTimeout => write!(f, "Classifier did not answer in time"),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for RelayError {
    fn from(err: PoisonError<T>) -> Self {
        RelayError::SessionLock(format!("Mutex poisoned: {}", err))
    }
}

// The request URL is stripped so endpoint details never reach the logs
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            RelayError::ClassifierTimeout
        } else {
            RelayError::ClassifierError(err.to_string())
        }
    }
}

// Generic result type for the relay
pub type Result<T> = std::result::Result<T, RelayError>;
