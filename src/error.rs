use thiserror::Error;

/// Status codes returned by the sampling services.
///
/// The values follow the BSD `sysexits` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    DataErr = 65,
    Software = 70,
    Config = 78,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code.as_i32()
    }
}

#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Initialization between (-{radius}, {radius}) failed after {attempts} attempts")]
    Initialization { radius: f64, attempts: usize },
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Could not find a usable step size: {0}")]
    BadStepSize(String),
    #[error("Failed to write sampler output")]
    Output(#[from] std::io::Error),
    #[error("Chain {chain} failed")]
    ChainFailed {
        chain: u64,
        #[source]
        source: Box<NutsError>,
    },
}

impl NutsError {
    /// The service status code this error is reported as.
    ///
    /// Initialization failures have a code of their own so that callers can
    /// tell a bad starting point apart from a broken model or configuration.
    pub fn code(&self) -> ErrorCode {
        match self {
            NutsError::Config(_) => ErrorCode::Config,
            NutsError::Initialization { .. } => ErrorCode::DataErr,
            NutsError::ChainFailed { source, .. } => source.code(),
            _ => ErrorCode::Software,
        }
    }
}

pub type Result<T> = std::result::Result<T, NutsError>;
