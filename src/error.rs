//! Error handling for the radar driver
//!
//! Every fallible operation returns [`Result`], carrying one [`RadarError`]
//! kind. Kinds are never converted into one another on the way up; context
//! wrapping keeps the original kind reachable through [`RadarError::root`].

use thiserror::Error;

/// Main error type for driver operations
#[derive(Error, Debug)]
pub enum RadarError {
    #[error("argument null: {0}")]
    ArgumentNull(String),

    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    #[error("argument out of bounds: {0}")]
    ArgumentOutOfBounds(String),

    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("memory allocation failed")]
    MemoryAllocationFailed,

    #[error("insufficient memory")]
    InsufficientMemory,

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("not possible: {0}")]
    NotPossible(String),

    #[error("no device")]
    NoDevice,

    #[error("device busy")]
    DeviceBusy,

    /// Generic link failure reported by a transport
    #[error("communication error: {0}")]
    Communication(String),

    #[error("timeout")]
    Timeout,

    #[error("fifo overflow")]
    FifoOverflow,

    #[error("frame acquisition failed")]
    FrameAcquisitionFailed,

    #[error("frame size not supported")]
    FrameSizeNotSupported,

    #[error("not configured")]
    NotConfigured,

    #[error("firmware version not supported: {0}")]
    FirmwareVersionNotSupported(String),

    #[error("device not supported: {0}")]
    DeviceNotSupported(String),

    // Parameter range kinds reported by the sensor profiles
    #[error("number of samples out of range")]
    NumSamplesOutOfRange,

    #[error("rx antenna combination not allowed")]
    RxAntennaCombinationNotAllowed,

    #[error("tx antenna mode not allowed")]
    TxAntennaModeNotAllowed,

    #[error("if gain out of range")]
    IfGainOutOfRange,

    #[error("sample rate out of range")]
    SamplerateOutOfRange,

    #[error("rf frequency out of range")]
    RfOutOfRange,

    #[error("tx power out of range")]
    TxPowerOutOfRange,

    #[error("chirp rate out of range")]
    ChirpRateOutOfRange,

    #[error("frame rate out of range")]
    FrameRateOutOfRange,

    #[error("number of chirps not allowed")]
    NumChirpsNotAllowed,

    // File and format kinds
    #[error("error opening file: {0}")]
    OpeningFile(String),

    #[error("file invalid: {0}")]
    FileInvalid(String),

    #[error("format unknown: {0}")]
    FormatUnknown(String),

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("invalid json key: {0}")]
    InvalidJsonKey(String),

    #[error("invalid json value: {0}")]
    InvalidJsonValue(String),

    #[error("unexpected end of file")]
    EndOfFile,

    #[error("missing interface: {0}")]
    MissingInterface(String),

    /// Unclassified failure
    #[error("error: {0}")]
    Generic(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RadarError>,
    },
}

impl RadarError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RadarError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify a serde_json error into the json error kinds
    pub fn from_json_error(err: serde_json::Error) -> Self {
        use serde_json::error::Category;
        let message = err.to_string();
        match err.classify() {
            Category::Data if message.contains("missing field") || message.contains("unknown field") => {
                RadarError::InvalidJsonKey(message)
            }
            Category::Data => RadarError::InvalidJsonValue(message),
            Category::Eof => RadarError::EndOfFile,
            Category::Io => RadarError::OpeningFile(message),
            Category::Syntax => RadarError::InvalidJson(message),
        }
    }

    /// The innermost error, skipping any context layers
    pub fn root(&self) -> &RadarError {
        match self {
            RadarError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a later call may succeed without reconfiguring the device
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), RadarError::Timeout)
    }
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, RadarError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
