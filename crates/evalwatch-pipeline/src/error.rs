use evalwatch_store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineErrorCode {
    StoreWrite,
    Config,
    InvalidEvent,
    Internal,
}

impl PipelineErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoreWrite => "store_write",
            Self::Config => "config",
            Self::InvalidEvent => "invalid_event",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
    pub code: PipelineErrorCode,
    pub message: String,
}

impl PipelineError {
    #[must_use]
    pub fn new(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PipelineError {}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::new(PipelineErrorCode::StoreWrite, e.to_string())
    }
}
