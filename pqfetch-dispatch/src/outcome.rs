use crate::error::TransportError;
use crate::transport::FetchResponse;

/// Terminal result of one dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(FetchResponse),
    Failure { message: String },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<FetchResponse, TransportError>> for Outcome {
    fn from(result: Result<FetchResponse, TransportError>) -> Self {
        match result {
            Ok(response) => Self::Success(response),
            Err(err) => Self::failure(err.to_string()),
        }
    }
}
