use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The eight error kinds the dispatch pipeline can surface, used both for
/// the HTTP status mapping below and for the `errorKind` column on a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientError,
    GatewayError,
    UpstreamError,
    NoCredential,
    NoModel,
    Timeout,
    Cancelled,
    ImageFetchError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ClientError => "client_error",
            ErrorKind::GatewayError => "gateway_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::NoCredential => "no_credential",
            ErrorKind::NoModel => "no_model",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ImageFetchError => "image_fetch_error",
        }
    }
}

/// Errors surfaced by the dispatch core. Every variant carries enough to
/// derive an [`ErrorKind`], an HTTP status, and a client-safe message.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("invalid model selector: {0}")]
    InvalidModelFormat(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("model is no longer available: {0}")]
    ModelDeactivated(String),
    #[error("no usable credential for provider {0}")]
    NoCredential(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed with upstream provider")]
    AuthenticationFailed,
    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },
    #[error("insufficient quota with upstream provider")]
    InsufficientQuota,
    #[error("streaming is not supported for this model")]
    StreamingNotSupported,
    #[error("upstream provider returned status {status}: {message}")]
    ProviderApiError { status: u16, message: String },
    #[error("failed to reach upstream provider: {0}")]
    ConnectionError(String),
    #[error("request exceeded the dispatch deadline")]
    Timeout,
    #[error("the downstream caller disconnected")]
    Cancelled,
    #[error("failed to fetch or decode an image input")]
    ImageFetchError,
    #[error("internal error")]
    InternalError(Option<String>),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::InvalidModelFormat(_) | LlmError::InvalidRequest(_) => ErrorKind::ClientError,
            LlmError::ModelNotFound(_) | LlmError::ModelDeactivated(_) => ErrorKind::NoModel,
            LlmError::NoCredential(_) => ErrorKind::NoCredential,
            LlmError::AuthenticationFailed
            | LlmError::InsufficientQuota
            | LlmError::StreamingNotSupported
            | LlmError::RateLimitExceeded { .. } => ErrorKind::GatewayError,
            LlmError::ProviderApiError { status, .. } if *status >= 500 => ErrorKind::UpstreamError,
            LlmError::ProviderApiError { .. } | LlmError::ConnectionError(_) | LlmError::InternalError(_) => {
                ErrorKind::GatewayError
            }
            LlmError::Timeout => ErrorKind::Timeout,
            LlmError::Cancelled => ErrorKind::Cancelled,
            LlmError::ImageFetchError => ErrorKind::ImageFetchError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LlmError::InvalidModelFormat(_) | LlmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            LlmError::ModelNotFound(_) | LlmError::ModelDeactivated(_) => StatusCode::NOT_FOUND,
            LlmError::NoCredential(_) | LlmError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            LlmError::InsufficientQuota => StatusCode::PAYMENT_REQUIRED,
            LlmError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LlmError::StreamingNotSupported => StatusCode::BAD_REQUEST,
            LlmError::ProviderApiError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            LlmError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            LlmError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            LlmError::Cancelled => StatusCode::BAD_REQUEST,
            LlmError::ImageFetchError => StatusCode::UNPROCESSABLE_ENTITY,
            LlmError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// A message safe to return to the caller. Never includes upstream
    /// secrets, and never includes a fetched image's URL.
    pub fn client_message(&self) -> String {
        match self {
            LlmError::InternalError(Some(msg)) => msg.clone(),
            LlmError::InternalError(None) => "internal error".to_owned(),
            other => other.to_string(),
        }
    }

    /// Classifies a provider HTTP response into an [`LlmError`], mirroring the
    /// same status-code table every provider-shape in this crate uses.
    pub fn from_provider_status(status: u16, body: &str) -> LlmError {
        match status {
            401 => LlmError::AuthenticationFailed,
            403 => LlmError::InsufficientQuota,
            404 => LlmError::ModelNotFound(body.to_owned()),
            429 => LlmError::RateLimitExceeded { message: body.to_owned() },
            400 if body.to_lowercase().contains("json") => LlmError::InvalidRequest(body.to_owned()),
            500..=599 => LlmError::ProviderApiError { status, message: body.to_owned() },
            _ => LlmError::ProviderApiError { status, message: body.to_owned() },
        }
    }
}

#[derive(Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_owned(),
                code: Some(status.as_u16().to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}
