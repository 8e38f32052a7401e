use blog_core::{ContentError, LanguageModelError, PhotoSearchError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl AdapterError {
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        AdapterError::HttpStatus { status, body }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AdapterError::HttpStatus { status, .. } => Some(*status),
            AdapterError::Http(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }

    /// The request went out but no usable answer came back, so the server
    /// may have acted on it.
    pub fn may_have_been_applied(&self) -> bool {
        match self {
            AdapterError::Http(err) => {
                err.status().is_none() && !err.is_connect() && !err.is_builder()
            }
            _ => false,
        }
    }

    /// Network failures, timeouts, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Http(err) if err.status().is_none() => true,
            AdapterError::EmptyResponse => true,
            _ => matches!(
                self.status(),
                Some(status) if status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
            ),
        }
    }
}

impl From<AdapterError> for LanguageModelError {
    fn from(err: AdapterError) -> Self {
        if err.is_authentication() || matches!(err, AdapterError::InvalidConfig(_)) {
            LanguageModelError::permanent(err)
        } else {
            LanguageModelError::new(err)
        }
    }
}

impl From<AdapterError> for PhotoSearchError {
    fn from(err: AdapterError) -> Self {
        PhotoSearchError::new(err)
    }
}

impl From<AdapterError> for ContentError {
    fn from(err: AdapterError) -> Self {
        if err.is_authentication() {
            ContentError::authentication(err)
        } else if err.may_have_been_applied() {
            ContentError::unconfirmed(err)
        } else if err.is_transient() {
            ContentError::transient(err)
        } else {
            ContentError::rejected(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: StatusCode) -> AdapterError {
        AdapterError::HttpStatus {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        for code in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            assert!(matches!(
                ContentError::from(status(code)),
                ContentError::Authentication(_)
            ));
            assert!(!LanguageModelError::from(status(code)).is_retriable());
        }
    }

    #[test]
    fn server_errors_are_transient() {
        for code in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(matches!(
                ContentError::from(status(code)),
                ContentError::Transient(_)
            ));
            assert!(LanguageModelError::from(status(code)).is_retriable());
        }
    }

    #[test]
    fn other_client_errors_are_rejections() {
        assert!(matches!(
            ContentError::from(status(StatusCode::BAD_REQUEST)),
            ContentError::Rejected(_)
        ));
    }
}
