use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse class of a failed exchange, written as the `error` tag on `http_*` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The request could not be built; nothing was sent.
    InvalidRequest,
    Connect,
    Send,
    Timeout,
    Body,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot parse url `{0}`")]
    InvalidUrl(String),

    #[error("url `{0}` must use http or https")]
    UnsupportedScheme(String),

    #[error("bad header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("cannot assemble request: {0}")]
    Assemble(#[from] http::Error),

    #[error("exchange failed: {0}")]
    Exchange(#[from] hyper_util::client::legacy::Error),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    #[error("response body interrupted: {0}")]
    Body(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::HeaderName(_)
            | Self::HeaderValue(_)
            | Self::Assemble(_) => FailureKind::InvalidRequest,
            Self::Exchange(e) if e.is_connect() => FailureKind::Connect,
            Self::Exchange(_) => FailureKind::Send,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Body(_) => FailureKind::Body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_problems_are_invalid_requests() {
        let err = Error::UnsupportedScheme("ftp://x".to_string());
        assert_eq!(err.kind(), FailureKind::InvalidRequest);
        assert_eq!(err.kind().to_string(), "invalid_request");

        let err = Error::Timeout(Duration::from_millis(50));
        let tag: &'static str = err.kind().into();
        assert_eq!(tag, "timeout");
    }
}
