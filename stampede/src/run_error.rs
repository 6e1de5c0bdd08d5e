use crate::exit_codes::ExitCode;

/// A failure that ends `stampede run` before a verdict exists, tagged with its exit code.
#[derive(Debug)]
pub struct RunError {
    code: ExitCode,
    cause: anyhow::Error,
}

impl RunError {
    /// Bad flags, an unreadable or invalid scenario. No traffic was generated.
    pub fn invalid_input(cause: impl Into<anyhow::Error>) -> Self {
        Self {
            code: ExitCode::InvalidInput,
            cause: cause.into(),
        }
    }

    pub fn runtime(cause: impl Into<anyhow::Error>) -> Self {
        Self {
            code: ExitCode::RuntimeError,
            cause: cause.into(),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.code
    }
}

impl From<stampede_core::Error> for RunError {
    fn from(err: stampede_core::Error) -> Self {
        if matches!(err, stampede_core::Error::Config(_)) {
            Self::invalid_input(err)
        } else {
            Self::runtime(err)
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.cause)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}
