//! Process exit codes for stow
//!
//! Scripts depend on these values; changing one is a breaking change.

use stowage_core::Error;

/// How a `stow` invocation ended.
///
/// Library errors map onto these through [`Error::exit_code`], so a failed
/// request exits with the same code whichever command issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Anything without a more specific code, including integrity failures
    GeneralError = 1,

    /// Bad arguments, an unparsable path or an invalid config file
    UsageError = 2,

    /// The service could not be reached, or kept failing after retries
    NetworkError = 3,

    /// Credentials were rejected (401/403)
    AuthError = 4,

    /// Unknown alias, bucket or key
    NotFound = 5,

    /// The target exists already or a precondition did not hold
    Conflict = 6,

    /// The service answered 501 Not Implemented
    UnsupportedFeature = 7,

    /// Stopped by Ctrl+C before the command finished
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric value passed to `std::process::exit`
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Reverse of [`Self::as_i32`]; `None` for values stow never exits with
    pub const fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::GeneralError,
            2 => Self::UsageError,
            3 => Self::NetworkError,
            4 => Self::AuthError,
            5 => Self::NotFound,
            6 => Self::Conflict,
            7 => Self::UnsupportedFeature,
            130 => Self::Interrupted,
            _ => return None,
        })
    }

    /// Exit code for a library error
    pub fn from_error(error: &Error) -> Self {
        Self::from_i32(error.exit_code()).unwrap_or(Self::GeneralError)
    }

    /// Short label used in `Display`
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::GeneralError => "error",
            Self::UsageError => "usage error",
            Self::NetworkError => "network error",
            Self::AuthError => "access denied",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::UnsupportedFeature => "not supported by the service",
            Self::Interrupted => "interrupted",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ExitCode; 9] = [
        ExitCode::Success,
        ExitCode::GeneralError,
        ExitCode::UsageError,
        ExitCode::NetworkError,
        ExitCode::AuthError,
        ExitCode::NotFound,
        ExitCode::Conflict,
        ExitCode::UnsupportedFeature,
        ExitCode::Interrupted,
    ];

    #[test]
    fn test_values_are_stable() {
        let values: Vec<i32> = ALL.iter().map(|c| c.as_i32()).collect();
        assert_eq!(values, [0, 1, 2, 3, 4, 5, 6, 7, 130]);
    }

    #[test]
    fn test_from_i32_inverts_as_i32() {
        for code in ALL {
            assert_eq!(ExitCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ExitCode::from_i32(8), None);
        assert_eq!(ExitCode::from_i32(-1), None);
    }

    #[test]
    fn test_exit_code_from_error() {
        assert_eq!(
            ExitCode::from_error(&Error::AliasNotFound("x".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::InvalidPath("x".into())),
            ExitCode::UsageError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Integrity("x".into())),
            ExitCode::GeneralError
        );

        let mut service = stowage_core::ServiceError::new("denied");
        service.status_code = Some(403);
        assert_eq!(
            ExitCode::from_error(&Error::Service(Box::new(service))),
            ExitCode::AuthError
        );

        let mut service = stowage_core::ServiceError::new("not implemented");
        service.status_code = Some(501);
        assert_eq!(
            ExitCode::from_error(&Error::Service(Box::new(service))),
            ExitCode::UnsupportedFeature
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::NotFound.to_string(), "not found (5)");
        assert_eq!(ExitCode::Interrupted.to_string(), "interrupted (130)");
        let code: i32 = ExitCode::Conflict.into();
        assert_eq!(code, 6);
    }
}
