use stampede_core::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but one or more thresholds failed.
    ThresholdsFailed = 11,

    /// The run was aborted by an abort-on-fail threshold or a signal.
    Aborted = 12,

    /// Invalid CLI/config/options (bad flags, unreadable scenario, invalid thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, task failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Self::Success,
            Verdict::Fail => Self::ThresholdsFailed,
            Verdict::Aborted => Self::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_map_to_distinct_codes() {
        assert_eq!(ExitCode::from_verdict(Verdict::Pass).as_i32(), 0);
        assert_eq!(ExitCode::from_verdict(Verdict::Fail).as_i32(), 11);
        assert_eq!(ExitCode::from_verdict(Verdict::Aborted).as_i32(), 12);
    }
}
