use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a submission.
///
/// ```text
/// Created -> Submitted -> Running -> Terminated -> CollectEligible -> Collected
///                    \          \-> Stopped                      \-> CollectFailed
///                     \-> Terminated | Stopped
/// ```
///
/// `Terminated` and `Stopped` go back to `Submitted` when failed jobs are
/// resubmitted. `Collected` and `CollectFailed` are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionPhase {
    #[default]
    Created,
    Submitted,
    Running,
    Terminated,
    Stopped,
    CollectEligible,
    Collected,
    CollectFailed,
}

impl SubmissionPhase {
    pub fn can_transition_to(self, next: SubmissionPhase) -> bool {
        use SubmissionPhase::*;
        matches!(
            (self, next),
            (Created, Submitted)
                | (Submitted, Running)
                | (Submitted, Terminated)
                | (Submitted, Stopped)
                | (Running, Terminated)
                | (Running, Stopped)
                | (Terminated, CollectEligible)
                | (Terminated, Submitted)
                | (Stopped, Submitted)
                | (CollectEligible, Collected)
                | (CollectEligible, CollectFailed)
        )
    }

    /// No further transition is possible.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Collected | Self::CollectFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Terminated => "TERMINATED",
            Self::Stopped => "STOPPED",
            Self::CollectEligible => "COLLECT_ELIGIBLE",
            Self::Collected => "COLLECTED",
            Self::CollectFailed => "COLLECT_FAILED",
        }
    }
}

impl fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SubmissionPhase::*;
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            Created,
            Submitted,
            Running,
            Terminated,
            CollectEligible,
            Collected,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn collect_requires_eligibility() {
        assert!(!Terminated.can_transition_to(Collected));
        assert!(!Running.can_transition_to(CollectEligible));
        assert!(!Stopped.can_transition_to(CollectEligible));
    }

    #[test]
    fn final_phases_are_final() {
        for next in [Created, Submitted, Running, Terminated, CollectEligible] {
            assert!(!Collected.can_transition_to(next));
            assert!(!CollectFailed.can_transition_to(next));
        }
        assert!(Collected.is_final());
        assert!(!Terminated.is_final());
    }

    #[test]
    fn resubmission_reopens_terminated() {
        assert!(Terminated.can_transition_to(Submitted));
        assert!(Stopped.can_transition_to(Submitted));
        assert!(!CollectEligible.can_transition_to(Submitted));
    }

    #[test]
    fn serializes_screaming() {
        let yaml = serde_yaml::to_string(&CollectEligible).unwrap();
        assert_eq!(yaml.trim(), "COLLECT_ELIGIBLE");
    }
}
