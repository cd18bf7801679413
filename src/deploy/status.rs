//! Stack status classification.
//!
//! The provider reports dozens of raw status strings; the launch pipeline
//! only cares about three answers: wait, mutate, or stop and tell the
//! operator.

use crate::provider::StackDescription;

/// The launch pipeline's view of an existing stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StackHealth {
    /// The stack is still being created; no mutation is safe yet.
    Pending,
    /// The stack is settled and can be updated.
    Stable,
    /// The stack is wedged and needs operator attention before any update.
    Failed {
        /// Raw status plus the provider's reason, when one was given.
        reason: String,
    },
}

impl StackHealth {
    /// Classifies a stack description into a launch decision.
    #[must_use]
    pub fn classify(description: &StackDescription) -> Self {
        let status = description.status.as_str();
        if status.contains("CREATE_IN_PROGRESS") {
            return Self::Pending;
        }
        if status.contains("FAIL") || status.contains("ROLLBACK_COMPLETE") {
            let reason = match &description.status_reason {
                Some(detail) => format!("{status}: {detail}"),
                None => status.to_owned(),
            };
            return Self::Failed { reason };
        }
        Self::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn description(status: &str, reason: Option<&str>) -> StackDescription {
        StackDescription {
            stack_id: String::from("arn:stack/demo"),
            status: status.to_owned(),
            status_reason: reason.map(str::to_owned),
        }
    }

    #[rstest]
    #[case::creating("CREATE_IN_PROGRESS", StackHealth::Pending)]
    #[case::reviewing("REVIEW_IN_PROGRESS", StackHealth::Stable)]
    #[case::created("CREATE_COMPLETE", StackHealth::Stable)]
    #[case::updated("UPDATE_COMPLETE", StackHealth::Stable)]
    #[case::updating("UPDATE_IN_PROGRESS", StackHealth::Stable)]
    fn classifies_non_failure_states(#[case] status: &str, #[case] expected: StackHealth) {
        assert_eq!(StackHealth::classify(&description(status, None)), expected);
    }

    #[rstest]
    #[case::create_failed("CREATE_FAILED")]
    #[case::delete_failed("DELETE_FAILED")]
    #[case::rollback_complete("ROLLBACK_COMPLETE")]
    #[case::update_rollback("UPDATE_ROLLBACK_COMPLETE")]
    fn classifies_failure_states(#[case] status: &str) {
        let health = StackHealth::classify(&description(status, Some("resource limit")));
        let StackHealth::Failed { reason } = health else {
            panic!("expected Failed for {status}");
        };
        assert!(reason.contains(status), "reason: {reason}");
        assert!(reason.contains("resource limit"), "reason: {reason}");
    }
}
