//! Decision resolution
//!
//! Pure decision table over `(decision, client_response)`. The engine turns
//! the resulting `Resolution` into one atomic write set; nothing here
//! touches storage.

use crate::settlement::CancellationType;
use crate::verification::{ClientResponse, Decision, VerificationStatus};

/// Outcome of resolving a driver decision and optional client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Verification approved; shipment moves to `pickup_verified`.
    Approve,
    /// Minor differences recorded, waiting for the client. No shipment
    /// transition; the wait is persisted state, not a blocked call.
    AwaitClient,
    /// Verification fails; a cancellation record is created and the
    /// shipment moves to `cancelled`.
    Cancel {
        verification_status: VerificationStatus,
        cancellation_type: CancellationType,
    },
}

pub fn resolve(decision: Decision, client_response: Option<ClientResponse>) -> Resolution {
    match (decision, client_response) {
        (Decision::Matches, _) => Resolution::Approve,
        (Decision::MinorDifferences, None) => Resolution::AwaitClient,
        (Decision::MinorDifferences, Some(ClientResponse::Approved)) => Resolution::Approve,
        (Decision::MinorDifferences, Some(ClientResponse::Disputed)) => Resolution::Cancel {
            verification_status: VerificationStatus::DisputedByClient,
            cancellation_type: CancellationType::AtPickupMismatch,
        },
        (Decision::MajorIssues, _) => Resolution::Cancel {
            verification_status: VerificationStatus::Cancelled,
            cancellation_type: CancellationType::AtPickupMismatch,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_always_approves() {
        assert_eq!(resolve(Decision::Matches, None), Resolution::Approve);
        assert_eq!(
            resolve(Decision::Matches, Some(ClientResponse::Disputed)),
            Resolution::Approve
        );
    }

    #[test]
    fn minor_differences_waits_for_client() {
        assert_eq!(
            resolve(Decision::MinorDifferences, None),
            Resolution::AwaitClient
        );
    }

    #[test]
    fn minor_differences_approved_by_client() {
        assert_eq!(
            resolve(Decision::MinorDifferences, Some(ClientResponse::Approved)),
            Resolution::Approve
        );
    }

    #[test]
    fn minor_differences_disputed_cancels_as_mismatch() {
        assert_eq!(
            resolve(Decision::MinorDifferences, Some(ClientResponse::Disputed)),
            Resolution::Cancel {
                verification_status: VerificationStatus::DisputedByClient,
                cancellation_type: CancellationType::AtPickupMismatch,
            }
        );
    }

    #[test]
    fn major_issues_cancels_immediately() {
        assert_eq!(
            resolve(Decision::MajorIssues, None),
            Resolution::Cancel {
                verification_status: VerificationStatus::Cancelled,
                cancellation_type: CancellationType::AtPickupMismatch,
            }
        );
    }
}
