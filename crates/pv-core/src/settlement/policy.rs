//! Cancellation policy table
//!
//! Maps each cancellation type to a three-way percentage split. Every entry
//! must sum to exactly 100; the validated constructor enforces that for
//! operator overrides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::settlement::CancellationType;
use crate::{EngineError, EngineResult};

/// Percentage split for one cancellation type: client refund, driver
/// compensation, platform fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub client_pct: u32,
    pub driver_pct: u32,
    pub platform_pct: u32,
}

impl CancellationPolicy {
    pub const fn new(client_pct: u32, driver_pct: u32, platform_pct: u32) -> Self {
        Self {
            client_pct,
            driver_pct,
            platform_pct,
        }
    }

    pub fn sums_to_hundred(&self) -> bool {
        self.client_pct + self.driver_pct + self.platform_pct == 100
    }
}

/// Static lookup table, one policy per cancellation type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTable {
    entries: HashMap<CancellationType, CancellationPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            CancellationType::BeforeAcceptance,
            CancellationPolicy::new(100, 0, 0),
        );
        entries.insert(
            CancellationType::AfterAcceptanceBeforePickup,
            CancellationPolicy::new(80, 10, 10),
        );
        entries.insert(
            CancellationType::AtPickupMismatch,
            CancellationPolicy::new(70, 20, 10),
        );
        entries.insert(
            CancellationType::AtPickupFraud,
            CancellationPolicy::new(0, 40, 60),
        );
        entries.insert(CancellationType::InTransit, CancellationPolicy::new(50, 40, 10));
        entries.insert(
            CancellationType::ForceMajeure,
            CancellationPolicy::new(90, 5, 5),
        );
        Self { entries }
    }
}

impl PolicyTable {
    /// Build a table from operator-supplied entries. Every cancellation type
    /// must be covered and every entry must sum to exactly 100.
    pub fn validated(
        entries: HashMap<CancellationType, CancellationPolicy>,
    ) -> EngineResult<Self> {
        for ty in CancellationType::ALL {
            let policy = entries
                .get(&ty)
                .ok_or_else(|| EngineError::Config(format!("missing policy for {ty}")))?;
            if !policy.sums_to_hundred() {
                return Err(EngineError::Config(format!(
                    "policy for {ty} sums to {}, must be 100",
                    policy.client_pct + policy.driver_pct + policy.platform_pct
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn policy(&self, ty: CancellationType) -> CancellationPolicy {
        // Default covers every type; validated() enforces the same.
        self.entries[&ty]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_entry_sums_to_hundred() {
        let table = PolicyTable::default();
        for ty in CancellationType::ALL {
            assert!(table.policy(ty).sums_to_hundred(), "{ty}");
        }
    }

    #[test]
    fn default_splits_match_schedule() {
        let table = PolicyTable::default();
        assert_eq!(
            table.policy(CancellationType::BeforeAcceptance),
            CancellationPolicy::new(100, 0, 0)
        );
        assert_eq!(
            table.policy(CancellationType::AfterAcceptanceBeforePickup),
            CancellationPolicy::new(80, 10, 10)
        );
        assert_eq!(
            table.policy(CancellationType::AtPickupMismatch),
            CancellationPolicy::new(70, 20, 10)
        );
        assert_eq!(
            table.policy(CancellationType::AtPickupFraud),
            CancellationPolicy::new(0, 40, 60)
        );
        assert_eq!(
            table.policy(CancellationType::InTransit),
            CancellationPolicy::new(50, 40, 10)
        );
        assert_eq!(
            table.policy(CancellationType::ForceMajeure),
            CancellationPolicy::new(90, 5, 5)
        );
    }

    #[test]
    fn validated_rejects_bad_sum() {
        let mut entries = HashMap::new();
        for ty in CancellationType::ALL {
            entries.insert(ty, CancellationPolicy::new(50, 40, 10));
        }
        entries.insert(
            CancellationType::ForceMajeure,
            CancellationPolicy::new(90, 5, 10),
        );
        assert!(matches!(
            PolicyTable::validated(entries),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn validated_rejects_missing_type() {
        let mut entries = HashMap::new();
        entries.insert(
            CancellationType::BeforeAcceptance,
            CancellationPolicy::new(100, 0, 0),
        );
        assert!(matches!(
            PolicyTable::validated(entries),
            Err(EngineError::Config(_))
        ));
    }
}
