//! Risk classification: evidence to a position in the risk lattice.

use crate::error::{GovResult, GovernanceError};
use crate::facts::FactSnapshot;
use crate::types::{AgentId, EvidenceKind, EvidenceSet, RiskLevel};

/// Canonical priority: constitution, liability, constraints, traces, intent.
pub const DEFAULT_PRIORITY: [EvidenceKind; 5] = EvidenceKind::ALL;

/// Priority-cascade classifier.
///
/// The evidence kind at rank 0 of the priority ordering maps to SOVEREIGN,
/// rank 4 to DECLARED; no evidence is WILD. Kinds are tested in rank order
/// and the first present one decides, so the result is the highest level
/// any present evidence reaches. That makes classification monotonic for
/// every ordering, not only the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskClassifier {
    priority: [EvidenceKind; 5],
}

impl RiskClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a priority ordering, which must name every evidence kind once.
    pub fn with_priority(priority: &[EvidenceKind]) -> GovResult<Self> {
        let ordering: [EvidenceKind; 5] = priority.try_into().map_err(|_| {
            GovernanceError::Validation {
                field: "priority".to_string(),
                message: format!("expected 5 evidence kinds, got {}", priority.len()),
            }
        })?;
        for kind in EvidenceKind::ALL {
            if !ordering.contains(&kind) {
                return Err(GovernanceError::Validation {
                    field: "priority".to_string(),
                    message: format!("ordering is missing '{}'", kind.as_str()),
                });
            }
        }
        Ok(Self { priority: ordering })
    }

    pub fn priority(&self) -> &[EvidenceKind; 5] {
        &self.priority
    }

    /// Total and deterministic.
    pub fn classify(&self, evidence: &EvidenceSet) -> RiskLevel {
        self.priority
            .iter()
            .enumerate()
            .find(|(_, kind)| evidence.get(**kind))
            .map(|(rank, _)| RiskLevel::from_rank(5 - rank as u8))
            .unwrap_or(RiskLevel::Wild)
    }

    /// `None` when the agent is not in the fact store.
    pub fn classify_agent(&self, facts: &FactSnapshot, agent: &AgentId) -> Option<RiskLevel> {
        facts.evidence(agent).map(|e| self.classify(e))
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self { priority: DEFAULT_PRIORITY }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_picks_highest_present() {
        let c = RiskClassifier::new();
        assert_eq!(c.classify(&EvidenceSet::none()), RiskLevel::Wild);
        let e = EvidenceSet::none()
            .with(EvidenceKind::DeclaresIntent)
            .with(EvidenceKind::HasConstraints);
        assert_eq!(c.classify(&e), RiskLevel::Constrained);
        assert_eq!(
            c.classify(&e.with(EvidenceKind::HasConstitution)),
            RiskLevel::Sovereign
        );
    }

    #[test]
    fn rejects_incomplete_ordering() {
        let partial = [EvidenceKind::HasConstitution, EvidenceKind::HasLiability];
        assert!(RiskClassifier::with_priority(&partial).is_err());
        let dup = [EvidenceKind::HasConstitution; 5];
        assert!(RiskClassifier::with_priority(&dup).is_err());
    }

    #[test]
    fn custom_ordering_remaps_levels() {
        let mut order = DEFAULT_PRIORITY;
        order.reverse();
        let c = RiskClassifier::with_priority(&order).unwrap();
        let e = EvidenceSet::none().with(EvidenceKind::DeclaresIntent);
        assert_eq!(c.classify(&e), RiskLevel::Sovereign);
    }
}
