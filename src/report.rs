//! Audit report: the engine's single external output.

use crate::error::LedgerError;
use crate::liability::UnboundLiability;
use crate::types::{compute_content_hash, ActionId, AgentId, RiskLevel};
use crate::verifier::{Axiom, AxiomFinding, Finding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Aggregated classification, ledger integrity and axiom findings for one
/// evaluation snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Content hash of every other field.
    pub report_id: String,
    pub per_agent_risk: BTreeMap<AgentId, RiskLevel>,
    /// Requested agents absent from the fact store.
    pub unknown_agents: Vec<AgentId>,
    pub ledger_range: Range<usize>,
    pub ledger_integrity: Result<(), LedgerError>,
    pub axiom_findings: Vec<AxiomFinding>,
    pub unbound_effects: Vec<UnboundLiability>,
    /// Actions in range that no configured authority governs.
    pub unenforced_actions: Vec<ActionId>,
}

impl AuditReport {
    /// Assign `report_id` from the current contents.
    pub(crate) fn seal(mut self) -> Self {
        self.report_id = self.compute_id();
        self
    }

    fn compute_id(&self) -> String {
        let mut body = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return String::new(),
        };
        body.remove("report_id");
        compute_content_hash(&serde_json::Value::Object(body))
    }

    /// True if `report_id` still matches the contents.
    pub fn verify_id(&self) -> bool {
        !self.report_id.is_empty() && self.compute_id() == self.report_id
    }

    pub fn finding(&self, axiom: Axiom) -> Option<&Finding> {
        self.axiom_findings
            .iter()
            .find(|f| f.axiom == axiom)
            .map(|f| &f.finding)
    }

    /// Intact ledger, every axiom satisfied and no unbound effect.
    pub fn is_clean(&self) -> bool {
        self.ledger_integrity.is_ok()
            && self.axiom_findings.iter().all(|f| f.finding.is_satisfied())
            && self.unbound_effects.is_empty()
    }

    /// Agents classified strictly below `level`. What to do with them is the
    /// consumer's policy.
    pub fn agents_below(&self, level: RiskLevel) -> Vec<&AgentId> {
        self.per_agent_risk
            .iter()
            .filter(|(_, l)| **l < level)
            .map(|(a, _)| a)
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "report_id": self.report_id,
                "error": "Failed to serialize audit report"
            })
        })
    }
}
