//! Execution-side recorder: admits an agent, then signs and appends the
//! trace for each action it performs.

use crate::classifier::RiskClassifier;
use crate::dsl::IntentDsl;
use crate::error::{GovResult, GovernanceError};
use crate::facts::FactStore;
use crate::ledger::{LedgerPosition, TraceLedger};
use crate::types::{Action, AgentId, Hash256, RiskLevel};
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::sync::Arc;
use tracing::{info, warn};

/// Records actions for one agent.
///
/// WILD agents (or anything under the configured floor) are refused before
/// an action is recorded.
pub struct Governor {
    agent: AgentId,
    key: SigningKey,
    facts: Arc<FactStore>,
    ledger: Arc<TraceLedger>,
    classifier: RiskClassifier,
    floor: RiskLevel,
}

impl Governor {
    /// Binds `key` to `agent` in the ledger. An agent that already has a
    /// different key registered fails with [`crate::error::LedgerError::KeyConflict`].
    pub fn new(
        agent: AgentId,
        key: SigningKey,
        facts: Arc<FactStore>,
        ledger: Arc<TraceLedger>,
        classifier: RiskClassifier,
        floor: RiskLevel,
    ) -> GovResult<Self> {
        ledger.register_signer(agent.clone(), key.verifying_key())?;
        Ok(Self { agent, key, facts, ledger, classifier, floor })
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Declare an intent from DSL text at `declared_at`.
    pub fn declare_intent(&self, text: &str, declared_at: u64) -> GovResult<()> {
        let intent = IntentDsl::parse_intent(text, self.agent.clone(), declared_at)?;
        info!(agent = %self.agent, objective = %intent.objective, "intent sealed");
        self.facts.declare_intent(intent)
    }

    /// Current level, or `AgentBlocked` if it is below the floor.
    pub fn admit(&self) -> GovResult<RiskLevel> {
        let level = self.classifier.classify(&self.facts.evidence(&self.agent)?);
        if level < self.floor {
            warn!(agent = %self.agent, level = %level, floor = %self.floor, "agent blocked");
            return Err(GovernanceError::AgentBlocked {
                agent: self.agent.clone(),
                level,
                minimum: self.floor,
            });
        }
        Ok(level)
    }

    /// Record one action. Only the hashes of `pre_state` and `post_state`
    /// enter the ledger.
    pub fn execute(
        &self,
        name: &str,
        pre_state: &[u8],
        post_state: &[u8],
        timestamp: u64,
    ) -> GovResult<LedgerPosition> {
        let level = self.admit()?;
        let action = Action::new(self.agent.clone(), name, timestamp, rand::random());
        action.validate()?;
        let position = self.ledger.append_sealed(
            action,
            Hash256::digest(pre_state),
            Hash256::digest(post_state),
            &self.key,
        )?;
        info!(agent = %self.agent, action = name, position, risk = %level, "action executed");
        Ok(position)
    }
}
