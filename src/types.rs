//! Core data types for the governance engine.

use crate::dsl::BoundaryPredicate;
use crate::error::{GovResult, GovernanceError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// A SHA-256 digest. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hash every trace in position 0 chains to.
    pub const GENESIS: Hash256 = Hash256([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> GovResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| GovernanceError::Parse {
            source: "hash256".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Content-addressed reference to an [`Action`].
pub type ActionId = Hash256;

/// Raw Ed25519 signature bytes. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; 64]);

impl fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for SignatureBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for SignatureBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Opaque, immutable agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an identity as the content hash of identifying material
    /// (typically a public key).
    pub fn derive(material: &[u8]) -> Self {
        Self(Hash256::digest(material).to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the five independent pieces of evidence held per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    HasConstitution,
    HasLiability,
    HasConstraints,
    GeneratesTraces,
    DeclaresIntent,
}

impl EvidenceKind {
    pub const ALL: [EvidenceKind; 5] = [
        Self::HasConstitution,
        Self::HasLiability,
        Self::HasConstraints,
        Self::GeneratesTraces,
        Self::DeclaresIntent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasConstitution => "has_constitution",
            Self::HasLiability => "has_liability",
            Self::HasConstraints => "has_constraints",
            Self::GeneratesTraces => "generates_traces",
            Self::DeclaresIntent => "declares_intent",
        }
    }
}

/// Per-agent evidence flags. Flags are independent, not mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvidenceSet {
    pub has_constitution: bool,
    pub has_liability: bool,
    pub has_constraints: bool,
    pub generates_traces: bool,
    pub declares_intent: bool,
}

impl EvidenceSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: EvidenceKind) -> bool {
        match kind {
            EvidenceKind::HasConstitution => self.has_constitution,
            EvidenceKind::HasLiability => self.has_liability,
            EvidenceKind::HasConstraints => self.has_constraints,
            EvidenceKind::GeneratesTraces => self.generates_traces,
            EvidenceKind::DeclaresIntent => self.declares_intent,
        }
    }

    /// Builder-style: return a copy with `kind` set.
    pub fn with(mut self, kind: EvidenceKind) -> Self {
        match kind {
            EvidenceKind::HasConstitution => self.has_constitution = true,
            EvidenceKind::HasLiability => self.has_liability = true,
            EvidenceKind::HasConstraints => self.has_constraints = true,
            EvidenceKind::GeneratesTraces => self.generates_traces = true,
            EvidenceKind::DeclaresIntent => self.declares_intent = true,
        }
        self
    }

    /// True when every flag set here is also set in `other`.
    pub fn is_subset_of(&self, other: &EvidenceSet) -> bool {
        EvidenceKind::ALL
            .iter()
            .all(|k| !self.get(*k) || other.get(*k))
    }
}

/// Total order of governance maturity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Wild,
    Declared,
    Traceable,
    Constrained,
    Liable,
    Sovereign,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 6] = [
        Self::Wild,
        Self::Declared,
        Self::Traceable,
        Self::Constrained,
        Self::Liable,
        Self::Sovereign,
    ];

    /// Numeric rank, WILD = 0 through SOVEREIGN = 5.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Inverse of [`RiskLevel::rank`]; ranks above 5 saturate to SOVEREIGN.
    pub fn from_rank(rank: u8) -> Self {
        Self::ALL[usize::from(rank.min(5))]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wild => "WILD",
            Self::Declared => "DECLARED",
            Self::Traceable => "TRACEABLE",
            Self::Constrained => "CONSTRAINED",
            Self::Liable => "LIABLE",
            Self::Sovereign => "SOVEREIGN",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WILD" => Ok(Self::Wild),
            "DECLARED" => Ok(Self::Declared),
            "TRACEABLE" => Ok(Self::Traceable),
            "CONSTRAINED" => Ok(Self::Constrained),
            "LIABLE" => Ok(Self::Liable),
            "SOVEREIGN" => Ok(Self::Sovereign),
            _ => Err(GovernanceError::Parse {
                source: "risk_level".to_string(),
                message: format!("unknown risk level '{}'", s),
            }),
        }
    }
}

/// A party that can bear liability or hold sovereignty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Agent { id: AgentId },
    External { name: String },
}

/// An autonomous actor under governance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub constraints: BTreeSet<String>,
    pub liability_link: Option<String>,
}

impl Agent {
    pub fn new(id: AgentId) -> Self {
        Self { id, constraints: BTreeSet::new(), liability_link: None }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.insert(constraint.into());
        self
    }

    pub fn with_liability_link(mut self, liability: impl Into<String>) -> Self {
        self.liability_link = Some(liability.into());
        self
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.id.as_str().is_empty() {
            return Err(GovernanceError::Validation {
                field: "id".to_string(),
                message: "Agent must have a non-empty identity".to_string(),
            });
        }
        Ok(())
    }
}

/// A declared objective and the actions it permits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub agent: AgentId,
    pub objective: String,
    pub boundary: Vec<BoundaryPredicate>,
    /// Declaration time, same clock as [`Action::timestamp`].
    pub declared_at: u64,
}

impl Intent {
    pub fn new(
        agent: AgentId,
        objective: impl Into<String>,
        boundary: Vec<BoundaryPredicate>,
        declared_at: u64,
    ) -> Self {
        Self { agent, objective: objective.into(), boundary, declared_at }
    }

    /// An empty boundary permits nothing.
    pub fn permits(&self, action: &Action) -> bool {
        self.boundary.iter().any(|p| p.matches(&action.name))
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.objective.trim().is_empty() {
            return Err(GovernanceError::Validation {
                field: "objective".to_string(),
                message: "Intent must declare a non-empty objective".to_string(),
            });
        }
        Ok(())
    }
}

/// A state transformation attributed to an agent.
///
/// The transformation itself is never inspected; only the pre/post state
/// hashes in its [`Trace`] are recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub agent: AgentId,
    pub name: String,
    pub timestamp: u64,
    pub nonce: u64,
}

impl Action {
    pub fn new(agent: AgentId, name: impl Into<String>, timestamp: u64, nonce: u64) -> Self {
        Self { agent, name: name.into(), timestamp, nonce }
    }

    /// Content-addressed identity of this action.
    pub fn id(&self) -> ActionId {
        content_hash(&serde_json::json!({
            "agent": self.agent.as_str(),
            "name": self.name,
            "nonce": self.nonce,
            "timestamp": self.timestamp,
        }))
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.name.is_empty() {
            return Err(GovernanceError::Validation {
                field: "name".to_string(),
                message: "Action must have a non-empty name".to_string(),
            });
        }
        Ok(())
    }
}

/// Signed, chained audit record of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub action_ref: ActionId,
    pub pre_state_hash: Hash256,
    pub post_state_hash: Hash256,
    pub previous_hash: Hash256,
    pub signature: SignatureBytes,
}

impl Trace {
    /// Length of the byte string covered by the signature.
    pub const SIGNING_LEN: usize = 128;

    /// Sign `(previous, pre, post, action_ref)` with `key`.
    pub fn seal(
        action_ref: ActionId,
        pre_state_hash: Hash256,
        post_state_hash: Hash256,
        previous_hash: Hash256,
        key: &SigningKey,
    ) -> Self {
        let message =
            Self::signing_bytes_for(&previous_hash, &pre_state_hash, &post_state_hash, &action_ref);
        let signature = key.sign(&message);
        Self {
            action_ref,
            pre_state_hash,
            post_state_hash,
            previous_hash,
            signature: SignatureBytes(signature.to_bytes()),
        }
    }

    fn signing_bytes_for(
        previous: &Hash256,
        pre: &Hash256,
        post: &Hash256,
        action_ref: &ActionId,
    ) -> [u8; Self::SIGNING_LEN] {
        let mut out = [0u8; Self::SIGNING_LEN];
        out[..32].copy_from_slice(previous.as_bytes());
        out[32..64].copy_from_slice(pre.as_bytes());
        out[64..96].copy_from_slice(post.as_bytes());
        out[96..].copy_from_slice(action_ref.as_bytes());
        out
    }

    /// Exact bytes the signature is computed over:
    /// `previous_hash || pre_state_hash || post_state_hash || action_ref`.
    pub fn signing_bytes(&self) -> [u8; Self::SIGNING_LEN] {
        Self::signing_bytes_for(
            &self.previous_hash,
            &self.pre_state_hash,
            &self.post_state_hash,
            &self.action_ref,
        )
    }

    /// Hash the next trace must declare as its previous hash.
    pub fn chain_hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_bytes());
        hasher.update(self.signature.0);
        Hash256(hasher.finalize().into())
    }

    pub fn verify_signature(&self, key: &VerifyingKey) -> Result<(), String> {
        let signature = Signature::from_bytes(&self.signature.0);
        key.verify(&self.signing_bytes(), &signature)
            .map_err(|e| e.to_string())
    }
}

/// Assignment of responsibility to a bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liability {
    pub id: String,
    pub bearer: Entity,
    pub scope: String,
    pub weight: u32,
}

impl Liability {
    pub fn new(id: impl Into<String>, bearer: Entity, scope: impl Into<String>, weight: u32) -> Self {
        Self { id: id.into(), bearer, scope: scope.into(), weight }
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.id.is_empty() {
            return Err(GovernanceError::Validation {
                field: "id".to_string(),
                message: "Liability must have a non-empty ID".to_string(),
            });
        }
        if self.scope.is_empty() {
            return Err(GovernanceError::Validation {
                field: "scope".to_string(),
                message: "Liability must declare a scope".to_string(),
            });
        }
        Ok(())
    }
}

/// Externally supplied sovereign over a jurisdiction. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authority {
    pub sovereign: Entity,
    pub jurisdiction: String,
    pub enforcement: BoundaryPredicate,
}

impl Authority {
    pub fn governs(&self, action: &Action) -> bool {
        self.enforcement.matches(&action.name)
    }
}

/// Observable outcome of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub id: String,
    /// Action that produced the effect, if known.
    pub origin: Option<ActionId>,
    pub description: String,
}

impl Effect {
    pub fn new(id: impl Into<String>, origin: Option<ActionId>, description: impl Into<String>) -> Self {
        Self { id: id.into(), origin, description: description.into() }
    }

    pub fn validate(&self) -> GovResult<()> {
        if self.id.is_empty() {
            return Err(GovernanceError::Validation {
                field: "id".to_string(),
                message: "Effect must have a non-empty ID".to_string(),
            });
        }
        Ok(())
    }
}

/// Deterministic content hash of a JSON value.
pub fn content_hash(obj: &serde_json::Value) -> Hash256 {
    Hash256::digest(canonical_json(obj).as_bytes())
}

/// Hex form of [`content_hash`].
pub fn compute_content_hash(obj: &serde_json::Value) -> String {
    content_hash(obj).to_hex()
}

/// Compact JSON with object keys sorted at every depth.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = serde_json::json!({"b": {"y": 1, "x": [2, {"d": 0, "c": 1}]}, "a": "s"});
        assert_eq!(canonical_json(&v), r#"{"a":"s","b":{"x":[2,{"c":1,"d":0}],"y":1}}"#);
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = Hash256::digest(b"governor");
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
        assert!(Hash256::from_hex("zz").is_err());
    }

    #[test]
    fn signing_bytes_layout() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let trace = Trace::seal(
            Hash256::digest(b"a"),
            Hash256::digest(b"pre"),
            Hash256::digest(b"post"),
            Hash256::GENESIS,
            &key,
        );
        let bytes = trace.signing_bytes();
        assert_eq!(&bytes[..32], Hash256::GENESIS.as_bytes());
        assert_eq!(&bytes[32..64], Hash256::digest(b"pre").as_bytes());
        assert_eq!(&bytes[64..96], Hash256::digest(b"post").as_bytes());
        assert_eq!(&bytes[96..], Hash256::digest(b"a").as_bytes());
    }
}
