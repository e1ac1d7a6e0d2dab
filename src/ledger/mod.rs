//! Append-only, hash-chained, signed trace ledger.
//!
//! Appends are serialized behind a writer lock and validated completely before
//! anything is mutated, so a rejected or failed append leaves no trace of
//! itself. Committed state is published as a [`LedgerSnapshot`]; readers only
//! contend with the brief publish step, never with validation or the journal
//! sync.

mod journal;

pub use journal::Journal;

use crate::error::LedgerError;
use crate::types::{Action, ActionId, AgentId, Hash256, Trace};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

/// Zero-based index of a trace in the chain.
pub type LedgerPosition = usize;

/// Entries per storage chunk. Full chunks are shared by every snapshot; an
/// append copies at most the open chunk.
const CHUNK_LEN: usize = 256;

/// Registered signing keys, one per agent.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<AgentId, VerifyingKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// A key, once registered, is fixed for the agent. Registering the same
    /// key again is a no-op; a different key is a `KeyConflict`.
    pub fn register(&mut self, agent: AgentId, key: VerifyingKey) -> Result<(), LedgerError> {
        match self.keys.get(&agent) {
            Some(existing) if *existing != key => Err(LedgerError::KeyConflict { agent }),
            Some(_) => Ok(()),
            None => {
                self.keys.insert(agent, key);
                Ok(())
            }
        }
    }

    pub fn get(&self, agent: &AgentId) -> Option<&VerifyingKey> {
        self.keys.get(agent)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// An action and the trace that records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub action: Action,
    pub trace: Trace,
}

#[derive(Debug, Clone, Default)]
struct Chunk {
    entries: Vec<LedgerEntry>,
    index: HashMap<ActionId, LedgerPosition>,
}

/// Chunked entry storage with structural sharing between snapshots.
#[derive(Debug, Clone, Default)]
struct EntryLog {
    sealed: Arc<Vec<Arc<Chunk>>>,
    open: Arc<Chunk>,
    len: usize,
}

impl EntryLog {
    fn get(&self, position: LedgerPosition) -> Option<&LedgerEntry> {
        let (chunk, offset) = (position / CHUNK_LEN, position % CHUNK_LEN);
        match self.sealed.get(chunk) {
            Some(sealed) => sealed.entries.get(offset),
            None if chunk == self.sealed.len() => self.open.entries.get(offset),
            None => None,
        }
    }

    fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.sealed.iter().map(|c| &**c).chain(std::iter::once(&*self.open))
    }

    fn position_of(&self, action: &ActionId) -> Option<LedgerPosition> {
        self.chunks().find_map(|c| c.index.get(action).copied())
    }

    fn push(&mut self, entry: LedgerEntry) -> LedgerPosition {
        let position = self.len;
        let open = Arc::make_mut(&mut self.open);
        open.index.entry(entry.trace.action_ref).or_insert(position);
        open.entries.push(entry);
        let full = open.entries.len() == CHUNK_LEN;
        self.len += 1;
        if full {
            let chunk = std::mem::take(&mut self.open);
            Arc::make_mut(&mut self.sealed).push(chunk);
        }
        position
    }
}

/// Consistent read-only view of the committed chain.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    log: EntryLog,
    keys: Arc<KeyRing>,
}

impl LedgerSnapshot {
    /// View over entries obtained elsewhere, such as an exported chain.
    /// Nothing is checked until [`LedgerSnapshot::verify`] is called.
    pub fn from_entries(entries: Vec<LedgerEntry>, keys: KeyRing) -> Self {
        LedgerState::from_entries(entries, keys, None).snapshot
    }

    pub fn len(&self) -> usize {
        self.log.len
    }

    pub fn is_empty(&self) -> bool {
        self.log.len == 0
    }

    pub fn at(&self, position: LedgerPosition) -> Option<&LedgerEntry> {
        self.log.get(position)
    }

    /// Entries in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.log.chunks().flat_map(|c| c.entries.iter())
    }

    /// Entries in `range` with their positions. Positions past the end are skipped.
    pub fn range(
        &self,
        range: Range<LedgerPosition>,
    ) -> impl Iterator<Item = (LedgerPosition, &LedgerEntry)> + '_ {
        range.map_while(move |p| self.at(p).map(|e| (p, e)))
    }

    /// Position of the first trace referencing `action`.
    pub fn position_of(&self, action: &ActionId) -> Option<LedgerPosition> {
        self.log.position_of(action)
    }

    /// Hash the next appended trace must chain to.
    pub fn tail_hash(&self) -> Hash256 {
        self.log
            .len
            .checked_sub(1)
            .and_then(|p| self.at(p))
            .map(|e| e.trace.chain_hash())
            .unwrap_or(Hash256::GENESIS)
    }

    /// Recompute links and signatures over `range`, stopping at the first break.
    pub fn verify(&self, range: Range<LedgerPosition>) -> Result<(), LedgerError> {
        if range.start > range.end || range.end > self.len() {
            return Err(LedgerError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        range.into_iter().try_for_each(|p| self.verify_position(p))
    }

    pub fn verify_all(&self) -> Result<(), LedgerError> {
        self.verify(0..self.len())
    }

    /// First position that fails verification, with the reason.
    pub fn first_broken_position(&self) -> Option<(LedgerPosition, LedgerError)> {
        (0..self.len()).find_map(|p| self.verify_position(p).err().map(|e| (p, e)))
    }

    /// Check a single link: previous-hash, action reference, then signature.
    pub fn verify_position(&self, position: LedgerPosition) -> Result<(), LedgerError> {
        let entry = self.at(position).ok_or(LedgerError::RangeOutOfBounds {
            start: position,
            end: position + 1,
            len: self.len(),
        })?;
        let expected = match position.checked_sub(1).and_then(|p| self.at(p)) {
            Some(previous) => previous.trace.chain_hash(),
            None => Hash256::GENESIS,
        };
        check_entry(&self.keys, position, expected, entry).map_err(|e| match e {
            LedgerError::UnknownSigner { agent } => LedgerError::SignatureInvalid {
                position,
                reason: format!("no key registered for agent '{}'", agent),
            },
            other => other,
        })
    }
}

fn check_entry(
    keys: &KeyRing,
    position: LedgerPosition,
    expected_previous: Hash256,
    entry: &LedgerEntry,
) -> Result<(), LedgerError> {
    let trace = &entry.trace;
    if trace.previous_hash != expected_previous {
        return Err(LedgerError::ChainMismatch {
            position,
            expected: expected_previous.to_hex(),
            found: trace.previous_hash.to_hex(),
        });
    }
    if entry.action.id() != trace.action_ref {
        return Err(LedgerError::ActionRefMismatch { position });
    }
    let key = keys
        .get(&entry.action.agent)
        .ok_or_else(|| LedgerError::UnknownSigner { agent: entry.action.agent.clone() })?;
    trace
        .verify_signature(key)
        .map_err(|reason| LedgerError::SignatureInvalid { position, reason })
}

/// Writer-side state. Only reachable through the writer lock.
#[derive(Debug, Default)]
struct LedgerState {
    snapshot: LedgerSnapshot,
    tail: Hash256,
    last_timestamp: HashMap<AgentId, u64>,
    nonces: HashSet<(AgentId, u64)>,
    journal: Option<Journal>,
}

impl LedgerState {
    fn from_entries(entries: Vec<LedgerEntry>, keys: KeyRing, journal: Option<Journal>) -> Self {
        let mut state = Self {
            tail: Hash256::GENESIS,
            snapshot: LedgerSnapshot { keys: Arc::new(keys), ..Default::default() },
            journal,
            ..Default::default()
        };
        for entry in entries {
            state.index(entry);
        }
        state
    }

    /// Full append validation against the current tail. Mutates nothing.
    fn check(&self, entry: &LedgerEntry) -> Result<LedgerPosition, LedgerError> {
        let position = self.snapshot.len();
        check_entry(&self.snapshot.keys, position, self.tail, entry)?;

        let agent = &entry.action.agent;
        if let Some(&previous) = self.last_timestamp.get(agent) {
            if entry.action.timestamp < previous {
                return Err(LedgerError::NonMonotonicTimestamp {
                    agent: agent.clone(),
                    previous,
                    attempted: entry.action.timestamp,
                });
            }
        }
        if self.nonces.contains(&(agent.clone(), entry.action.nonce)) {
            return Err(LedgerError::ReplayedNonce {
                agent: agent.clone(),
                nonce: entry.action.nonce,
            });
        }
        Ok(position)
    }

    /// Persist, then index. Nothing is indexed if the journal write fails.
    fn commit(&mut self, entry: LedgerEntry) -> Result<LedgerPosition, LedgerError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&entry)?;
        }
        Ok(self.index(entry))
    }

    fn index(&mut self, entry: LedgerEntry) -> LedgerPosition {
        let agent = entry.action.agent.clone();
        let last = self.last_timestamp.entry(agent.clone()).or_insert(entry.action.timestamp);
        *last = (*last).max(entry.action.timestamp);
        self.nonces.insert((agent, entry.action.nonce));
        self.tail = entry.trace.chain_hash();
        self.snapshot.log.push(entry)
    }
}

/// The trace ledger. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct TraceLedger {
    writer: Mutex<LedgerState>,
    published: RwLock<LedgerSnapshot>,
}

impl TraceLedger {
    /// In-memory ledger.
    pub fn new(keys: KeyRing) -> Self {
        Self::from_state(LedgerState::from_entries(Vec::new(), keys, None))
    }

    fn from_state(state: LedgerState) -> Self {
        Self {
            published: RwLock::new(state.snapshot.clone()),
            writer: Mutex::new(state),
        }
    }

    /// Ledger backed by an append-only journal at `path`, created if absent.
    ///
    /// Stored entries are loaded as written. A chain that no longer verifies
    /// is logged and left for [`TraceLedger::verify`] to report.
    pub fn open(path: impl AsRef<Path>, keys: KeyRing) -> Result<Self, LedgerError> {
        let (journal, entries) = Journal::open(path.as_ref())?;
        let state = LedgerState::from_entries(entries, keys, Some(journal));
        match state.snapshot.first_broken_position() {
            None => info!(
                path = %path.as_ref().display(),
                entries = state.snapshot.len(),
                "trace ledger opened"
            ),
            Some((position, error)) => warn!(
                path = %path.as_ref().display(),
                position,
                error = %error,
                "trace ledger opened with a broken chain"
            ),
        }
        Ok(Self::from_state(state))
    }

    /// Register `agent`'s verifying key. Fails with `KeyConflict` if a
    /// different key is already registered.
    pub fn register_signer(&self, agent: AgentId, key: VerifyingKey) -> Result<(), LedgerError> {
        let mut state = self.writer.lock()?;
        if let Err(error) = Arc::make_mut(&mut state.snapshot.keys).register(agent.clone(), key) {
            warn!(agent = %agent, error = %error, "signer registration rejected");
            return Err(error);
        }
        self.publish(&state);
        Ok(())
    }

    /// Append a pre-signed trace for `action`.
    pub fn append(&self, action: Action, trace: Trace) -> Result<LedgerPosition, LedgerError> {
        let mut state = self.writer.lock()?;
        self.check_and_commit(&mut state, LedgerEntry { action, trace })
    }

    /// Sign and append a trace for `action`, chaining to the tail observed
    /// under the same writer lock.
    pub fn append_sealed(
        &self,
        action: Action,
        pre_state_hash: Hash256,
        post_state_hash: Hash256,
        key: &SigningKey,
    ) -> Result<LedgerPosition, LedgerError> {
        let mut state = self.writer.lock()?;
        let trace = Trace::seal(action.id(), pre_state_hash, post_state_hash, state.tail, key);
        self.check_and_commit(&mut state, LedgerEntry { action, trace })
    }

    fn check_and_commit(
        &self,
        state: &mut LedgerState,
        entry: LedgerEntry,
    ) -> Result<LedgerPosition, LedgerError> {
        let agent = entry.action.agent.clone();
        let result = state.check(&entry).and_then(|_| state.commit(entry));
        match &result {
            Ok(position) => {
                self.publish(state);
                info!(position, agent = %agent, "trace appended");
            }
            Err(error) => warn!(agent = %agent, error = %error, "trace append rejected"),
        }
        result
    }

    fn publish(&self, state: &LedgerState) {
        // Whole-value replacement cannot leave a torn snapshot behind a poisoned lock.
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = state.snapshot.clone();
    }

    /// Latest committed snapshot. Never waits on an in-flight append.
    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.published.read()?.clone())
    }

    pub fn verify(&self, range: Range<LedgerPosition>) -> Result<(), LedgerError> {
        self.snapshot()?.verify(range)
    }

    pub fn at(&self, position: LedgerPosition) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.snapshot()?.at(position).cloned())
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.snapshot()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.snapshot()?.is_empty())
    }

    pub fn tail_hash(&self) -> Result<Hash256, LedgerError> {
        Ok(self.snapshot()?.tail_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(seed: u8) -> (AgentId, SigningKey, KeyRing) {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let agent = AgentId::derive(key.verifying_key().as_bytes());
        let mut ring = KeyRing::new();
        ring.register(agent.clone(), key.verifying_key()).unwrap();
        (agent, key, ring)
    }

    #[test]
    fn genesis_tail_on_empty_ledger() {
        let ledger = TraceLedger::new(KeyRing::new());
        assert_eq!(ledger.tail_hash().unwrap(), Hash256::GENESIS);
        assert!(ledger.verify(0..0).is_ok());
        assert!(matches!(
            ledger.verify(0..1),
            Err(LedgerError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn index_tracks_first_position_and_tail() {
        let (agent, key, ring) = keyed(1);
        let ledger = TraceLedger::new(ring);
        let a = Action::new(agent.clone(), "A", 1, 1);
        let b = Action::new(agent, "B", 2, 2);
        ledger.append_sealed(a.clone(), Hash256::digest(b"0"), Hash256::digest(b"1"), &key).unwrap();
        ledger.append_sealed(b.clone(), Hash256::digest(b"1"), Hash256::digest(b"2"), &key).unwrap();
        let snap = ledger.snapshot().unwrap();
        assert_eq!(snap.position_of(&a.id()), Some(0));
        assert_eq!(snap.position_of(&b.id()), Some(1));
        assert_eq!(snap.tail_hash(), ledger.tail_hash().unwrap());
    }

    #[test]
    fn unknown_signer_rejected_on_append() {
        let (agent, key, _) = keyed(2);
        let ledger = TraceLedger::new(KeyRing::new());
        let result = ledger.append_sealed(
            Action::new(agent, "A", 1, 1),
            Hash256::GENESIS,
            Hash256::GENESIS,
            &key,
        );
        assert!(matches!(result, Err(LedgerError::UnknownSigner { .. })));
        assert!(ledger.is_empty().unwrap());
    }

    #[test]
    fn key_ring_keeps_first_key() {
        let (agent, key, mut ring) = keyed(3);
        let other = SigningKey::from_bytes(&[4; 32]);
        assert!(ring.register(agent.clone(), key.verifying_key()).is_ok());
        assert!(matches!(
            ring.register(agent.clone(), other.verifying_key()),
            Err(LedgerError::KeyConflict { .. })
        ));
        assert_eq!(ring.get(&agent), Some(&key.verifying_key()));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn chunked_storage_spans_boundaries() {
        let (agent, key, ring) = keyed(5);
        let ledger = TraceLedger::new(ring);
        let mut held = Vec::new();
        let total = CHUNK_LEN * 2 + 3;
        for i in 0..total as u64 {
            ledger
                .append_sealed(Action::new(agent.clone(), "STEP", i, i), Hash256::GENESIS, Hash256::GENESIS, &key)
                .unwrap();
            if i % 97 == 0 {
                held.push(ledger.snapshot().unwrap());
            }
        }
        let snap = ledger.snapshot().unwrap();
        assert_eq!(snap.len(), total);
        assert_eq!(snap.iter().count(), total);
        assert!(snap.verify_all().is_ok());
        let boundary = snap.at(CHUNK_LEN).unwrap();
        assert_eq!(snap.position_of(&boundary.trace.action_ref), Some(CHUNK_LEN));
        assert_eq!(snap.range(total - 2..total + 5).count(), 2);
        for old in &held {
            assert!(old.len() < total);
            assert!(old.verify_all().is_ok());
        }
    }
}
