use crate::source::PeerSource;
use std::sync::Arc;
use tracing::{info, warn};

/// Invalid deltas tolerated from one peer before it is dropped.
pub const DEFAULT_MAX_STRIKES: u32 = 3;

/// Times unresponsive peers are re-admitted, without a successful poll in
/// between, before the set counts as exhausted.
pub const DEFAULT_READMISSION_ROUNDS: u32 = 2;

struct PeerSlot {
    source: Arc<dyn PeerSource>,
    strikes: u32,
    struck_out: bool,
    unresponsive: bool,
}

impl PeerSlot {
    fn available(&self) -> bool {
        !self.struck_out && !self.unresponsive
    }
}

/// Peer pool with deprioritization.
///
/// Peers serving invalid deltas accumulate strikes, rank below cleaner peers
/// and are dropped for good at `max_strikes`. Peers that stop answering sit
/// out until every other peer is unavailable too; they are then re-admitted,
/// at most `readmission_rounds` times between two answered polls.
pub struct PeerSet {
    slots: Vec<PeerSlot>,
    max_strikes: u32,
    readmission_rounds: u32,
    readmissions: u32,
}

impl PeerSet {
    pub fn new(peers: Vec<Arc<dyn PeerSource>>) -> Self {
        Self::with_max_strikes(peers, DEFAULT_MAX_STRIKES)
    }

    pub fn with_max_strikes(peers: Vec<Arc<dyn PeerSource>>, max_strikes: u32) -> Self {
        Self {
            slots: peers
                .into_iter()
                .map(|source| PeerSlot {
                    source,
                    strikes: 0,
                    struck_out: false,
                    unresponsive: false,
                })
                .collect(),
            max_strikes: max_strikes.max(1),
            readmission_rounds: DEFAULT_READMISSION_ROUNDS,
            readmissions: 0,
        }
    }

    pub fn with_readmission_rounds(mut self, rounds: u32) -> Self {
        self.readmission_rounds = rounds;
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Best available peer: fewest strikes, then configuration order.
    ///
    /// When only unresponsive peers are left and rounds remain, they are
    /// re-admitted first.
    pub fn select(&mut self) -> Option<(usize, Arc<dyn PeerSource>)> {
        if let Some(pick) = self.best() {
            return Some(pick);
        }
        if !self.can_readmit() {
            return None;
        }
        self.readmissions += 1;
        let mut readmitted = 0;
        for slot in self.slots.iter_mut().filter(|slot| slot.unresponsive) {
            slot.unresponsive = false;
            readmitted += 1;
        }
        info!(
            round = self.readmissions,
            readmitted, "re-admitting unresponsive peers"
        );
        self.best()
    }

    fn best(&self) -> Option<(usize, Arc<dyn PeerSource>)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.available())
            .min_by_key(|(index, slot)| (slot.strikes, *index))
            .map(|(index, slot)| (index, Arc::clone(&slot.source)))
    }

    fn can_readmit(&self) -> bool {
        self.readmissions < self.readmission_rounds
            && self
                .slots
                .iter()
                .any(|slot| slot.unresponsive && !slot.struck_out)
    }

    /// The peer answered a poll; re-admission rounds start over.
    pub fn record_responsive(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.unresponsive = false;
            self.readmissions = 0;
        }
    }

    /// The peer served deltas that applied; its strikes are forgiven.
    pub fn record_success(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.strikes = 0;
        }
        self.record_responsive(index);
    }

    /// Benches a peer whose retries ran out.
    pub fn record_unresponsive(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.unresponsive = true;
            warn!(peer = slot.source.name(), "peer unresponsive, rotating away");
        }
    }

    /// Adds a strike for an invalid delta; drops the peer at `max_strikes`.
    pub fn record_invalid(&mut self, index: usize) {
        let max_strikes = self.max_strikes;
        if let Some(slot) = self.slots.get_mut(index) {
            slot.strikes += 1;
            if slot.strikes >= max_strikes {
                slot.struck_out = true;
            }
            warn!(
                peer = slot.source.name(),
                strikes = slot.strikes,
                dropped = slot.struck_out,
                "peer served an invalid delta"
            );
        }
    }

    pub fn strikes(&self, index: usize) -> Option<u32> {
        self.slots.get(index).map(|slot| slot.strikes)
    }

    /// True when `select` can no longer produce a peer.
    pub fn all_exhausted(&self) -> bool {
        !self.slots.iter().any(PeerSlot::available) && !self.can_readmit()
    }

    /// Peers selectable right now, without re-admission.
    pub fn remaining(&self) -> usize {
        self.slots.iter().filter(|slot| slot.available()).count()
    }
}
