//! Shared ledger transport.
//!
//! The engine only ever issues mutator closures against a `LedgerTransport`.
//! `LedgerHub` is an in-process replication hub: every client holds a
//! `Replica` with its own snapshot, writes publish the whole record, and the
//! hub keeps whichever write arrived last (last-writer-wins, no field merge).

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::kingdom::KingdomLedger;

/// Read and update access to the shared kingdom record.
pub trait LedgerTransport {
    /// The freshest snapshot this client has received.
    fn read(&mut self) -> &KingdomLedger;

    /// Applies `mutator` to a draft of the freshest snapshot and publishes it.
    ///
    /// If the mutator fails, nothing is published and the local snapshot is
    /// unchanged.
    fn update<R, E, F>(&mut self, label: &str, mutator: F) -> Result<R, E>
    where
        F: FnOnce(&mut KingdomLedger) -> Result<R, E>;
}

/// A published version of the ledger.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub ledger: Arc<KingdomLedger>,
}

struct HubState {
    version: u64,
    ledger: Arc<KingdomLedger>,
    subscribers: Vec<Sender<Snapshot>>,
}

/// In-process replication hub.
#[derive(Clone)]
pub struct LedgerHub {
    inner: Arc<Mutex<HubState>>,
}

impl LedgerHub {
    pub fn new(ledger: KingdomLedger) -> Self {
        LedgerHub {
            inner: Arc::new(Mutex::new(HubState {
                version: 0,
                ledger: Arc::new(ledger),
                subscribers: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connects a new client replica seeded with the current record.
    pub fn connect(&self) -> Replica {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state();
        state.subscribers.push(tx);
        Replica {
            hub: self.clone(),
            local: (*state.ledger).clone(),
            version: state.version,
            rx,
            hold_sync: false,
        }
    }

    /// The last write the hub accepted.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            version: state.version,
            ledger: Arc::clone(&state.ledger),
        }
    }

    /// Accepts `ledger` as the new record and broadcasts it.
    fn publish(&self, label: &str, ledger: KingdomLedger) -> u64 {
        let mut state = self.state();
        state.version += 1;
        state.ledger = Arc::new(ledger);
        let snapshot = Snapshot {
            version: state.version,
            ledger: Arc::clone(&state.ledger),
        };
        state.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        trace!(label, version = snapshot.version, "ledger published");
        snapshot.version
    }
}

/// One client's view of the shared record.
pub struct Replica {
    hub: LedgerHub,
    local: KingdomLedger,
    version: u64,
    rx: Receiver<Snapshot>,
    hold_sync: bool,
}

impl Replica {
    /// Applies every broadcast received so far, keeping the newest.
    pub fn sync(&mut self) {
        while let Ok(snapshot) = self.rx.try_recv() {
            if snapshot.version > self.version {
                self.version = snapshot.version;
                self.local = (*snapshot.ledger).clone();
            }
        }
    }

    /// While held, reads and updates work from the stale local snapshot,
    /// as a client would under replication lag.
    pub fn hold_sync(&mut self, hold: bool) {
        self.hold_sync = hold;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn hub(&self) -> &LedgerHub {
        &self.hub
    }

    fn maybe_sync(&mut self) {
        if !self.hold_sync {
            self.sync();
        }
    }
}

impl LedgerTransport for Replica {
    fn read(&mut self) -> &KingdomLedger {
        self.maybe_sync();
        &self.local
    }

    fn update<R, E, F>(&mut self, label: &str, mutator: F) -> Result<R, E>
    where
        F: FnOnce(&mut KingdomLedger) -> Result<R, E>,
    {
        self.maybe_sync();
        let mut draft = self.local.clone();
        let result = mutator(&mut draft)?;
        self.version = self.hub.publish(label, draft.clone());
        self.local = draft;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kingdom::Resource;

    #[test]
    fn update_is_visible_to_other_replicas() {
        let hub = LedgerHub::new(KingdomLedger::new("k"));
        let mut a = hub.connect();
        let mut b = hub.connect();
        a.update::<_, (), _>("gold", |l| {
            l.adjust_resource(Resource::Gold, 5);
            Ok(())
        })
        .unwrap();
        assert_eq!(b.read().resource(Resource::Gold), 5);
        assert_eq!(hub.snapshot().version, 1);
    }

    #[test]
    fn failed_mutator_publishes_nothing() {
        let hub = LedgerHub::new(KingdomLedger::new("k"));
        let mut a = hub.connect();
        let result: Result<(), &str> = a.update("bad", |l| {
            l.adjust_resource(Resource::Gold, 5);
            Err("nope")
        });
        assert_eq!(result, Err("nope"));
        assert_eq!(a.read().resource(Resource::Gold), 0);
        assert_eq!(hub.snapshot().version, 0);
    }

    #[test]
    fn last_writer_wins_on_whole_record() {
        let hub = LedgerHub::new(KingdomLedger::new("k"));
        let mut a = hub.connect();
        let mut b = hub.connect();
        a.hold_sync(true);
        b.hold_sync(true);
        a.update::<_, (), _>("a", |l| {
            l.adjust_resource(Resource::Gold, 3);
            Ok(())
        })
        .unwrap();
        b.update::<_, (), _>("b", |l| {
            l.adjust_resource(Resource::Food, 2);
            Ok(())
        })
        .unwrap();
        let final_record = hub.snapshot();
        assert_eq!(final_record.version, 2);
        assert_eq!(final_record.ledger.resource(Resource::Gold), 0);
        assert_eq!(final_record.ledger.resource(Resource::Food), 2);

        a.hold_sync(false);
        assert_eq!(a.read().resource(Resource::Gold), 0);
        assert_eq!(a.version(), 2);
    }
}
