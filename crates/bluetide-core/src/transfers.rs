// ── Object Push session and transfer registry ──
//
// Tracks per-device OBEX sessions and their in-flight transfers through
// the transfer state machine. Transitions are driven entirely by
// provider events; an event that names an impossible transition is
// rejected so a misbehaving provider cannot corrupt transfer state.

use dashmap::DashMap;
use std::collections::HashMap;

use crate::address::Address;
use crate::error::Error;
use crate::model::{ObjectPushData, TransferId, TransferStatus};
use crate::Result;

/// A live Object Push session with a remote device.
#[derive(Debug, Default, Clone)]
pub struct ObexSession {
    transfers: HashMap<TransferId, ObjectPushData>,
    saw_transfer: bool,
}

impl ObexSession {
    /// Whether every transfer this session ever carried has reached a
    /// terminal state.
    fn is_drained(&self) -> bool {
        self.saw_transfer && self.transfers.is_empty()
    }
}

/// Registry of Object Push sessions keyed by device address.
#[derive(Default)]
pub struct TransferRegistry {
    sessions: DashMap<Address, ObexSession>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or re-open) a session for a device.
    pub fn open_session(&self, address: Address) {
        self.sessions.insert(address, ObexSession::default());
    }

    /// Explicitly close a session, discarding its transfers.
    pub fn close_session(&self, address: Address) {
        self.sessions.remove(&address);
    }

    pub fn has_session(&self, address: Address) -> bool {
        self.sessions.contains_key(&address)
    }

    /// Track a newly announced transfer. Opens the session implicitly
    /// for inbound transfers the provider starts on its own.
    pub fn track(&self, transfer: ObjectPushData) {
        let mut session = self.sessions.entry(transfer.address).or_default();
        session.saw_transfer = true;
        session
            .transfers
            .insert(transfer.transfer_id.clone(), transfer);
    }

    /// The most recently tracked non-terminal transfer for a device.
    pub fn active_transfer(&self, address: Address) -> Option<ObjectPushData> {
        self.sessions.get(&address).and_then(|session| {
            session
                .transfers
                .values()
                .find(|transfer| !transfer.status.is_terminal())
                .cloned()
        })
    }

    /// Apply a provider-reported status/progress update.
    ///
    /// Validates the state machine; an invalid transition fails with an
    /// event-parse error and mutates nothing. Terminal transfers are
    /// removed from their session, and a session whose transfers have
    /// all drained is closed. Returns the transfer after the update.
    pub fn update(
        &self,
        address: Address,
        transfer_id: &TransferId,
        status: TransferStatus,
        transferred: u64,
    ) -> Result<ObjectPushData> {
        let mut session = self
            .sessions
            .get_mut(&address)
            .ok_or(Error::ObexNotInitialized)?;

        let transfer = session
            .transfers
            .get_mut(transfer_id)
            .ok_or_else(|| Error::event_parse(format!("unknown transfer {transfer_id}")))?;

        if !transfer.status.can_transition(status) {
            return Err(Error::event_parse(format!(
                "transfer {transfer_id}: impossible transition {} -> {status}",
                transfer.status
            )));
        }

        transfer.status = status;
        if transferred > 0 {
            transfer.transferred = if transfer.size > 0 {
                transferred.min(transfer.size)
            } else {
                transferred
            };
        }

        let updated = transfer.clone();

        if status.is_terminal() {
            session.transfers.remove(transfer_id);
            if session.is_drained() {
                drop(session);
                self.sessions.remove(&address);
            }
        }

        Ok(updated)
    }

    /// Drop a transfer the provider reports as gone, without requiring
    /// a terminal status first.
    pub fn untrack(&self, address: Address, transfer_id: &TransferId) {
        if let Some(mut session) = self.sessions.get_mut(&address) {
            session.transfers.remove(transfer_id);
            if session.is_drained() {
                drop(session);
                self.sessions.remove(&address);
            }
        }
    }
}
