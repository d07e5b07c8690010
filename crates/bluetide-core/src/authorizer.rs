//! The user-supplied authorization surface.
//!
//! The provider raises asynchronous authorization requests (pairing
//! confirmations, passkey displays, inbound file transfers); the
//! authorization broker in the session layer forwards them here. Every
//! method receives the provider's [`Deadline`] and must stop prompting
//! once it expires or is cancelled.

use async_trait::async_trait;
use uuid::Uuid;

use crate::address::Address;
use crate::model::{Deadline, ObjectPushData};

/// The outcome of an authorization prompt.
///
/// Cancellation is an outcome, not an error: the broker reports it to
/// the provider as a rejection and to the UI as "cancelled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accept,
    Deny,
    Cancelled,
}

impl AuthOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Interactive authorization handler supplied by the UI.
///
/// Implementers must provide all six capabilities. The display methods
/// are informational: returning [`AuthOutcome::Accept`] acknowledges the
/// display, anything else dismisses the exchange. `display_passkey` may
/// be invoked repeatedly as the remote side enters digits; implementers
/// may coalesce redraws but should keep the prompt open until the
/// deadline or a terminal event.
#[async_trait]
pub trait SessionAuthorizer: Send + Sync {
    async fn display_pincode(&self, deadline: Deadline, address: Address, pincode: &str)
        -> AuthOutcome;

    async fn display_passkey(
        &self,
        deadline: Deadline,
        address: Address,
        passkey: u32,
        entered: u16,
    ) -> AuthOutcome;

    async fn confirm_passkey(&self, deadline: Deadline, address: Address, passkey: u32)
        -> AuthOutcome;

    async fn authorize_pairing(&self, deadline: Deadline, address: Address) -> AuthOutcome;

    async fn authorize_service(
        &self,
        deadline: Deadline,
        address: Address,
        service: Uuid,
    ) -> AuthOutcome;

    async fn authorize_transfer(&self, deadline: Deadline, transfer: &ObjectPushData)
        -> AuthOutcome;
}

/// Default authorizer that accepts every request. Used when the caller
/// does not supply one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl SessionAuthorizer for AcceptAll {
    async fn display_pincode(&self, _: Deadline, _: Address, _: &str) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn display_passkey(&self, _: Deadline, _: Address, _: u32, _: u16) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn confirm_passkey(&self, _: Deadline, _: Address, _: u32) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn authorize_pairing(&self, _: Deadline, _: Address) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn authorize_service(&self, _: Deadline, _: Address, _: Uuid) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn authorize_transfer(&self, _: Deadline, _: &ObjectPushData) -> AuthOutcome {
        AuthOutcome::Accept
    }
}
