use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::address::Address;
use crate::model::obex::ObjectPushData;

/// The kind of authorization the provider is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    DisplayPincode,
    DisplayPasskey,
    ConfirmPasskey,
    AuthorizePairing,
    AuthorizeService,
    AuthorizeTransfer,
}

/// How the provider expects the request to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyMethod {
    #[serde(rename = "reply-none")]
    None,
    #[serde(rename = "reply-yes-no")]
    YesNo,
    #[serde(rename = "reply-with-input")]
    WithInput,
}

impl AuthKind {
    /// The reply method each kind uses.
    pub fn reply_method(&self) -> ReplyMethod {
        match self {
            Self::DisplayPincode | Self::DisplayPasskey => ReplyMethod::WithInput,
            Self::ConfirmPasskey
            | Self::AuthorizePairing
            | Self::AuthorizeService
            | Self::AuthorizeTransfer => ReplyMethod::YesNo,
        }
    }
}

/// Kind-specific payload of an authorization request.
#[derive(Debug, Clone)]
pub enum AuthPayload {
    None,
    Pincode(String),
    Passkey { passkey: u32, entered: u16 },
    Service(Uuid),
    Transfer(Box<ObjectPushData>),
}

/// A cancellable wall-clock deadline carried into every authorizer call.
///
/// The provider sets the expiry; the authorizer must stop prompting once
/// it passes or once `cancel` fires (e.g. the remote side aborted
/// pairing).
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    token: CancellationToken,
}

impl Deadline {
    /// A deadline expiring `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Time left before expiry; zero once passed.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Cancel the deadline early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the deadline expires or is cancelled, whichever
    /// comes first.
    pub async fn expired(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.expires_at) => {}
        }
    }
}

/// An asynchronous authorization request from the provider.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Provider-assigned correlation id for the reply.
    pub id: u32,
    pub kind: AuthKind,
    pub reply_method: ReplyMethod,
    pub deadline: Deadline,
    pub address: Address,
    pub payload: AuthPayload,
}

impl AuthRequest {
    /// The textual value an affirmative reply carries back to the
    /// provider: the displayed input for `reply-with-input` requests,
    /// "yes" for yes/no ones.
    pub fn affirmative_reply(&self) -> String {
        match (self.reply_method, &self.payload) {
            (ReplyMethod::WithInput, AuthPayload::Pincode(pincode)) => pincode.clone(),
            (ReplyMethod::WithInput, AuthPayload::Passkey { passkey, .. }) => passkey.to_string(),
            _ => "yes".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_methods() {
        assert_eq!(
            AuthKind::DisplayPincode.reply_method(),
            ReplyMethod::WithInput
        );
        assert_eq!(AuthKind::ConfirmPasskey.reply_method(), ReplyMethod::YesNo);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(deadline.remaining() > Duration::ZERO);

        deadline.expired().await;
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn deadline_cancel_wins() {
        let deadline = Deadline::after(Duration::from_secs(3600));
        deadline.cancel();

        // Resolves immediately despite the distant expiry.
        deadline.expired().await;
        assert!(deadline.is_cancelled());
    }

    #[test]
    fn affirmative_reply_value() {
        let display = AuthRequest {
            id: 1,
            kind: AuthKind::DisplayPasskey,
            reply_method: ReplyMethod::WithInput,
            deadline: Deadline::after(Duration::from_secs(1)),
            address: Address::NIL,
            payload: AuthPayload::Passkey {
                passkey: 102_934,
                entered: 0,
            },
        };
        assert_eq!(display.affirmative_reply(), "102934");

        let confirm = AuthRequest {
            kind: AuthKind::ConfirmPasskey,
            reply_method: ReplyMethod::YesNo,
            ..display
        };
        assert_eq!(confirm.affirmative_reply(), "yes");
    }
}
