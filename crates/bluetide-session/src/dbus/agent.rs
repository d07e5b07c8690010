// ── Pairing agent ──
//
// The object BlueZ calls back into for pairing authentication. All
// public methods are exported to the agent manager over the system bus
// and invoked by it only; outcomes other than acceptance reply with
// org.bluez.Error.Rejected. Errors raised along the way are published
// on the error event stream.

use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use bluetide_core::{AuthKind, AuthPayload, AuthRequest, Deadline, Error};

use crate::dbus::paths::{PathConverter, PathKind};
use crate::SessionShared;

pub(crate) const AGENT_PATH: &str = "/org/bluetide/agent";
pub(crate) const AGENT_CAPABILITY: &str = "KeyboardDisplay";

// Static replies for the request callbacks the UI never sees.
const AGENT_PINCODE: &str = "0000";
const AGENT_PASSKEY: u32 = 1024;

/// Error surface of the exported agent.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.bluez.Error")]
pub(crate) enum AgentError {
    #[zbus(error)]
    ZBus(zbus::Error),
    Rejected(String),
    Canceled(String),
}

fn rejected() -> AgentError {
    AgentError::Rejected("Rejected".into())
}

pub(crate) struct PairingAgent {
    shared: Arc<SessionShared>,
    paths: Arc<PathConverter>,

    // The in-flight exchange, so a provider-side Cancel can cut the
    // prompt short.
    current: Mutex<Option<Deadline>>,
}

impl PairingAgent {
    pub(crate) fn new(shared: Arc<SessionShared>, paths: Arc<PathConverter>) -> Self {
        Self {
            shared,
            paths,
            current: Mutex::new(None),
        }
    }

    fn resolve_device(&self, device: &ObjectPath<'_>) -> Result<bluetide_core::Address, AgentError> {
        self.paths
            .address(PathKind::Device, device)
            .ok_or_else(|| {
                let err = Error::property_parse(format!("no device mapped at {device}"));
                self.shared.bus.publish_error(&err);
                rejected()
            })
    }

    /// Build the request, run it through the broker, and translate the
    /// outcome into the agent reply.
    async fn authorize(
        &self,
        kind: AuthKind,
        address: bluetide_core::Address,
        payload: AuthPayload,
    ) -> Result<(), AgentError> {
        let deadline = Deadline::after(self.shared.config().auth_timeout);
        *self.current.lock().await = Some(deadline.clone());

        let request = AuthRequest {
            id: 0,
            kind,
            reply_method: kind.reply_method(),
            deadline,
            address,
            payload,
        };

        self.shared.bus.auth.publish_added(request.clone());
        let outcome = self.shared.broker.dispatch(&request).await;
        *self.current.lock().await = None;

        match outcome {
            bluetide_core::AuthOutcome::Accept => Ok(()),
            bluetide_core::AuthOutcome::Cancelled => {
                Err(AgentError::Canceled("Canceled".into()))
            }
            bluetide_core::AuthOutcome::Deny => Err(rejected()),
        }
    }
}

#[zbus::interface(name = "org.bluez.Agent1")]
impl PairingAgent {
    /// BlueZ asks for a pincode the local side chose; reply with the
    /// static one.
    async fn request_pin_code(&self, _device: OwnedObjectPath) -> Result<String, AgentError> {
        Ok(AGENT_PINCODE.to_owned())
    }

    async fn request_passkey(&self, _device: OwnedObjectPath) -> Result<u32, AgentError> {
        Ok(AGENT_PASSKEY)
    }

    async fn display_pin_code(
        &self,
        device: OwnedObjectPath,
        pincode: String,
    ) -> Result<(), AgentError> {
        let address = self.resolve_device(&device)?;
        self.authorize(
            AuthKind::DisplayPincode,
            address,
            AuthPayload::Pincode(pincode),
        )
        .await
    }

    /// Invoked repeatedly as the remote side enters digits; each call
    /// is forwarded so the prompt can redraw.
    async fn display_passkey(&self, device: OwnedObjectPath, passkey: u32, entered: u16) {
        let Ok(address) = self.resolve_device(&device) else {
            return;
        };

        let _ = self
            .authorize(
                AuthKind::DisplayPasskey,
                address,
                AuthPayload::Passkey { passkey, entered },
            )
            .await;
    }

    async fn request_confirmation(
        &self,
        device: OwnedObjectPath,
        passkey: u32,
    ) -> Result<(), AgentError> {
        let address = self.resolve_device(&device)?;
        self.authorize(
            AuthKind::ConfirmPasskey,
            address,
            AuthPayload::Passkey {
                passkey,
                entered: 0,
            },
        )
        .await
    }

    async fn request_authorization(&self, device: OwnedObjectPath) -> Result<(), AgentError> {
        let address = self.resolve_device(&device)?;
        self.authorize(AuthKind::AuthorizePairing, address, AuthPayload::None)
            .await
    }

    async fn authorize_service(
        &self,
        device: OwnedObjectPath,
        uuid: String,
    ) -> Result<(), AgentError> {
        let address = self.resolve_device(&device)?;
        let service = uuid.parse().unwrap_or_default();
        self.authorize(AuthKind::AuthorizeService, address, AuthPayload::Service(service))
            .await
    }

    /// The provider aborted the exchange; cut the prompt short.
    async fn cancel(&self) {
        if let Some(deadline) = self.current.lock().await.take() {
            deadline.cancel();
        }
    }

    async fn release(&self) {}
}
