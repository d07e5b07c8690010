// ── Inbound event dispatch ──
//
// Translates daemon events into object-store merges and event-bus
// publications. Decode failures and store misses are published on the
// error stream instead of tearing the session down.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use bluetide_core::bus::{EventId, EventKind};
use bluetide_core::{
    AdapterPatch, AdapterSnapshot, Address, AuthKind, AuthPayload, AuthRequest, DevicePatch,
    DeviceSnapshot, Error, ErrorEvent, MediaData, ObjectPushData, ObjectPushEvent, Result,
};

use crate::rpc::commands;
use crate::rpc::transport::{InboundFrame, RpcTransport};
use crate::SessionShared;

/// Authentication event payload as the daemon sends it.
#[derive(Debug, Deserialize)]
struct AuthEventFrame {
    #[serde(default)]
    auth_id: u32,

    auth_event: AuthKind,

    #[serde(default)]
    timeout_ms: u64,

    #[serde(default)]
    address: Address,

    #[serde(default)]
    pincode: Option<String>,

    #[serde(default)]
    passkey: Option<u32>,

    #[serde(default)]
    entered: Option<u16>,

    #[serde(default)]
    uuid: Option<Uuid>,

    #[serde(default)]
    file_transfer: Option<ObjectPushData>,
}

impl AuthEventFrame {
    fn into_request(self, default_timeout: std::time::Duration) -> AuthRequest {
        let timeout = if self.timeout_ms > 0 {
            std::time::Duration::from_millis(self.timeout_ms)
        } else {
            default_timeout
        };

        let payload = match self.auth_event {
            AuthKind::DisplayPincode => {
                AuthPayload::Pincode(self.pincode.unwrap_or_default())
            }
            AuthKind::DisplayPasskey | AuthKind::ConfirmPasskey => AuthPayload::Passkey {
                passkey: self.passkey.unwrap_or_default(),
                entered: self.entered.unwrap_or_default(),
            },
            AuthKind::AuthorizeService => {
                AuthPayload::Service(self.uuid.unwrap_or_default())
            }
            AuthKind::AuthorizeTransfer => {
                AuthPayload::Transfer(Box::new(self.file_transfer.unwrap_or_default()))
            }
            AuthKind::AuthorizePairing => AuthPayload::None,
        };

        AuthRequest {
            id: self.auth_id,
            kind: self.auth_event,
            reply_method: self.auth_event.reply_method(),
            deadline: bluetide_core::Deadline::after(timeout),
            address: self.address,
            payload,
        }
    }
}

/// Dispatch one inbound event frame.
pub(crate) async fn handle_event(
    shared: &Arc<SessionShared>,
    transport: &Arc<RpcTransport>,
    frame: InboundFrame,
) {
    let Some(id) = EventId::from_wire(frame.event_id) else {
        publish_error(shared, Error::event_parse(format!("unknown event id {}", frame.event_id)));
        return;
    };

    let action = frame.event_action.unwrap_or(EventKind::Added);
    let payload = frame.event.unwrap_or(serde_json::Value::Null);

    let outcome = match id {
        EventId::Error => handle_error_event(shared, payload),
        EventId::Authentication => handle_auth_event(shared, transport, payload),
        EventId::Adapter => handle_adapter_event(shared, transport, action, payload).await,
        EventId::Device => handle_device_event(shared, action, payload),
        EventId::ObjectPush => handle_object_push_event(shared, action, payload),
        EventId::MediaPlayer => handle_media_event(shared, action, payload),
    };

    if let Err(err) = outcome {
        publish_error(shared, err);
    }
}

fn publish_error(shared: &SessionShared, err: Error) {
    tracing::debug!(error = %err, "event handler error");
    shared.bus.publish_error(&err);
}

fn decode<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|err| Error::event_parse(err.to_string()))
}

fn handle_error_event(shared: &SessionShared, payload: serde_json::Value) -> Result<()> {
    let event: ErrorEvent = decode(payload)?;
    shared.bus.errors.publish_added(event);
    Ok(())
}

/// Authorization requests get their own task so concurrent prompts for
/// distinct devices never block the reader.
fn handle_auth_event(
    shared: &Arc<SessionShared>,
    transport: &Arc<RpcTransport>,
    payload: serde_json::Value,
) -> Result<()> {
    let frame: AuthEventFrame = decode(payload)?;
    let request = frame.into_request(shared.config().auth_timeout);

    let shared = Arc::clone(shared);
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        shared.bus.auth.publish_added(request.clone());

        let outcome = shared.broker.dispatch(&request).await;
        let response = if outcome.is_accept() {
            request.affirmative_reply()
        } else {
            "no".to_owned()
        };

        // Give the daemon a little slack beyond the prompt deadline.
        let reply_timeout = request.deadline.remaining() + std::time::Duration::from_secs(2);
        let command = commands::authentication_reply(request.id, &response);
        if let Err(err) = transport.execute(command.tokens(), reply_timeout).await {
            shared.bus.publish_error(&err);
        }
    });

    Ok(())
}

async fn handle_adapter_event(
    shared: &Arc<SessionShared>,
    transport: &Arc<RpcTransport>,
    action: EventKind,
    payload: serde_json::Value,
) -> Result<()> {
    match action {
        EventKind::Added => {
            // The announcement may be a projection; fetch the full
            // snapshot before priming the store.
            let announced: AdapterSnapshot = decode(payload)?;
            let command = commands::adapter_properties(announced.address);
            let reply = transport
                .execute(command.tokens(), commands::COMMAND_REPLY_TIMEOUT)
                .await?;
            let adapter: AdapterSnapshot = commands::decode_reply(reply)?;

            shared.store.add_adapter(adapter.clone());
            shared.bus.adapters.publish_added(adapter);
        }

        EventKind::Updated => {
            let patch: AdapterPatch = decode(payload)?;
            let address = patch.address.ok_or_else(|| {
                Error::event_parse("adapter update without an address")
            })?;

            let updated = shared.store.update_adapter(address, |adapter| {
                patch.apply(adapter);
                Ok(())
            })?;
            shared.bus.adapters.publish_updated(updated);
        }

        EventKind::Removed => {
            let patch: AdapterPatch = decode(payload)?;
            let address = patch.address.ok_or_else(|| {
                Error::event_parse("adapter removal without an address")
            })?;

            remove_adapter(shared, address);
        }
    }

    Ok(())
}

/// Remove an adapter and cascade removal of its orphaned devices.
pub(crate) fn remove_adapter(shared: &SessionShared, address: Address) {
    for device in shared.store.devices() {
        if device.associated_adapter == address {
            shared.store.remove_device(device.address);
            shared
                .bus
                .devices
                .publish_removed(bluetide_core::DeviceEvent::removed(device.address, address));
        }
    }

    shared.store.remove_adapter(address);
    shared
        .bus
        .adapters
        .publish_removed(bluetide_core::AdapterEvent::removed(address));
}

fn handle_device_event(
    shared: &SessionShared,
    action: EventKind,
    payload: serde_json::Value,
) -> Result<()> {
    match action {
        EventKind::Added => {
            let mut device: DeviceSnapshot = decode(payload)?;
            device.normalize();

            shared.store.add_device(device.clone());
            shared.bus.devices.publish_added(device);
        }

        EventKind::Updated => {
            let patch: DevicePatch = decode(payload)?;
            let address = patch
                .address
                .ok_or_else(|| Error::event_parse("device update without an address"))?;

            let updated = shared.store.update_device(address, |device| {
                patch.apply(device);
                Ok(())
            })?;
            shared.bus.devices.publish_updated(updated);
        }

        EventKind::Removed => {
            let patch: DevicePatch = decode(payload)?;
            let address = patch
                .address
                .ok_or_else(|| Error::event_parse("device removal without an address"))?;

            let removed = shared.store.remove_device(address);
            let adapter = removed
                .map(|device| device.associated_adapter)
                .or(patch.associated_adapter)
                .unwrap_or(Address::NIL);

            shared
                .bus
                .devices
                .publish_removed(bluetide_core::DeviceEvent::removed(address, adapter));
        }
    }

    Ok(())
}

fn handle_object_push_event(
    shared: &SessionShared,
    action: EventKind,
    payload: serde_json::Value,
) -> Result<()> {
    match action {
        EventKind::Added => {
            let transfer: ObjectPushData = decode(payload)?;
            shared.transfers.track(transfer.clone());
            shared.bus.object_push.publish_added(transfer);
        }

        EventKind::Updated => {
            let event: ObjectPushEvent = decode(payload)?;
            let updated = shared.transfers.update(
                event.address,
                &event.transfer_id,
                event.status,
                event.transferred,
            )?;
            shared
                .bus
                .object_push
                .publish_updated(ObjectPushEvent::from(&updated));
        }

        EventKind::Removed => {
            let event: ObjectPushEvent = decode(payload)?;
            shared.transfers.untrack(event.address, &event.transfer_id);
            shared.bus.object_push.publish_removed(event);
        }
    }

    Ok(())
}

fn handle_media_event(
    shared: &SessionShared,
    action: EventKind,
    payload: serde_json::Value,
) -> Result<()> {
    let mut media: MediaData = decode(payload)?;
    media.clamp_position();

    match action {
        EventKind::Added => shared.bus.media.publish_added(media),
        EventKind::Updated => shared.bus.media.publish_updated(media),
        EventKind::Removed => shared.bus.media.publish_removed(media),
    }

    Ok(())
}
