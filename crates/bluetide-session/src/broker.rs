// ── Authorization broker ──
//
// Mediates between provider-initiated authorization requests and the
// user-supplied authorizer. Requests for the same address are
// serialized; distinct addresses prompt in parallel. Until the session
// facade finishes initialization the broker silently accepts, so the
// provider can complete its own startup handshakes without prompting
// the user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use bluetide_core::{
    AcceptAll, Address, AuthKind, AuthOutcome, AuthPayload, AuthRequest, SessionAuthorizer,
};

pub struct AuthBroker {
    authorizer: std::sync::RwLock<Arc<dyn SessionAuthorizer>>,
    initialized: AtomicBool,

    // Per-address prompt serialization.
    locks: DashMap<Address, Arc<Mutex<()>>>,

    // Services the user chose to always authorize this session.
    sticky_services: DashMap<(Address, Uuid), ()>,
}

impl AuthBroker {
    pub fn new() -> Self {
        Self {
            authorizer: std::sync::RwLock::new(Arc::new(AcceptAll)),
            initialized: AtomicBool::new(false),
            locks: DashMap::new(),
            sticky_services: DashMap::new(),
        }
    }

    pub fn set_authorizer(&self, authorizer: Arc<dyn SessionAuthorizer>) {
        *self.authorizer.write().expect("authorizer lock poisoned") = authorizer;
    }

    /// Flip between the silent startup mode and interactive delegation.
    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::Release);
        if !initialized {
            self.sticky_services.clear();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Remember an affirmative service authorization for the rest of
    /// the session.
    pub fn remember_service(&self, address: Address, service: Uuid) {
        self.sticky_services.insert((address, service), ());
    }

    fn address_lock(&self, address: Address) -> Arc<Mutex<()>> {
        self.locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one authorization exchange to completion.
    ///
    /// The provider deadline is forwarded verbatim; if the authorizer
    /// has not answered by then, the outcome is
    /// [`AuthOutcome::Cancelled`] and the caller replies "rejected" to
    /// the provider.
    pub async fn dispatch(&self, request: &AuthRequest) -> AuthOutcome {
        if !self.is_initialized() {
            return AuthOutcome::Accept;
        }

        if let (AuthKind::AuthorizeService, AuthPayload::Service(service)) =
            (request.kind, &request.payload)
        {
            if self
                .sticky_services
                .contains_key(&(request.address, *service))
            {
                tracing::debug!(
                    address = %request.address,
                    %service,
                    "service authorization remembered, auto-accepting"
                );
                return AuthOutcome::Accept;
            }
        }

        let lock = self.address_lock(request.address);
        let _guard = lock.lock().await;

        let authorizer = self
            .authorizer
            .read()
            .expect("authorizer lock poisoned")
            .clone();

        let outcome = tokio::select! {
            outcome = Self::call(authorizer.as_ref(), request) => outcome,
            _ = request.deadline.expired() => {
                tracing::warn!(
                    address = %request.address,
                    kind = ?request.kind,
                    "authorization deadline expired without an answer"
                );
                AuthOutcome::Cancelled
            }
        };

        if outcome.is_accept() {
            if let (AuthKind::AuthorizeService, AuthPayload::Service(service)) =
                (request.kind, &request.payload)
            {
                self.remember_service(request.address, *service);
            }
        }

        outcome
    }

    async fn call(authorizer: &dyn SessionAuthorizer, request: &AuthRequest) -> AuthOutcome {
        let deadline = request.deadline.clone();
        let address = request.address;

        match (&request.kind, &request.payload) {
            (AuthKind::DisplayPincode, AuthPayload::Pincode(pincode)) => {
                authorizer.display_pincode(deadline, address, pincode).await
            }

            (AuthKind::DisplayPasskey, AuthPayload::Passkey { passkey, entered }) => {
                authorizer
                    .display_passkey(deadline, address, *passkey, *entered)
                    .await
            }

            (AuthKind::ConfirmPasskey, AuthPayload::Passkey { passkey, .. }) => {
                authorizer.confirm_passkey(deadline, address, *passkey).await
            }

            (AuthKind::AuthorizePairing, _) => {
                authorizer.authorize_pairing(deadline, address).await
            }

            (AuthKind::AuthorizeService, AuthPayload::Service(service)) => {
                authorizer
                    .authorize_service(deadline, address, *service)
                    .await
            }

            (AuthKind::AuthorizeTransfer, AuthPayload::Transfer(transfer)) => {
                authorizer.authorize_transfer(deadline, transfer).await
            }

            // Kind/payload mismatch: the provider sent something
            // malformed, reject it.
            _ => AuthOutcome::Deny,
        }
    }
}

impl Default for AuthBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use bluetide_core::{Deadline, ObjectPushData, ReplyMethod};

    use super::*;

    fn request(kind: AuthKind, payload: AuthPayload, timeout: Duration) -> AuthRequest {
        AuthRequest {
            id: 7,
            kind,
            reply_method: kind.reply_method(),
            deadline: Deadline::after(timeout),
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            payload,
        }
    }

    struct Stalled;

    #[async_trait]
    impl SessionAuthorizer for Stalled {
        async fn display_pincode(&self, _: Deadline, _: Address, _: &str) -> AuthOutcome {
            std::future::pending().await
        }

        async fn display_passkey(&self, _: Deadline, _: Address, _: u32, _: u16) -> AuthOutcome {
            std::future::pending().await
        }

        async fn confirm_passkey(&self, _: Deadline, _: Address, _: u32) -> AuthOutcome {
            std::future::pending().await
        }

        async fn authorize_pairing(&self, _: Deadline, _: Address) -> AuthOutcome {
            std::future::pending().await
        }

        async fn authorize_service(&self, _: Deadline, _: Address, _: Uuid) -> AuthOutcome {
            std::future::pending().await
        }

        async fn authorize_transfer(&self, _: Deadline, _: &ObjectPushData) -> AuthOutcome {
            std::future::pending().await
        }
    }

    struct DenyAll;

    #[async_trait]
    impl SessionAuthorizer for DenyAll {
        async fn display_pincode(&self, _: Deadline, _: Address, _: &str) -> AuthOutcome {
            AuthOutcome::Deny
        }

        async fn display_passkey(&self, _: Deadline, _: Address, _: u32, _: u16) -> AuthOutcome {
            AuthOutcome::Deny
        }

        async fn confirm_passkey(&self, _: Deadline, _: Address, _: u32) -> AuthOutcome {
            AuthOutcome::Deny
        }

        async fn authorize_pairing(&self, _: Deadline, _: Address) -> AuthOutcome {
            AuthOutcome::Deny
        }

        async fn authorize_service(&self, _: Deadline, _: Address, _: Uuid) -> AuthOutcome {
            AuthOutcome::Deny
        }

        async fn authorize_transfer(&self, _: Deadline, _: &ObjectPushData) -> AuthOutcome {
            AuthOutcome::Deny
        }
    }

    #[tokio::test]
    async fn uninitialized_broker_accepts_silently() {
        let broker = AuthBroker::new();
        broker.set_authorizer(Arc::new(DenyAll));

        let req = request(
            AuthKind::AuthorizePairing,
            AuthPayload::None,
            Duration::from_secs(5),
        );
        assert_eq!(broker.dispatch(&req).await, AuthOutcome::Accept);
    }

    #[tokio::test]
    async fn initialized_broker_delegates() {
        let broker = AuthBroker::new();
        broker.set_authorizer(Arc::new(DenyAll));
        broker.set_initialized(true);

        let req = request(
            AuthKind::AuthorizePairing,
            AuthPayload::None,
            Duration::from_secs(5),
        );
        assert_eq!(broker.dispatch(&req).await, AuthOutcome::Deny);
    }

    #[tokio::test]
    async fn deadline_expiry_cancels_within_grace() {
        let broker = AuthBroker::new();
        broker.set_authorizer(Arc::new(Stalled));
        broker.set_initialized(true);

        let req = request(
            AuthKind::ConfirmPasskey,
            AuthPayload::Passkey {
                passkey: 1234,
                entered: 0,
            },
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let outcome = broker.dispatch(&req).await;

        assert_eq!(outcome, AuthOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn affirmed_service_sticks() {
        let broker = AuthBroker::new();
        broker.set_initialized(true);
        // AcceptAll is the default authorizer.

        let service = Uuid::from_u128(0x1105);
        let req = request(
            AuthKind::AuthorizeService,
            AuthPayload::Service(service),
            Duration::from_secs(5),
        );

        assert_eq!(broker.dispatch(&req).await, AuthOutcome::Accept);

        // A denying authorizer no longer gets asked for that service.
        broker.set_authorizer(Arc::new(DenyAll));
        assert_eq!(broker.dispatch(&req).await, AuthOutcome::Accept);

        // Other kinds still delegate.
        let pairing = request(
            AuthKind::AuthorizePairing,
            AuthPayload::None,
            Duration::from_secs(5),
        );
        assert_eq!(broker.dispatch(&pairing).await, AuthOutcome::Deny);
    }

    #[tokio::test]
    async fn distinct_addresses_prompt_in_parallel() {
        let broker = Arc::new(AuthBroker::new());
        broker.set_initialized(true);

        let mut slow = request(
            AuthKind::ConfirmPasskey,
            AuthPayload::Passkey {
                passkey: 1,
                entered: 0,
            },
            Duration::from_millis(200),
        );
        slow.address = "AA:00:00:00:00:01".parse().unwrap();

        let mut fast = request(
            AuthKind::AuthorizePairing,
            AuthPayload::None,
            Duration::from_secs(5),
        );
        fast.address = "AA:00:00:00:00:02".parse().unwrap();

        broker.set_authorizer(Arc::new(Stalled));

        let slow_task = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.dispatch(&slow).await })
        };

        // The stalled prompt for the first address must not block the
        // second one; flip the authorizer so the second resolves.
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.set_authorizer(Arc::new(DenyAll));

        let outcome = tokio::time::timeout(Duration::from_millis(100), broker.dispatch(&fast))
            .await
            .expect("parallel dispatch should not serialize across addresses");
        assert_eq!(outcome, AuthOutcome::Deny);

        assert_eq!(slow_task.await.unwrap(), AuthOutcome::Cancelled);
    }

    #[test]
    fn reply_values() {
        let req = request(
            AuthKind::DisplayPincode,
            AuthPayload::Pincode("0000".into()),
            Duration::from_secs(1),
        );
        assert_eq!(req.affirmative_reply(), "0000");
        assert_eq!(req.reply_method, ReplyMethod::WithInput);
    }
}
