//! ALFA File Vault - Session Context
//!
//! One explicitly owned context per login: the identity, its lock machine and
//! its access gate. Services receive it as `Arc<SessionContext>`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::auth::{reauthenticate, AuthService, Identity};
use crate::device_auth::DeviceAuth;
use crate::error::{VaultError, VaultResult};
use crate::gate::{AccessGate, CancelReason};
use crate::lock::{Clock, InactivityLock, RenderGuard};

pub struct SessionContext {
    identity: Identity,
    lock: InactivityLock,
    gate: AccessGate,
}

impl SessionContext {
    pub fn new(identity: Identity, clock: Arc<dyn Clock>, timeout_minutes: u32) -> Self {
        Self {
            gate: AccessGate::new(identity.clone()),
            lock: InactivityLock::new(clock, timeout_minutes),
            identity,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn lock(&self) -> &InactivityLock {
        &self.lock
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Record activity and fail if the session is not usable
    pub fn ensure_active(&self) -> VaultResult<()> {
        self.touch();
        self.lock.ensure_unlocked()
    }

    /// Activity event (tap, scroll, navigation)
    pub fn touch(&self) {
        if self.lock.record_activity() {
            self.gate.cancel(CancelReason::Locked);
        }
    }

    /// Periodic timeout check. Returns true if the session just locked.
    pub fn tick(&self) -> bool {
        let locked = self.lock.check_timeout();
        if locked {
            self.gate.cancel(CancelReason::Locked);
        }
        locked
    }

    /// Lock right now (user pressed "lock")
    pub fn lock_now(&self) {
        self.lock.lock_manual();
        self.gate.cancel(CancelReason::Locked);
    }

    /// Sign out. Terminal for this context.
    pub fn end(&self) {
        self.lock.sign_out();
        self.gate.cancel(CancelReason::SignedOut);
        log::info!("Session ended for {}", self.identity.user_id);
    }

    /// Unlock with the same PIN re-authentication the gate uses
    pub async fn unlock(&self, auth: &dyn AuthService, pin: &str) -> VaultResult<()> {
        if self.lock.is_signed_out() {
            return Err(VaultError::SessionEnded);
        }
        reauthenticate(auth, &self.identity, pin).await?;
        self.lock.unlock_after_reauth()?;
        log::info!("Session unlocked for {}", self.identity.user_id);
        Ok(())
    }

    /// Unlock through the device prompt
    pub async fn unlock_with_device(&self, device: &DeviceAuth) -> VaultResult<()> {
        if self.lock.is_signed_out() {
            return Err(VaultError::SessionEnded);
        }
        device.reauthenticate(&self.identity).await?;
        self.lock.unlock_after_reauth()?;
        log::info!("Session unlocked by device auth for {}", self.identity.user_id);
        Ok(())
    }

    pub fn render_guard(&self) -> VaultResult<RenderGuard> {
        self.lock.render_guard()
    }

    pub fn confirm_render(&self, guard: &RenderGuard) -> VaultResult<()> {
        self.lock.confirm_render(guard)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.identity.user_id)
            .field("phase", &self.lock.phase())
            .field("gate", &self.gate.phase())
            .finish()
    }
}

/// Periodic lock check for a session; exits after sign-out
pub fn spawn_lock_watchdog(session: Arc<SessionContext>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if session.lock().is_signed_out() {
                log::debug!("Lock watchdog stopped for {}", session.user_id());
                break;
            }
            if session.tick() {
                log::info!("Watchdog locked session for {}", session.user_id());
            }
        }
    })
}
