//! ALFA File Vault - Inactivity Lock
//!
//! `Unlocked ⇄ Locked` state machine driven by activity events, a periodic
//! tick, manual lock and sign-out. Activity never unlocks; only a successful
//! re-authentication does.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Auto-lock choices offered in settings (0 = never)
pub const AUTO_LOCK_CHOICES: [u32; 5] = [0, 1, 2, 5, 10];

/// Largest accepted timeout (one day)
pub const MAX_TIMEOUT_MINUTES: u32 = 24 * 60;

// ═══════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockPhase {
    Unlocked,
    Locked,
}

/// Why the session is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReason {
    Timeout,
    Manual,
    SignedOut,
}

/// Snapshot of the lock state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionLockState {
    pub phase: LockPhase,
    pub reason: Option<LockReason>,
    pub last_activity_at: DateTime<Utc>,
    pub timeout_minutes: u32,
}

/// Captured before a decrypt; checked before the result is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGuard {
    epoch: u64,
}

struct LockInner {
    state: SessionLockState,
    /// Bumped on every transition to Locked
    epoch: u64,
}

/// Inactivity Lock State Machine
pub struct InactivityLock {
    clock: Arc<dyn Clock>,
    inner: RwLock<LockInner>,
}

impl InactivityLock {
    /// New machine, Unlocked (right after login)
    pub fn new(clock: Arc<dyn Clock>, timeout_minutes: u32) -> Self {
        let now = clock.now();
        Self {
            clock,
            inner: RwLock::new(LockInner {
                state: SessionLockState {
                    phase: LockPhase::Unlocked,
                    reason: None,
                    last_activity_at: now,
                    timeout_minutes: timeout_minutes.min(MAX_TIMEOUT_MINUTES),
                },
                epoch: 0,
            }),
        }
    }

    fn expired(state: &SessionLockState, now: DateTime<Utc>) -> bool {
        state.timeout_minutes > 0
            && now - state.last_activity_at >= Duration::minutes(state.timeout_minutes as i64)
    }

    fn lock_inner(inner: &mut LockInner, reason: LockReason) -> bool {
        match (inner.state.phase, inner.state.reason) {
            (_, Some(LockReason::SignedOut)) => false,
            (LockPhase::Locked, _) if reason != LockReason::SignedOut => false,
            (phase, _) => {
                inner.state.phase = LockPhase::Locked;
                inner.state.reason = Some(reason);
                if phase == LockPhase::Unlocked {
                    inner.epoch += 1;
                }
                true
            }
        }
    }

    /// User activity. Returns true if this call locked the session (idle
    /// threshold already crossed).
    pub fn record_activity(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if inner.state.reason == Some(LockReason::SignedOut) {
            return false;
        }

        let locked = inner.state.phase == LockPhase::Unlocked && Self::expired(&inner.state, now);
        if locked {
            log::info!("Session locked after inactivity");
            Self::lock_inner(&mut inner, LockReason::Timeout);
        }

        // Recorded even while Locked; only re-authentication unlocks
        inner.state.last_activity_at = now;
        locked
    }

    /// Periodic check. Returns true if this call locked the session.
    pub fn check_timeout(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if inner.state.phase == LockPhase::Unlocked && Self::expired(&inner.state, now) {
            log::info!("Session locked after inactivity");
            return Self::lock_inner(&mut inner, LockReason::Timeout);
        }
        false
    }

    /// Lock immediately
    pub fn lock_manual(&self) -> bool {
        Self::lock_inner(&mut self.inner.write(), LockReason::Manual)
    }

    /// Terminal lock; unlock is no longer possible
    pub fn sign_out(&self) {
        Self::lock_inner(&mut self.inner.write(), LockReason::SignedOut);
    }

    /// Back to Unlocked. Callers must have re-authenticated first.
    pub(crate) fn unlock_after_reauth(&self) -> VaultResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if inner.state.reason == Some(LockReason::SignedOut) {
            return Err(VaultError::SessionEnded);
        }

        inner.state.phase = LockPhase::Unlocked;
        inner.state.reason = None;
        inner.state.last_activity_at = now;
        Ok(())
    }

    /// Change the auto-lock timeout (0 disables it)
    pub fn set_timeout_minutes(&self, minutes: u32) -> VaultResult<()> {
        if minutes > MAX_TIMEOUT_MINUTES {
            return Err(VaultError::InvalidInput(format!(
                "auto-lock timeout must be at most {} minutes",
                MAX_TIMEOUT_MINUTES
            )));
        }
        self.inner.write().state.timeout_minutes = minutes;
        Ok(())
    }

    pub fn phase(&self) -> LockPhase {
        self.inner.read().state.phase
    }

    pub fn is_locked(&self) -> bool {
        self.phase() == LockPhase::Locked
    }

    pub fn is_signed_out(&self) -> bool {
        self.inner.read().state.reason == Some(LockReason::SignedOut)
    }

    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    pub fn snapshot(&self) -> SessionLockState {
        self.inner.read().state.clone()
    }

    /// Error describing why access is refused, if it is
    pub fn ensure_unlocked(&self) -> VaultResult<()> {
        let inner = self.inner.read();
        match (inner.state.phase, inner.state.reason) {
            (_, Some(LockReason::SignedOut)) => Err(VaultError::SessionEnded),
            (LockPhase::Locked, _) => Err(VaultError::VaultLocked),
            (LockPhase::Unlocked, _) => Ok(()),
        }
    }

    /// Capture the current epoch before decrypting
    pub fn render_guard(&self) -> VaultResult<RenderGuard> {
        self.ensure_unlocked()?;
        Ok(RenderGuard { epoch: self.epoch() })
    }

    /// Fails if the session locked at any point since `guard` was taken
    pub fn confirm_render(&self, guard: &RenderGuard) -> VaultResult<()> {
        self.ensure_unlocked()?;
        if self.epoch() != guard.epoch {
            return Err(VaultError::VaultLocked);
        }
        Ok(())
    }
}
