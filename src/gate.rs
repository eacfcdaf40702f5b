//! ALFA File Vault - Access Gate
//!
//! Every sensitive action (upload, view, delete) waits behind a PIN
//! challenge, independent of the login session:
//!
//! ```text
//! Idle ──request──▶ ChallengeIssued ──submit──▶ Verifying ──▶ Granted | Denied ──▶ Idle
//! ```
//!
//! Only one challenge is live at a time. A new request replaces the previous
//! one; a verification that finishes after its challenge was replaced or
//! cancelled resolves to `ChallengeSuperseded` and leaves the new one alone.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::auth::{reauthenticate, AuthService, Identity};
use crate::device_auth::DeviceAuth;
use crate::error::{DenialReason, VaultError, VaultResult};
use crate::storage::FileRecord;

/// Sensitive operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    View,
    Delete,
    Upload,
}

/// File picked for upload, held until the PIN is verified
#[derive(Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content: Zeroizing<Vec<u8>>,
}

impl UploadRequest {
    pub fn new(file_name: &str, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            mime_type: None,
            content: Zeroizing::new(content),
        }
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.content.len())
            .finish()
    }
}

/// Action waiting for its PIN challenge
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub target: Option<FileRecord>,
    pub upload: Option<UploadRequest>,
    pub requested_at: DateTime<Utc>,
    ticket: u64,
}

impl PendingAction {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    ChallengeIssued,
    Verifying,
}

/// Why a challenge ended without a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Replaced by a newer request
    Replaced,
    /// Dismissed by the user
    Dismissed,
    /// Session locked
    Locked,
    SignedOut,
    /// Account service failed mid-verification
    Failed,
}

/// How the last challenge ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Granted(ActionKind),
    Denied(DenialReason),
    Cancelled(CancelReason),
}

struct GateState {
    phase: GatePhase,
    pending: Option<PendingAction>,
    next_ticket: u64,
    last_resolution: Option<Resolution>,
}

/// Access Gate
pub struct AccessGate {
    identity: Identity,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: Mutex::new(GateState {
                phase: GatePhase::Idle,
                pending: None,
                next_ticket: 1,
                last_resolution: None,
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn check_owner(&self, target: Option<&FileRecord>) -> VaultResult<()> {
        match target {
            Some(record) if record.owner_id != self.identity.user_id => {
                log::warn!("Rejected access to file {} owned by another identity", record.id);
                Err(VaultError::AccessDenied(DenialReason::NotOwner))
            }
            _ => Ok(()),
        }
    }

    /// Issue a PIN challenge for an action, replacing any outstanding one
    pub fn request_action(
        &self,
        kind: ActionKind,
        target: Option<FileRecord>,
        upload: Option<UploadRequest>,
    ) -> VaultResult<u64> {
        match kind {
            ActionKind::View | ActionKind::Delete if target.is_none() => {
                return Err(VaultError::InvalidInput("no file selected".into()))
            }
            ActionKind::Upload if upload.is_none() => {
                return Err(VaultError::InvalidInput("no file to upload".into()))
            }
            _ => {}
        }
        self.check_owner(target.as_ref())?;

        let mut state = self.state.lock();
        if let Some(previous) = state.pending.take() {
            log::debug!("{:?} challenge replaced by {:?}", previous.kind, kind);
            state.last_resolution = Some(Resolution::Cancelled(CancelReason::Replaced));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending = Some(PendingAction {
            kind,
            target,
            upload,
            requested_at: Utc::now(),
            ticket,
        });
        state.phase = GatePhase::ChallengeIssued;

        Ok(ticket)
    }

    /// Verify the PIN for the live challenge.
    ///
    /// On success the consumed action is returned for dispatch. Any outcome
    /// clears the pending action and returns the gate to Idle.
    pub async fn submit_credential(&self, auth: &dyn AuthService, pin: &str) -> VaultResult<PendingAction> {
        let ticket = self.begin_verification()?;
        let verdict = reauthenticate(auth, &self.identity, pin).await;
        self.finish_verification(ticket, verdict)
    }

    /// Answer the live challenge with the device prompt instead of the PIN
    pub async fn submit_device(&self, device: &DeviceAuth) -> VaultResult<PendingAction> {
        let ticket = self.begin_verification()?;
        let verdict = device.reauthenticate(&self.identity).await;
        self.finish_verification(ticket, verdict)
    }

    fn begin_verification(&self) -> VaultResult<u64> {
        let mut state = self.state.lock();
        let ticket = match (state.phase, state.pending.as_ref().map(|p| p.ticket)) {
            (GatePhase::ChallengeIssued, Some(ticket)) => ticket,
            (GatePhase::Verifying, Some(_)) => {
                return Err(VaultError::InvalidInput("PIN check already in progress".into()))
            }
            _ => return Err(VaultError::NoPendingAction),
        };
        state.phase = GatePhase::Verifying;
        Ok(ticket)
    }

    fn finish_verification(&self, ticket: u64, verdict: VaultResult<()>) -> VaultResult<PendingAction> {
        let mut state = self.state.lock();
        let current = state.pending.as_ref().map(|p| p.ticket);
        if current != Some(ticket) {
            log::debug!("Stale verification discarded (ticket {})", ticket);
            return Err(VaultError::ChallengeSuperseded);
        }

        let action = state.pending.take().ok_or(VaultError::NoPendingAction)?;
        state.phase = GatePhase::Idle;

        match verdict {
            Ok(()) => {
                if let Err(e) = self.check_owner(action.target.as_ref()) {
                    state.last_resolution = Some(Resolution::Denied(DenialReason::NotOwner));
                    return Err(e);
                }
                state.last_resolution = Some(Resolution::Granted(action.kind));
                Ok(action)
            }
            Err(e) if e.is_wrong_credential() => {
                state.last_resolution = Some(Resolution::Denied(DenialReason::WrongCredential));
                Err(e)
            }
            Err(e) => {
                state.last_resolution = Some(Resolution::Cancelled(CancelReason::Failed));
                Err(e)
            }
        }
    }

    /// Drop the live challenge, if any. Returns whether one was dropped.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut state = self.state.lock();
        state.phase = GatePhase::Idle;
        match state.pending.take() {
            Some(action) => {
                log::debug!("{:?} challenge cancelled: {:?}", action.kind, reason);
                state.last_resolution = Some(Resolution::Cancelled(reason));
                true
            }
            None => false,
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.state.lock().phase
    }

    pub fn pending_kind(&self) -> Option<ActionKind> {
        self.state.lock().pending.as_ref().map(|p| p.kind)
    }

    pub fn last_resolution(&self) -> Option<Resolution> {
        self.state.lock().last_resolution
    }
}
