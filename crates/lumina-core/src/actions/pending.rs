//! Pending configuration actions awaiting a nonce confirmation.

use super::intent::ConfigAction;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Seconds a pending action stays confirmable by default
pub const DEFAULT_PENDING_TTL_SECS: i64 = 300;

/// Why a stored pending action can no longer be confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInvalid {
    InvalidNonce,
    MissingParameters,
    Expired,
}

impl PendingInvalid {
    pub fn reason(&self) -> &'static str {
        match self {
            PendingInvalid::InvalidNonce => "invalid_nonce",
            PendingInvalid::MissingParameters => "missing_parameters",
            PendingInvalid::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PendingInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: ConfigAction,
    /// Exactly six ASCII digits
    pub nonce: String,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds; confirmable while `now <= expires_at`
    pub expires_at: i64,
}

/// Six uniformly random digits from the OS generator
pub fn generate_nonce() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

impl PendingAction {
    pub fn new(action: ConfigAction, now: i64, ttl_secs: i64) -> Self {
        Self {
            action,
            nonce: generate_nonce(),
            created_at: now,
            expires_at: now.saturating_add(ttl_secs),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn preview(&self) -> String {
        self.action.preview()
    }

    /// Structural and expiry check, run on every turn that touches the action
    pub fn validate(&self, now: i64) -> Result<(), PendingInvalid> {
        if self.nonce.len() != 6 || !self.nonce.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PendingInvalid::InvalidNonce);
        }
        if !self.action.has_valid_parameters() {
            return Err(PendingInvalid::MissingParameters);
        }
        if self.is_expired(now) {
            return Err(PendingInvalid::Expired);
        }
        Ok(())
    }

    /// Exact string equality with the user's token
    pub fn matches_nonce(&self, token: &str) -> bool {
        self.nonce == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::WafMode;

    fn block_mode() -> ConfigAction {
        ConfigAction::SetMode { mode: WafMode::Block }
    }

    #[test]
    fn test_nonce_shape() {
        for _ in 0..50 {
            let nonce = generate_nonce();
            assert_eq!(nonce.len(), 6);
            assert!(nonce.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let pending = PendingAction::new(block_mode(), 1_000, DEFAULT_PENDING_TTL_SECS);
        assert_eq!(pending.expires_at, 1_300);
        assert_eq!(pending.validate(1_300), Ok(()));
        assert_eq!(pending.validate(1_301), Err(PendingInvalid::Expired));
    }

    #[test]
    fn test_tampered_state_rejected() {
        let mut pending = PendingAction::new(block_mode(), 0, 300);
        pending.nonce = "12ab56".to_string();
        assert_eq!(pending.validate(1), Err(PendingInvalid::InvalidNonce));

        let pending = PendingAction {
            action: ConfigAction::BlacklistIp {
                ip: String::new(),
                comment: String::new(),
            },
            nonce: "123456".to_string(),
            created_at: 0,
            expires_at: 300,
        };
        assert_eq!(pending.validate(1), Err(PendingInvalid::MissingParameters));
    }

    #[test]
    fn test_nonce_match_is_exact() {
        let mut pending = PendingAction::new(block_mode(), 0, 300);
        pending.nonce = "004217".to_string();
        assert!(pending.matches_nonce("004217"));
        assert!(!pending.matches_nonce("4217"));
        assert!(!pending.matches_nonce("004218"));
    }
}
