//! Configuration-change path: intent inference, pending actions with a
//! confirmation nonce, and execution against the WAF control plane.

pub mod control_plane;
pub mod intent;
pub mod pending;
pub mod workflow;

pub use control_plane::{
    ControlPlane, ControlPlaneCall, ControlPlaneError, RecordingControlPlane,
    TOOL_MANAGE_IP_BLACKLIST, TOOL_SET_PROTECTION_MODE,
};
pub use intent::{
    extract_confirmation_nonce, infer_intent, is_cancel, ConfigAction, ConfigIntent,
    IntentRejection,
};
pub use pending::{generate_nonce, PendingAction, PendingInvalid, DEFAULT_PENDING_TTL_SECS};
pub use workflow::{ConfirmationWorkflow, CONFIG_AGENT};
