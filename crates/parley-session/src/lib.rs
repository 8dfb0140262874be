//! Call-session lifecycle controller.
//!
//! One [`controller::run_call`] task handles one call from room connect to
//! settlement:
//!
//! 1. **Bootstrap** ([`bootstrap`]) resolves the tenant, direction and
//!    counterpart, and opportunistically the durable call record.
//! 2. **Assembly** ([`prompt`], [`capability`]) builds the instruction text
//!    and the capability set from the tenant configuration.
//! 3. **Conversation** ([`controller`]) feeds room, engine and capability
//!    events through a single dispatch function, including the nested phone
//!    admin login ([`admin_auth`]) and warm transfer flows.
//! 4. **Settlement** ([`settlement`]) runs exactly once, whichever end signal
//!    arrives first.
//!
//! Collaborators are injected through [`Services`]; the controller holds no
//! process-wide state.

pub mod admin_auth;
pub mod bootstrap;
pub mod capability;
pub mod controller;
pub mod error;
pub mod event;
pub mod matching;
pub mod memory;
pub mod prompt;
pub mod resolve;
pub mod settings;
pub mod settlement;
pub mod state;
pub mod tasks;
pub mod transcript;

use parley_types::{ConversationEngine, Datastore, IntegrationGateway, RoomProvider, TelephonyGateway};
use std::sync::Arc;

pub use bootstrap::{Bootstrap, RoomMetadata};
pub use controller::{run_call, CallController, CallOutcome};
pub use error::SessionError;
pub use event::{CapabilityCall, EndReason, SessionEvent};
pub use settings::SessionSettings;
pub use settlement::SettlementReport;
pub use state::{CallSession, CleanupState, TransferState};

/// Process-wide collaborators, constructed once at startup and shared by
/// every call.
#[derive(Clone)]
pub struct Services {
    pub rooms: Arc<dyn RoomProvider>,
    pub engine: Arc<dyn ConversationEngine>,
    pub store: Arc<dyn Datastore>,
    pub telephony: Arc<dyn TelephonyGateway>,
    pub integrations: Arc<dyn IntegrationGateway>,
}
