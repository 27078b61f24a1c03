//! WhatsApp Gateway Core
//!
//! The protective layer between admin-triggered sends and the Evolution API:
//! webhook-driven connection state, a persisted kill switch consulted before
//! every dispatch, humanized (paced + presence-simulated) message delivery,
//! and provider instance lifecycle management.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod kill_switch;
pub mod provider;
pub mod state;

pub use dispatch::{MessageDispatcher, SendTransport};
pub use error::GatewayError;
pub use events::WebhookEvent;
pub use kill_switch::{KillSwitchGuard, KillSwitchState};
pub use provider::EvolutionClient;
pub use state::{ConnectionStateMachine, ConnectionStatus};
