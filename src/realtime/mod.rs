//! Live SSE event distribution
//!
//! Connections attach to channels in the [`ConnectionRegistry`], the
//! [`DistributionEngine`] routes persisted events to them, reconnecting
//! clients catch up through [`replay`], and the [`HeartbeatDriver`] keeps idle
//! streams open.

pub mod broadcast;
pub mod connection;
pub mod frame;
pub mod heartbeat;
pub mod registry;
pub mod replay;

pub use broadcast::{
    BroadcastStats, DistributionEngine, EngineConfig, SubscribeRequest, Subscription,
};
pub use connection::{Connection, ConnectionId, ConnectionStream, Phase};
pub use frame::{Frame, HEARTBEAT_FRAME};
pub use heartbeat::{HeartbeatConfig, HeartbeatDriver, HeartbeatState, HeartbeatStats, SweepReport};
pub use registry::ConnectionRegistry;
pub use replay::ReplayOutcome;
