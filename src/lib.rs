//! Real-time event distribution over Server-Sent Events.
//!
//! Events are appended to a durable log and fanned out to every open stream
//! on their channel. Reconnecting clients resume from the id they last saw.

pub mod config;
pub mod core;
pub mod database;
pub mod errors;
pub mod http;
pub mod logging;
pub mod models;
pub mod realtime;

pub use crate::config::Config;
pub use crate::core::{serve, EventHub};
pub use crate::errors::{Error, Result, SinkError, StoreError};
pub use crate::models::{Event, EventId, NewEvent};
pub use crate::realtime::{DistributionEngine, SubscribeRequest, Subscription};
