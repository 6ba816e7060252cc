pub mod context;
pub mod server;

pub use context::EventHub;
pub use server::serve;
