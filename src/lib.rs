// Library crate - decision engine, adapters and the control loop shared by
// the trader and depth_stream binaries

pub mod accounting;
pub mod binance_api;
pub mod config;
pub mod control_loop;
pub mod envelope;
pub mod execution;
pub mod indicators;
pub mod position_manager;
pub mod shutdown;
pub mod signals;
pub mod store;
pub mod types;
pub mod websocket_handler;

pub use config::TraderConfig;
pub use control_loop::{ControlLoop, SessionContext, TickOutcome};
