//! Side-effecting helpers: filesystem, agent processes, templates, logging.

pub mod activity_log;
pub mod config;
pub mod fsutil;
pub mod gateway;
pub mod paths;
pub mod process;
pub mod scaffold;
pub mod state_store;
pub mod templates;
