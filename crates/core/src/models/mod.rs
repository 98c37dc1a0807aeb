//! Data models for Wormhole

mod assistant;
mod ticket;

pub use assistant::*;
pub use ticket::*;
