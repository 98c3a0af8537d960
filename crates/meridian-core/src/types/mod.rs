//! Core types for Meridian

mod clock;
mod conflict;
mod event;
mod feed;
mod node;
mod status;
mod strategy;

pub use clock::*;
pub use conflict::*;
pub use event::*;
pub use feed::*;
pub use node::*;
pub use status::*;
pub use strategy::*;
