//! Core types for mnemos.

mod event;
mod message;
mod pattern;
mod turn;

pub use event::*;
pub use message::*;
pub use pattern::*;
pub use turn::*;
