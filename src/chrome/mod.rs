pub mod engine;
pub mod network;

pub use engine::ChromiumEngine;
