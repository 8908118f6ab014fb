//! Pod wire protocol: command framing and the transaction engine.

pub mod engine;
pub mod frame;
