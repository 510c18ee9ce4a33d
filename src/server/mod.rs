//! Transports. Both surfaces frame the same dispatcher and carry no task
//! logic of their own.

pub mod sse;
pub mod stdio;
