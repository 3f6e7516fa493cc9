//! Call client: drives one voice call against the relay

mod call;

pub use call::{CallOptions, CallSession, CallSnapshot, OutputFactory};
