//! This crate provides an instrumentation engine replaying recorded payload
//! sessions (to be used with `hookline-relay`).
//!
//! The engine never touches a real process. It records every command sent
//! by the relay, answers payload API calls from a programmable reply table,
//! and delivers the notifications of a [Recording] once the payload script
//! is loaded.
//!
//! <div class="warning">
//!
//! *This crate is not meant to be used on its own! It merely implements the
//! interface (traits) provided by `hookline-relay`, so that recorded
//! sessions can be relayed (and relay consumers tested) without a live
//! target.*
//!
//! </div>

mod device;
mod error;
mod recording;
mod script;
mod state;

pub use self::device::{ReplayDevice, ReplayHandle};
pub use self::error::{Error, Result};
pub use self::recording::Recording;
pub use self::script::{ReplayAttachment, ReplayScript};
pub use self::state::{ApiCall, Command, Operation, Reply};
