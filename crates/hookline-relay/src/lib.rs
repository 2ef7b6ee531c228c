//! This crate allows to attach to a process through a dynamic
//! instrumentation engine, and relay the messages of the payload injected
//! into it.
//!
//! Two main components are provided:
//! - A trait to implement a custom event handler, allowing to consume the
//!   events relayed from the target (e.g., installed hooks, thread contexts,
//!   memory scan results).
//! - A few traits to implement a custom instrumentation engine, responsible
//!   for attaching to a process and injecting the payload into it.
//!
//! # Consuming relayed events
//!
//! This is the main use case of this crate.
//!
//! The [EventHandler](self::handler::EventHandler) trait allows to define
//! custom logic for handling the events of an instrumented process.
//!
//! ```no_run
//! use hookline_replay::ReplayDevice;
//!
//! use hookline_relay::Relay;
//! use hookline_relay::handler::{Event, EventHandler};
//! use hookline_relay::session::Target;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     // initialize the relay
//!     let mut relay = Relay::builder()
//!         .with_device(ReplayDevice::default())
//!         .with_event_handler(CustomHandler)
//!         .core_script("lib/core.js")
//!         .build();
//!
//!     // attach to the process and inject the payload
//!     relay.attach(Target::Pid(1234), None).await.unwrap();
//!
//!     // relay the payload messages until the target goes away
//!     while relay.pump().await {}
//! }
//!
//! struct CustomHandler;
//!
//! impl EventHandler for CustomHandler {
//!     fn handle_event(&mut self, event: &Event) {
//!         //
//!         // do some action with the relayed event
//!         //
//!     }
//! }
//! ```
//!
//! # Implementing a custom engine
//!
//! This is the advanced use case of this crate.
//!
//! The [Device](self::engine::Device)/[Attachment](self::engine::Attachment)/[Script](self::engine::Script)
//! traits allow to implement the engine primitives used by the relay. For
//! instance, an application could drive a local engine, a remote server
//! over USB, or replay a recorded session.
//!
//! Most of the time, you won't need to go this far. The `hookline-replay`
//! crate provides an engine replaying recorded payload messages.

/// Module containing traits for implementing a custom engine.
pub mod engine;

/// Module containing traits for handling relayed events.
pub mod handler;

/// Module containing the per-thread execution contexts.
pub mod context;

/// Module containing the hook and watcher registry.
pub mod hook;

/// Module containing the cached memory range view.
pub mod range;

/// Module containing the session state and attach targets.
pub mod session;

/// Module containing the plugin seam.
pub mod plugin;

/// Module containing the front-end capabilities.
pub mod ui;

pub mod protocol;
pub mod ptr;

mod error;
mod relay;

pub use self::error::{Error, Result};
pub use self::relay::{Builder, DEFAULT_CORE_SCRIPT, Relay, RelayOptions, ScriptOf, ScriptStatus};
pub use self::relay::READ_CHUNK_SIZE;
