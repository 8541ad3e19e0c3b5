//! AMI event handling for running instances.
//!
//! Raw events from the administrative session flow through an
//! [`EventSink`], which appends them to the instance's trace file and
//! republishes them on the [`EventBus`] keyed by lowercase event type.
//!
//! ## Module Structure
//!
//! - [`event`]: Normalized event objects
//! - [`bus`]: Name-keyed listener registry and collections
//! - [`tracer`]: JSON array trace file
//! - [`sink`]: Trace-then-publish dispatch
//! - [`client`]: Session seam and the channel-fed client
//! - [`watch`]: Settle-delayed watches and expectation checks

pub mod bus;
pub mod client;
pub mod event;
pub mod sink;
pub mod tracer;
pub mod watch;

pub use bus::{EventBus, EventCollection, Listener, ListenerId};
pub use client::{AmiClient, AmiEndpoint, ChannelAmiClient};
pub use event::AmiEvent;
pub use sink::EventSink;
pub use tracer::EventTracer;
pub use watch::{EventMismatch, check_events, watch_events};
