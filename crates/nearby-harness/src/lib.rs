//! Nearby Harness
//!
//! Providers and clocks for driving the runtime in tests and demos:
//!
//! - [`MockProvider`] records every command and lets a test inject any
//!   provider notification by hand
//! - [`LoopbackMedium`] is an in-memory radio connecting several providers in
//!   one process, with chunked payload delivery
//! - [`ManualClock`] is a time source that only moves when told to

pub mod clock;
pub mod loopback;
pub mod mock;

pub use clock::ManualClock;
pub use loopback::{LoopbackMedium, LoopbackProvider};
pub use mock::{MockOperation, MockProvider, ProviderCall, SentPayload};
