//! Handler callback types.
//!
//! Each handler is a single-slot boxed callback: registering a new one
//! replaces the previous slot and takes effect for subsequent deliveries
//! only, never retroactively for work that was already scheduled.

use crate::error::StreamError;

/// Receives one converted output element per invocation, in source order.
pub type DataHandler<O> = Box<dyn FnMut(O) + Send>;

/// Receives the terminal stream error, at most once.
pub type ErrorHandler = Box<dyn FnMut(StreamError) + Send>;

/// Signals source exhaustion, at most once, after the final delivery.
pub type EndHandler = Box<dyn FnMut() + Send>;

/// Invoked once when a close request has taken effect.
pub type CompletionHandler = Box<dyn FnOnce(crate::error::Result<()>) + Send>;
