//! paced-stream
//!
//! Exposes a synchronous, potentially blocking iterable source as a
//! non-blocking, pausable push-stream whose callbacks all fire on a single
//! serialized execution context.
//!
//! The adapter pulls batches from the source's iterator, delivers each
//! element through a registered data handler in source order, and signals
//! exhaustion through an end handler, exactly once. The consumer can pause
//! and resume delivery at any time without losing or duplicating elements;
//! pausing stops delivery at the next element boundary and prevents new
//! pulls from starting. Realizing the source is the only blocking call and
//! runs once on the tokio blocking pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use paced_stream::PacedStream;
//!
//! # async fn example() {
//! let stream = PacedStream::new(
//!     || Ok(vec![1u32, 2, 3]),
//!     |n| n * 10,
//! );
//! stream.set_end_handler(|| println!("done"));
//! stream
//!     .set_data_handler(|n| println!("got {n}"))
//!     .expect("stream not closed");
//! # }
//! ```
//!
//! For `futures`-style consumption, [`PacedStream::into_stream`] bridges the
//! handler surface into a boxed [`futures::Stream`].
#![deny(unsafe_code)]

pub mod bridge;
pub mod error;
pub mod handler;
pub mod stream;

pub use bridge::ItemStream;
pub use error::{Result, SourceError, StreamError};
pub use handler::{CompletionHandler, DataHandler, EndHandler, ErrorHandler};
pub use stream::{DEFAULT_BATCH_SIZE, PacedStream, PacedStreamBuilder, WeakPacedStream};
