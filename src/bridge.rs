//! Bridge from the handler-based surface to a `futures::Stream`.
//!
//! [`PacedStream::into_stream`] registers the three handlers over an internal
//! channel and returns a pinned boxed stream of converted items. Cooperative
//! backpressure is preserved: the bridge pauses the stream when too many
//! undelivered items pile up in the channel and resumes it once the consumer
//! has drained below the low watermark.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Result, StreamError};
use crate::stream::PacedStream;

/// Pinned boxed stream of converted output elements.
///
/// Terminates after the end signal, or after yielding the single terminal
/// `Err` when source realization fails.
pub type ItemStream<O> = Pin<Box<dyn Stream<Item = Result<O>> + Send>>;

/// Pause once this many items are buffered and not yet consumed.
const HIGH_WATERMARK: usize = 16;
/// Resume once the buffered count falls back to this level.
const LOW_WATERMARK: usize = 8;

enum BridgeEvent<O> {
    Item(O),
    Error(StreamError),
    End,
}

impl<I, O> PacedStream<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Consume the handle and expose the stream as an [`ItemStream`].
    ///
    /// Fails with [`StreamError::Closed`] if another handle already closed
    /// the stream. Dropping the returned stream drops the last handle and
    /// tears the stream down.
    pub fn into_stream(self) -> Result<ItemStream<O>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));

        {
            let tx = tx.clone();
            self.set_error_handler(move |err| {
                let _ = tx.send(BridgeEvent::Error(err));
            })?;
        }
        {
            let tx = tx.clone();
            self.set_end_handler(move || {
                let _ = tx.send(BridgeEvent::End);
            });
        }
        {
            // Weak: a strong handle stored inside the loop would keep the
            // loop alive after the consumer drops the stream.
            let weak = self.downgrade();
            let buffered = Arc::clone(&buffered);
            // Registered last: this attachment starts source realization.
            self.set_data_handler(move |item| {
                let pending = buffered.fetch_add(1, Ordering::AcqRel) + 1;
                let _ = tx.send(BridgeEvent::Item(item));
                if pending >= HIGH_WATERMARK
                    && let Some(handle) = weak.upgrade()
                {
                    let _ = handle.pause();
                }
            })?;
        }

        let handle = self;
        let stream = async_stream::stream! {
            while let Some(event) = rx.recv().await {
                match event {
                    BridgeEvent::Item(item) => {
                        let pending = buffered.fetch_sub(1, Ordering::AcqRel) - 1;
                        if pending <= LOW_WATERMARK {
                            // No-op unless the data handler paused us.
                            let _ = handle.resume();
                        }
                        yield Ok(item);
                    }
                    BridgeEvent::Error(err) => {
                        yield Err(err);
                        break;
                    }
                    BridgeEvent::End => break,
                }
            }
            handle.close();
        };
        Ok(Box::pin(stream))
    }
}
