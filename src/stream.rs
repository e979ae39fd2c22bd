//! Paced stream adapter core.
//!
//! [`PacedStream`] exposes a blocking iterable source as a push-stream whose
//! callbacks fire on a single serialized execution context. The adapter is an
//! actor: one owned state struct fed by a message channel with a single
//! consumer loop. Data, error and end handlers are always invoked inline in
//! that loop, so deliveries are in order and never reentrant, with no lock
//! held anywhere.
//!
//! The source supplier is the only blocking call; it runs once on the tokio
//! blocking pool and its outcome re-enters the loop as a message.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};

use crate::error::{Result, SourceError, StreamError};
use crate::handler::{CompletionHandler, DataHandler, EndHandler, ErrorHandler};

/// Default number of elements pulled from the cursor per refill.
pub const DEFAULT_BATCH_SIZE: usize = 10;

type BoxIter<I> = Box<dyn Iterator<Item = I> + Send>;
type Supplier<I> = Box<dyn FnOnce() -> std::result::Result<BoxIter<I>, SourceError> + Send>;
type Converter<I, O> = Box<dyn Fn(I) -> O + Send>;

/// Messages consumed by the stream's actor loop.
///
/// `Deliver` and `Finish` are self-messages: the loop schedules its own
/// continuation through the channel so that control messages submitted
/// between two batches are processed between those batches.
enum Msg<I, O> {
    SetData(DataHandler<O>),
    SetError(ErrorHandler),
    SetEnd(EndHandler),
    Resume,
    SourceReady(std::result::Result<BoxIter<I>, SourceError>),
    Deliver,
    Finish,
    Close(Option<CompletionHandler>),
}

/// Flags mirrored outside the loop.
///
/// `closed` lets public operations reject synchronously; `paused` lets the
/// drain loop observe a pause at the next element boundary even while a
/// delivery is in flight.
#[derive(Default)]
struct Shared {
    paused: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Builder for [`PacedStream`].
///
/// The only knob is the batch size: how many elements each pull cycle moves
/// from the blocking cursor into the pending queue.
#[derive(Debug, Clone)]
pub struct PacedStreamBuilder {
    batch_size: usize,
}

impl Default for PacedStreamBuilder {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PacedStreamBuilder {
    /// Set the refill batch size. Values below 1 are clamped to 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Spawn the stream's consumer loop and return its public handle.
    ///
    /// The supplier runs exactly once, lazily, on the blocking pool, the
    /// first time a data handler is attached. The converter is applied per
    /// element at delivery time, in source iteration order.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn build<I, O, S, T, C>(self, supplier: S, converter: C) -> PacedStream<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
        S: FnOnce() -> std::result::Result<T, SourceError> + Send + 'static,
        T: IntoIterator<Item = I>,
        T::IntoIter: Send + 'static,
        C: Fn(I) -> O + Send + 'static,
    {
        let supplier: Supplier<I> = Box::new(move || {
            supplier().map(|iterable| Box::new(iterable.into_iter()) as BoxIter<I>)
        });
        PacedStream::spawn(self.batch_size, supplier, Box::new(converter))
    }
}

/// Handle to a paced stream.
///
/// Cloning the handle is cheap; all clones address the same stream. The
/// stream's loop terminates once every handle is dropped.
///
/// A handler that needs to drive its own stream (for example, pausing from
/// inside the data handler) must capture a [`WeakPacedStream`] instead of a
/// clone: handlers are stored inside the loop, so a strong handle captured
/// there would keep the loop alive forever.
pub struct PacedStream<I, O> {
    tx: UnboundedSender<Msg<I, O>>,
    shared: Arc<Shared>,
}

/// Weak handle to a paced stream, safe to capture inside handlers.
///
/// Does not keep the stream's loop alive; [`upgrade`](Self::upgrade) returns
/// `None` once every strong handle has been dropped.
pub struct WeakPacedStream<I, O> {
    tx: WeakUnboundedSender<Msg<I, O>>,
    shared: Arc<Shared>,
}

impl<I, O> Clone for WeakPacedStream<I, O> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<I, O> WeakPacedStream<I, O> {
    /// Recover a strong handle, if the stream is still alive.
    pub fn upgrade(&self) -> Option<PacedStream<I, O>> {
        self.tx.upgrade().map(|tx| PacedStream {
            tx,
            shared: self.shared.clone(),
        })
    }
}

impl<I, O> Clone for PacedStream<I, O> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<I, O> PacedStream<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a stream with the default batch size.
    ///
    /// See [`PacedStreamBuilder::build`] for the collaborator contracts.
    pub fn new<S, T, C>(supplier: S, converter: C) -> Self
    where
        S: FnOnce() -> std::result::Result<T, SourceError> + Send + 'static,
        T: IntoIterator<Item = I>,
        T::IntoIter: Send + 'static,
        C: Fn(I) -> O + Send + 'static,
    {
        Self::builder().build(supplier, converter)
    }

    /// Start building a stream.
    pub fn builder() -> PacedStreamBuilder {
        PacedStreamBuilder::default()
    }

    fn spawn(batch_size: usize, supplier: Supplier<I>, converter: Converter<I, O>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let core = Core {
            rx,
            self_tx: tx.downgrade(),
            shared: Arc::clone(&shared),
            batch_size,
            supplier: Some(supplier),
            converter,
            cursor: None,
            queue: VecDeque::with_capacity(batch_size),
            data: None,
            error: None,
            end: None,
            read_in_progress: false,
            ended: false,
            closed: false,
        };
        tokio::spawn(core.run());
        Self { tx, shared }
    }

    /// Attach the data handler.
    ///
    /// The first attachment ever triggers realization of the source. Once
    /// the source is available the pull/deliver cycle begins, provided the
    /// stream is neither paused nor closed. Replacing the handler affects
    /// subsequent deliveries only.
    pub fn set_data_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(O) + Send + 'static,
    {
        self.check_closed()?;
        self.send(Msg::SetData(Box::new(handler)));
        Ok(())
    }

    /// Attach the error handler.
    ///
    /// Receives the source realization failure, at most once. If no error
    /// handler is attached when the failure arrives, the failure is dropped.
    pub fn set_error_handler<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(StreamError) + Send + 'static,
    {
        self.check_closed()?;
        self.send(Msg::SetError(Box::new(handler)));
        Ok(())
    }

    /// Attach the end handler, fired once when the source is exhausted.
    ///
    /// May be set or replaced even on a closed stream; end delivery itself
    /// is guarded by the closed check inside the loop.
    pub fn set_end_handler<F>(&self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Msg::SetEnd(Box::new(handler)));
    }

    /// Pause delivery.
    ///
    /// An in-flight delivery halts at the next element boundary; elements
    /// already pulled into the pending queue are retained and delivered on
    /// resume. No new pull cycle starts while paused.
    pub fn pause(&self) -> Result<()> {
        self.check_closed()?;
        self.shared.paused.store(true, Ordering::Release);
        Ok(())
    }

    /// Resume delivery. Idempotent; a no-op if the stream is not paused.
    pub fn resume(&self) -> Result<()> {
        self.check_closed()?;
        if self
            .shared
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.send(Msg::Resume);
        }
        Ok(())
    }

    /// Close the stream.
    ///
    /// Always succeeds and is idempotent, even concurrently with an active
    /// pull. The closed flag is set on the next loop tick; no handler fires
    /// afterwards.
    pub fn close(&self) {
        self.send(Msg::Close(None));
    }

    /// Close the stream and observe completion.
    ///
    /// The callback runs on the stream's loop, after the closed flag is set,
    /// and always receives `Ok(())`.
    pub fn close_with<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.send(Msg::Close(Some(Box::new(on_complete))));
    }

    /// Whether a close request has taken effect.
    pub fn is_closed(&self) -> bool {
        self.shared.closed()
    }

    /// Downgrade to a handle that does not keep the stream's loop alive.
    pub fn downgrade(&self) -> WeakPacedStream<I, O> {
        WeakPacedStream {
            tx: self.tx.downgrade(),
            shared: self.shared.clone(),
        }
    }

    fn check_closed(&self) -> Result<()> {
        if self.shared.closed() {
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    fn send(&self, msg: Msg<I, O>) {
        // The loop outlives every handle, so this only fails during runtime
        // shutdown, where dropping the message is the correct outcome.
        let _ = self.tx.send(msg);
    }
}

/// Owned state of the stream, driven by [`Core::run`].
struct Core<I, O> {
    rx: UnboundedReceiver<Msg<I, O>>,
    self_tx: WeakUnboundedSender<Msg<I, O>>,
    shared: Arc<Shared>,
    batch_size: usize,
    supplier: Option<Supplier<I>>,
    converter: Converter<I, O>,
    cursor: Option<BoxIter<I>>,
    queue: VecDeque<I>,
    data: Option<DataHandler<O>>,
    error: Option<ErrorHandler>,
    end: Option<EndHandler>,
    read_in_progress: bool,
    ended: bool,
    closed: bool,
}

impl<I, O> Core<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.dispatch(msg);
        }
    }

    fn dispatch(&mut self, msg: Msg<I, O>) {
        match msg {
            Msg::SetData(handler) => {
                if self.closed {
                    return;
                }
                self.data = Some(handler);
                if let Some(supplier) = self.supplier.take() {
                    self.realize(supplier);
                } else if self.cursor.is_some() && !self.shared.paused() {
                    self.do_read();
                }
            }
            Msg::SetError(handler) => {
                if self.closed {
                    return;
                }
                self.error = Some(handler);
            }
            Msg::SetEnd(handler) => {
                self.end = Some(handler);
            }
            Msg::Resume => {
                if self.closed {
                    return;
                }
                if self.data.is_some() {
                    self.do_read();
                }
            }
            Msg::SourceReady(Ok(cursor)) => {
                if self.closed {
                    return;
                }
                tracing::trace!("source realized");
                self.cursor = Some(cursor);
                if self.data.is_some() && !self.shared.paused() {
                    self.do_read();
                }
            }
            Msg::SourceReady(Err(err)) => {
                if self.closed {
                    return;
                }
                match self.error.as_mut() {
                    Some(handler) => handler(StreamError::Source(err)),
                    None => tracing::debug!(
                        error = %err,
                        "source realization failed with no error handler attached"
                    ),
                }
            }
            Msg::Deliver => self.deliver(),
            Msg::Finish => self.finish(),
            Msg::Close(completion) => {
                tracing::trace!("stream closed");
                self.closed = true;
                self.shared.closed.store(true, Ordering::Release);
                if let Some(complete) = completion {
                    complete(Ok(()));
                }
            }
        }
    }

    /// Run the supplier once on the blocking pool and marshal the outcome
    /// back into the loop.
    fn realize(&mut self, supplier: Supplier<I>) {
        tracing::trace!("scheduling source realization on the blocking pool");
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        tokio::task::spawn_blocking(move || {
            let result = supplier();
            let _ = tx.send(Msg::SourceReady(result));
        });
    }

    /// Start a pull cycle.
    ///
    /// `read_in_progress` guarantees at most one cycle is outstanding; it
    /// stays set until the matching `Deliver`/`Finish` message has been
    /// processed. A queue left non-empty by a paused delivery is drained
    /// before the cursor is advanced again, so pause/resume never loses or
    /// duplicates elements.
    fn do_read(&mut self) {
        if self.read_in_progress || self.ended || self.closed {
            return;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        self.read_in_progress = true;
        if self.queue.is_empty() {
            for _ in 0..self.batch_size {
                match cursor.next() {
                    Some(item) => self.queue.push_back(item),
                    None => break,
                }
            }
            tracing::trace!(pulled = self.queue.len(), "pull cycle refilled queue");
        }
        if self.queue.is_empty() {
            self.send_self(Msg::Finish);
        } else {
            self.send_self(Msg::Deliver);
        }
    }

    /// Drain the pending queue into the data handler.
    ///
    /// The converter runs here, at delivery time. The paused flag is checked
    /// per element, so a pause lands at the next element boundary even in
    /// the middle of a batch.
    fn deliver(&mut self) {
        if let Some(handler) = self.data.as_mut() {
            while !self.closed && !self.shared.paused() {
                match self.queue.pop_front() {
                    Some(item) => handler((self.converter)(item)),
                    None => break,
                }
            }
        }
        self.read_in_progress = false;
        if self.data.is_some() && !self.shared.paused() && !self.closed {
            self.do_read();
        }
    }

    /// Terminal success transition: the cursor is exhausted and the queue
    /// is empty. Fires the end handler exactly once.
    fn finish(&mut self) {
        self.read_in_progress = false;
        if self.closed || self.ended {
            return;
        }
        self.ended = true;
        tracing::trace!("source exhausted");
        if let Some(handler) = self.end.as_mut() {
            handler();
        }
    }

    fn send_self(&self, msg: Msg<I, O>) {
        if let Some(tx) = self.self_tx.upgrade() {
            let _ = tx.send(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_batch_size() {
        let builder = PacedStreamBuilder::default().batch_size(0);
        assert_eq!(builder.batch_size, 1);
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_stream_alive() {
        let stream: PacedStream<u32, u32> = PacedStream::new(|| Ok(Vec::new()), |v| v);
        let weak = stream.downgrade();
        assert!(weak.upgrade().is_some());

        drop(stream);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_observable() {
        let stream: PacedStream<u32, u32> =
            PacedStream::new(|| Ok(Vec::new()), |v| v);

        let (tx, rx) = tokio::sync::oneshot::channel();
        stream.close();
        stream.close_with(move |result| {
            let _ = tx.send(result);
        });

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .expect("close should complete")
            .expect("completion callback should run");
        assert_eq!(result, Ok(()));
        assert!(stream.is_closed());
        assert_eq!(stream.pause(), Err(StreamError::Closed));
    }
}
