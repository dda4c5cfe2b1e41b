// Iteration over one pull: an async `Stream` and a blocking `Iterator`.
use futures::StreamExt;
use futures::stream::{FusedStream, Stream};
use std::fmt;
use std::iter::FusedIterator;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::pull::{Item, PullSession};
use crate::{Message, PullError};

/// Messages from a single pull, in server delivery order.
///
/// The stream is finite and cannot be restarted. It ends once the batch is
/// full, the server signals there is nothing more, or the pull expires. A
/// fatal condition is yielded as the last item. Dropping the batch or calling
/// [`Batch::stop`] releases the pull's subscription and timers immediately.
pub struct Batch {
    session: Arc<PullSession>,
    rx: mpsc::Receiver<Item>,
    done: bool,
}

impl Batch {
    pub(crate) fn new(session: Arc<PullSession>, rx: mpsc::Receiver<Item>) -> Self {
        Self {
            session,
            rx,
            done: false,
        }
    }

    /// Frames delivered by the server so far: data messages plus the status
    /// frame that ended the pull, if any. Idle heartbeats are not counted.
    pub fn received(&self) -> usize {
        self.session.received()
    }

    /// Messages yielded to the caller so far.
    pub fn processed(&self) -> usize {
        self.session.processed()
    }

    /// True once the pull has released its subscription. Buffered messages may
    /// still be pending in the stream.
    pub fn is_closed(&self) -> bool {
        self.session.is_terminal()
    }

    /// End the pull early. Messages already buffered but not yet yielded are
    /// discarded unacknowledged.
    pub fn stop(&mut self) {
        self.session.close();
        self.rx.close();
        self.done = true;
    }

    /// Iterate this pull from synchronous code.
    pub fn into_blocking(self) -> BlockingBatch {
        BlockingBatch::new(self)
    }
}

impl Stream for Batch {
    type Item = Result<Message, PullError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(message))) => {
                this.session.record_processed();
                Poll::Ready(Some(Ok(message)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("received", &self.received())
            .field("processed", &self.processed())
            .field("closed", &self.is_closed())
            .field("done", &self.done)
            .finish()
    }
}

impl FusedStream for Batch {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// One-at-a-time blocking view of a [`Batch`].
///
/// Each `next` parks the calling thread until a message arrives or the pull
/// ends. After the first `None` every later call returns `None` without
/// touching the transport. Must not be driven from inside an async task.
pub struct BlockingBatch {
    batch: Batch,
    finished: bool,
}

impl BlockingBatch {
    fn new(batch: Batch) -> Self {
        Self {
            batch,
            finished: false,
        }
    }

    pub fn received(&self) -> usize {
        self.batch.received()
    }

    pub fn processed(&self) -> usize {
        self.batch.processed()
    }

    pub fn stop(&mut self) {
        self.batch.stop();
        self.finished = true;
    }
}

impl Iterator for BlockingBatch {
    type Item = Result<Message, PullError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = futures::executor::block_on(self.batch.next());
        if item.is_none() {
            self.finished = true;
        }
        item
    }
}

impl FusedIterator for BlockingBatch {}

impl fmt::Debug for BlockingBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingBatch")
            .field("batch", &self.batch)
            .field("finished", &self.finished)
            .finish()
    }
}

impl From<Batch> for BlockingBatch {
    fn from(batch: Batch) -> Self {
        Self::new(batch)
    }
}
