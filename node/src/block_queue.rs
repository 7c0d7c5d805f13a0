//! FIFO queue feeding the single block worker.
//!
//! Producers call [`submit`](BlockQueue::submit); the worker awaits
//! [`pop`](BlockQueue::pop) and calls [`finish`](BlockQueue::finish) once the
//! block is fully processed, so at most one block is in flight.
//! [`clear_and_stop`](BlockQueue::clear_and_stop) drops everything pending
//! and halts dequeuing until [`resume`](BlockQueue::resume).

use std::collections::VecDeque;
use std::sync::Mutex;

use dpos_types::Block;
use tokio::sync::Notify;

use crate::lock;

#[derive(Default)]
struct Inner {
    blocks: VecDeque<Block>,
    stopped: bool,
    /// A popped block has not been finished yet.
    busy: bool,
}

#[derive(Default)]
pub struct BlockQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block. Dropped while the queue is stopped.
    pub fn submit(&self, block: Block) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.stopped {
                tracing::debug!(height = block.height, "queue stopped, block dropped");
                return false;
            }
            inner.blocks.push_back(block);
        }
        self.notify.notify_one();
        true
    }

    /// Append blocks in order. Returns how many were accepted.
    pub fn submit_all(&self, blocks: impl IntoIterator<Item = Block>) -> usize {
        let accepted = {
            let mut inner = lock(&self.inner);
            if inner.stopped {
                return 0;
            }
            let before = inner.blocks.len();
            inner.blocks.extend(blocks);
            inner.blocks.len() - before
        };
        if accepted > 0 {
            self.notify.notify_one();
        }
        accepted
    }

    /// Take the next block unless the queue is stopped, empty or another
    /// block is still in flight.
    pub fn try_pop(&self) -> Option<Block> {
        let mut inner = lock(&self.inner);
        if inner.stopped || inner.busy {
            return None;
        }
        let block = inner.blocks.pop_front()?;
        inner.busy = true;
        Some(block)
    }

    /// Wait for the next block.
    pub async fn pop(&self) -> Block {
        loop {
            if let Some(block) = self.try_pop() {
                return block;
            }
            self.notify.notified().await;
        }
    }

    /// Mark the in-flight block as done.
    pub fn finish(&self) {
        lock(&self.inner).busy = false;
        self.notify.notify_one();
    }

    /// Drop every pending block and stop dequeuing.
    pub fn clear_and_stop(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.blocks.len();
        inner.blocks.clear();
        inner.stopped = true;
        tracing::debug!(dropped, "block queue cleared and stopped");
    }

    /// Drop every pending block, keep running.
    pub fn clear(&self) {
        lock(&self.inner).blocks.clear();
    }

    /// Restart dequeuing. Blocks dropped earlier are gone for good.
    pub fn resume(&self) {
        lock(&self.inner).stopped = false;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner).stopped
    }

    /// Nothing pending and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let inner = lock(&self.inner);
        inner.blocks.is_empty() && !inner.busy
    }
}
