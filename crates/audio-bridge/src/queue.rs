//! Mailbox between the driver callback thread and the frame consumer.
//!
//! The producer never waits: `push` on an unbounded channel only allocates.
//! The consumer polls with `try_pop` so the async side never parks a runtime
//! worker on a blocking receive.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::{AudioError, AudioResult};

/// Write half. Deliberately not `Clone`: exactly one driver thread feeds a queue.
#[derive(Debug)]
pub struct BlockProducer {
    tx: Sender<Vec<i16>>,
}

#[derive(Debug)]
pub struct BlockConsumer {
    rx: Receiver<Vec<i16>>,
}

pub fn block_queue() -> (BlockProducer, BlockConsumer) {
    let (tx, rx) = unbounded();
    (BlockProducer { tx }, BlockConsumer { rx })
}

impl BlockProducer {
    /// Copies one interleaved block into the mailbox. Returns `false` once the
    /// consumer is gone so the callback can stop doing work.
    pub fn push(&self, block: &[i16]) -> bool {
        self.tx.send(block.to_vec()).is_ok()
    }
}

impl BlockConsumer {
    pub fn try_pop(&self) -> AudioResult<Option<Vec<i16>>> {
        match self.rx.try_recv() {
            Ok(block) => Ok(Some(block)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(AudioError::SourceClosed),
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
