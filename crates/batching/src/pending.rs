//! Per-text work units and their write-once result slots.

use tokio::sync::oneshot;
use uuid::Uuid;
use vecserve_core::error::EmbedError;

pub type SlotResult = Result<Vec<f32>, EmbedError>;

/// One text of an embedding request, waiting to be batched.
#[derive(Debug)]
pub struct PendingItem {
    text: String,
    slot: ResultSlot,
}

/// Write-once cell for one item's vector or error.
///
/// Filling consumes the slot, so it can be written at most once. Dropping an
/// unfilled slot is observed by the waiter as [`EmbedError::ServiceStopping`].
#[derive(Debug)]
pub struct ResultSlot {
    request_id: Uuid,
    index: usize,
    tx: oneshot::Sender<SlotResult>,
}

/// Caller side of a [`ResultSlot`].
#[derive(Debug)]
pub struct ResultWaiter {
    rx: oneshot::Receiver<SlotResult>,
}

impl PendingItem {
    /// Create the item for `texts[index]` of request `request_id`, together
    /// with the waiter that will receive its result.
    pub fn new(request_id: Uuid, index: usize, text: String) -> (Self, ResultWaiter) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            text,
            slot: ResultSlot {
                request_id,
                index,
                tx,
            },
        };
        (item, ResultWaiter { rx })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn request_id(&self) -> Uuid {
        self.slot.request_id
    }

    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn into_parts(self) -> (String, ResultSlot) {
        (self.text, self.slot)
    }

    /// Resolve the item with an error without it ever reaching the model.
    pub fn fail(self, err: EmbedError) {
        self.slot.fill(Err(err));
    }
}

impl ResultSlot {
    /// Write the result. A caller that already gave up is not an error; the
    /// value is discarded.
    pub fn fill(self, result: SlotResult) {
        let _ = self.tx.send(result);
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the waiting caller is gone (timed out or disconnected).
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ResultWaiter {
    pub async fn wait(self) -> SlotResult {
        self.rx.await.unwrap_or(Err(EmbedError::ServiceStopping))
    }
}
