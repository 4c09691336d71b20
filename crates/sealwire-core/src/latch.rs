//! One-shot signaling latch.

use tokio_util::sync::CancellationToken;

/// A one-shot latch: fires once and stays fired.
///
/// The Rust spelling of closing a signal channel. Any number of tasks can
/// await [`fired`](Self::fired); all of them (present and future) resume once
/// [`fire`](Self::fire) is called. Clones observe the same latch.
#[derive(Debug, Clone, Default)]
pub struct Latch(CancellationToken);

impl Latch {
    /// A new unfired latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Idempotent.
    pub fn fire(&self) {
        self.0.cancel();
    }

    /// Whether the latch has fired.
    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn fired(&self) {
        self.0.cancelled().await;
    }
}
