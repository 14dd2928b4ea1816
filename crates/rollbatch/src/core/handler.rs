use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::active_set::Completion;
use crate::error::BatchFailure;

/// The three steps of one scheduling iteration, as seen by the loop.
///
/// The loop owns locking and wake-ups; a handler only turns items into a
/// batch, runs it, and applies the result back onto the same items.
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    type Request: Completion + Send + 'static;
    type ModelInput: Send;
    type ModelOutput: Send;

    /// Build one batch from the active items, in order. Called under the lock.
    fn make_batch_input(&self, requests: &[Self::Request], reset: bool) -> Self::ModelInput;

    /// Run the batch. Called without the lock held.
    async fn forward(&self, model_input: Self::ModelInput, cancel: CancellationToken) -> Self::ModelOutput;

    /// Route outputs back onto the items that produced the batch. Called under the lock.
    ///
    /// Items that are done must report [`Completion::is_completed`] afterwards.
    /// Returning a [`BatchFailure`] arms the reset marker for the next batch.
    fn handle_outputs(
        &self,
        batch: &mut [Self::Request],
        output: Self::ModelOutput,
    ) -> Result<(), BatchFailure>;

    /// End an item that was admitted while a failed batch was in flight.
    ///
    /// A failed batch discards the whole active set, not only the items it
    /// was built from, so these items end with the same failure.
    fn discard(&self, request: &mut Self::Request, failure: &BatchFailure);

    /// End an item that will never be scheduled again because the loop stopped.
    fn abandon(&self, request: &mut Self::Request);
}
