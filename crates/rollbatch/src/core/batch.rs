use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::active_set::ActiveSet;
use super::handler::BatchHandler;
use super::state::LoopState;

/// The scheduling loop.
///
/// Runs until `stop` is cancelled, cycling `Idle → Batching → Demultiplexing`.
/// The active set's lock is held while building the batch and while applying
/// the answer, never while the handler's `forward` runs, so admissions and
/// stream reads proceed during the backend call.
///
/// Stop is checked at the top of every cycle and again before dispatch. A
/// backend call in flight when `stop` fires is abandoned by dropping its future;
/// the handler also receives a child of `stop` to abort cooperatively. Items
/// still in the set when the loop ends are handed to [`BatchHandler::abandon`].
pub async fn batch_inference_loop<BH: BatchHandler>(
    handler: &BH,
    active: Arc<ActiveSet<BH::Request>>,
    stop: CancellationToken,
    state: Arc<watch::Sender<LoopState>>,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }

        state.send_replace(LoopState::Idle);
        if !active.wait_for_work(&stop).await {
            break;
        }

        state.send_replace(LoopState::Batching);
        let Some((input, size)) = active
            .drain_snapshot(|requests, reset| handler.make_batch_input(requests, reset))
            .await
        else {
            continue;
        };

        if stop.is_cancelled() {
            break;
        }

        let output = tokio::select! {
            output = handler.forward(input, stop.child_token()) => output,
            _ = stop.cancelled() => {
                tracing::warn!(batch_size = size, "abandoning in-flight batch on shutdown");
                break;
            }
        };

        state.send_replace(LoopState::Demultiplexing);
        let evicted = active
            .settle(
                size,
                |batch| handler.handle_outputs(batch, output),
                |request, failure| handler.discard(request, failure),
            )
            .await;
        tracing::trace!(batch_size = size, evicted, "batch settled");
    }

    let abandoned = active.close(|request| handler.abandon(request)).await;
    if abandoned > 0 {
        tracing::debug!(abandoned, "scheduling loop stopped with sessions in flight");
    }
    state.send_replace(LoopState::Stopped);
}
