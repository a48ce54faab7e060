//! Game engines.

pub mod blackjack;
pub mod crash;
pub mod cups;
pub mod duel;
pub mod events;
pub mod roulette;
pub mod slots;
pub mod types;

use crate::gateway::Action;
use std::time::Duration;
use tokio::sync::mpsc;

/// Wait up to `window` for a session action the filter accepts,
/// discarding everything else (stray clicks from other control sets).
/// Returns `None` on timeout or a closed channel.
pub(crate) async fn wait_for<T>(
    rx: &mut mpsc::Receiver<Action>,
    window: Duration,
    mut filter: impl FnMut(Action) -> Option<T>,
) -> Option<T> {
    tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Some(action) => {
                    if let Some(value) = filter(action) {
                        return Some(value);
                    }
                }
                None => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
