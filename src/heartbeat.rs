use crate::protocol::Command;
use crate::queue::CommandQueue;
use crate::types::{zone_ids, ConnectionState, Priority, ZoneId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Queries that detect drift from the front panel or other clients
pub fn heartbeat_queries(zone: ZoneId) -> [Command; 3] {
    [
        Command::QueryVolume(zone),
        Command::QuerySource(zone),
        Command::QueryMute(zone),
    ]
}

/// Spawn the background poller
///
/// The interval is measured from the end of one sweep to the start of the
/// next. Zones are enqueued one at a time, each after the previous zone's
/// queries have left the queue.
pub(crate) fn spawn(
    queue: Arc<CommandQueue>,
    connection: watch::Receiver<ConnectionState>,
    interval: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if *connection.borrow() != ConnectionState::Connected {
                tracing::debug!("Skipping heartbeat while not connected");
                continue;
            }

            tracing::debug!("Heartbeat sweep starting");
            let sweep = async {
                for zone in zone_ids() {
                    queue.push(Priority::Poll, heartbeat_queries(zone));
                    queue.background_idle().await;
                }
            };
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = sweep => {}
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeps_zones_one_at_a_time() {
        let queue = Arc::new(CommandQueue::new());
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = spawn(queue.clone(), state_rx, Duration::from_secs(60), stop_rx);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 3);

        let first: Vec<_> = std::iter::from_fn(|| queue.try_pop()).map(|q| q.command).collect();
        assert_eq!(first, heartbeat_queries(1).to_vec());

        tokio::time::sleep(Duration::from_millis(1)).await;
        let second: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(second.len(), 3);
        assert!(second.iter().all(|q| q.priority == Priority::Poll));
        assert_eq!(second[0].command, Command::QueryVolume(2));

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn skips_sweep_while_disconnected() {
        let queue = Arc::new(CommandQueue::new());
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = spawn(queue.clone(), state_rx, Duration::from_secs(60), stop_rx);

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(queue.is_empty());

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
