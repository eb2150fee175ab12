//! Prioritised outgoing command queue
//!
//! Producers (user calls, debounce timers, heartbeat, resync) push from any
//! task; the connection writer is the single consumer. Dequeue order is the
//! resync batch, then the `User` lane, then the `Poll` lane, FIFO within each.

use crate::protocol::Command;
use crate::types::Priority;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Command waiting for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub command: Command,
    pub priority: Priority,
    pub enqueued_at: Instant,
    resync: bool,
}

#[derive(Default)]
struct Lanes {
    /// Startup queries re-issued after (re)connecting; drained before user work
    resync: VecDeque<QueuedCommand>,
    user: VecDeque<QueuedCommand>,
    poll: VecDeque<QueuedCommand>,
}

impl Lanes {
    fn background_len(&self) -> usize {
        self.resync.len() + self.poll.len()
    }
}

pub struct CommandQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
    /// Outstanding resync + poll entries, for heartbeat pacing
    background: watch::Sender<usize>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (background, _) = watch::channel(0);
        Self {
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            background,
        }
    }

    fn lanes(&self) -> std::sync::MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append commands to a lane as one contiguous batch
    pub fn push(&self, priority: Priority, commands: impl IntoIterator<Item = Command>) {
        let now = Instant::now();
        let mut lanes = self.lanes();
        let lane = match priority {
            Priority::User => &mut lanes.user,
            Priority::Poll => &mut lanes.poll,
        };
        for command in commands {
            lane.push_back(QueuedCommand {
                command,
                priority,
                enqueued_at: now,
                resync: false,
            });
        }
        self.background.send_replace(lanes.background_len());
        drop(lanes);
        self.notify.notify_one();
    }

    /// Replace any unfinished resync batch with a fresh one
    ///
    /// Resync entries carry `Poll` priority but are dispatched ahead of the
    /// user lane so the mirror is rebuilt before earlier user work replays.
    pub fn begin_resync(&self, commands: impl IntoIterator<Item = Command>) {
        let now = Instant::now();
        let mut lanes = self.lanes();
        lanes.resync = commands
            .into_iter()
            .map(|command| QueuedCommand {
                command,
                priority: Priority::Poll,
                enqueued_at: now,
                resync: true,
            })
            .collect();
        tracing::debug!("Queued {} resync queries", lanes.resync.len());
        self.background.send_replace(lanes.background_len());
        drop(lanes);
        self.notify.notify_one();
    }

    /// Put back a command whose write failed so it is retried first
    pub fn requeue_front(&self, command: QueuedCommand) {
        let mut lanes = self.lanes();
        let lane = if command.resync {
            &mut lanes.resync
        } else {
            match command.priority {
                Priority::User => &mut lanes.user,
                Priority::Poll => &mut lanes.poll,
            }
        };
        lane.push_front(command);
        self.background.send_replace(lanes.background_len());
        drop(lanes);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<QueuedCommand> {
        let mut lanes = self.lanes();
        let lanes = &mut *lanes;
        let next = match lanes.resync.pop_front() {
            Some(command) => Some(command),
            None => match lanes.user.pop_front() {
                Some(command) => Some(command),
                None => lanes.poll.pop_front(),
            },
        };
        if next.is_some() {
            self.background.send_replace(lanes.background_len());
        }
        next
    }

    /// Wait for the next command
    pub async fn pop(&self) -> QueuedCommand {
        loop {
            let notified = self.notify.notified();
            if let Some(command) = self.try_pop() {
                return command;
            }
            notified.await;
        }
    }

    /// Resolves once no resync or poll entries are waiting
    pub async fn background_idle(&self) {
        let mut rx = self.background.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes();
        lanes.resync.len() + lanes.user.len() + lanes.poll.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands currently waiting in the user lane
    pub fn user_commands(&self) -> Vec<Command> {
        self.lanes().user.iter().map(|q| q.command).collect()
    }

    pub fn clear(&self) {
        let mut lanes = self.lanes();
        *lanes = Lanes::default();
        self.background.send_replace(0);
    }
}

/// Enforces a minimum gap between the start of consecutive dispatches
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_dispatch: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: None,
        }
    }

    /// Suspend until the next dispatch is allowed
    pub async fn ready(&self) {
        if let Some(last) = self.last_dispatch {
            tokio::time::sleep_until(last + self.interval).await;
        }
    }

    pub fn mark(&mut self) {
        self.last_dispatch = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_lane_preempts_poll_lane() {
        let queue = CommandQueue::new();
        queue.push(Priority::Poll, [Command::QueryVolume(1)]);
        queue.push(Priority::User, [Command::SetVolume(2, 10)]);
        assert_eq!(queue.try_pop().unwrap().command, Command::SetVolume(2, 10));
        assert_eq!(queue.try_pop().unwrap().command, Command::QueryVolume(1));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn poll_already_dispatched_is_not_preempted() {
        let queue = CommandQueue::new();
        queue.push(Priority::Poll, [Command::QueryVolume(1)]);
        let first = queue.try_pop().unwrap();
        queue.push(Priority::User, [Command::SetVolume(2, 10)]);
        assert_eq!(first.command, Command::QueryVolume(1));
        assert_eq!(first.priority, Priority::Poll);
        assert_eq!(queue.try_pop().unwrap().command, Command::SetVolume(2, 10));
    }

    #[test]
    fn lanes_are_fifo() {
        let queue = CommandQueue::new();
        queue.push(Priority::User, [Command::SetVolume(1, 1), Command::QueryVolume(1)]);
        queue.push(Priority::User, [Command::SetSource(1, 2)]);
        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).map(|q| q.command).collect();
        assert_eq!(
            order,
            vec![Command::SetVolume(1, 1), Command::QueryVolume(1), Command::SetSource(1, 2)]
        );
    }

    #[test]
    fn resync_runs_before_pending_user_commands() {
        let queue = CommandQueue::new();
        queue.push(Priority::User, [Command::SetVolume(1, 20)]);
        queue.begin_resync([Command::QueryZoneLabel(1), Command::QueryZoneLabel(2)]);
        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).map(|q| q.command).collect();
        assert_eq!(
            order,
            vec![
                Command::QueryZoneLabel(1),
                Command::QueryZoneLabel(2),
                Command::SetVolume(1, 20)
            ]
        );
    }

    #[test]
    fn requeued_command_goes_back_to_its_lane_head() {
        let queue = CommandQueue::new();
        queue.push(Priority::User, [Command::SetVolume(1, 1), Command::SetVolume(1, 2)]);
        let first = queue.try_pop().unwrap();
        queue.requeue_front(first);
        assert_eq!(queue.user_commands(), vec![Command::SetVolume(1, 1), Command::SetVolume(1, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn requeue_keeps_original_enqueue_time() {
        let queue = CommandQueue::new();
        queue.push(Priority::User, [Command::SetVolume(1, 1)]);
        let stamped = Instant::now();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = queue.try_pop().unwrap();
        queue.requeue_front(first);

        let retried = queue.try_pop().unwrap();
        assert_eq!(retried.enqueued_at, stamped);
        assert_eq!(retried.enqueued_at.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spaces_dispatches() {
        let queue = CommandQueue::new();
        let mut pacer = Pacer::new(Duration::from_millis(100));
        queue.push(Priority::User, [Command::SetVolume(1, 1)]);
        queue.push(Priority::User, [Command::SetVolume(1, 2)]);

        let mut sent = Vec::new();
        for _ in 0..2 {
            pacer.ready().await;
            let _ = queue.pop().await;
            pacer.mark();
            sent.push(Instant::now());
        }
        assert!(sent[1] - sent[0] >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn pop_wakes_on_push_from_another_task() {
        let queue = std::sync::Arc::new(CommandQueue::new());
        let producer = queue.clone();
        let handle = tokio::spawn(async move { queue.pop().await });
        tokio::task::yield_now().await;
        producer.push(Priority::Poll, [Command::QueryMute(3)]);
        assert_eq!(handle.await.unwrap().command, Command::QueryMute(3));
    }

    #[tokio::test]
    async fn background_idle_waits_for_poll_lane() {
        let queue = CommandQueue::new();
        queue.push(Priority::Poll, [Command::QueryMute(3)]);
        queue.push(Priority::User, [Command::SetMute(3, true)]);
        assert!(tokio::time::timeout(Duration::from_millis(10), queue.background_idle())
            .await
            .is_err());
        queue.try_pop();
        queue.try_pop();
        queue.background_idle().await;
        assert!(queue.is_empty());
    }
}
