//! Cancellable delayed and periodic tasks.
//!
//! Timers never touch state themselves: each fire sends a typed tick back
//! into the coordinator channel, so every mutation still happens on the
//! owning task. Tasks die with the scheduler (or earlier, when cancelled).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::{ServerEvent, TickEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

pub struct Scheduler {
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    tasks: HashMap<TaskId, JoinHandle<()>>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(events_tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            events_tx,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    fn next_task_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    /// Fire a tick once after the given delay.
    pub fn schedule_once(&mut self, delay: Duration, event: TickEvent) -> TaskId {
        self.reap_finished();
        let id = self.next_task_id();
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ServerEvent::Tick(event));
        });
        self.tasks.insert(id, handle);
        id
    }

    /// Fire a tick on every period boundary until cancelled.
    pub fn schedule_periodic(&mut self, period: Duration, event: TickEvent) -> TaskId {
        self.reap_finished();
        let id = self.next_task_id();
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick of tokio's interval fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(ServerEvent::Tick(event.clone())).is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(id, handle);
        id
    }

    pub fn cancel(&mut self, id: TaskId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
    }

    fn reap_finished(&mut self) {
        self.tasks.retain(|_, handle| !handle.is_finished());
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
