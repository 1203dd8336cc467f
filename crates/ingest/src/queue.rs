//! Blocking FIFO task queue with interruption.
//!
//! Consumers block in [`TaskQueue::get_next_task`] until a task arrives or
//! the queue is interrupted. Interrupting drops the only sender of a side
//! channel; every blocked `select!` then wakes on the disconnect.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

#[derive(Debug)]
pub(crate) enum NextTask<T> {
    Task(T),
    Interrupted,
}

pub(crate) struct TaskQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    interrupt_tx: Mutex<Option<Sender<()>>>,
    interrupt_rx: Receiver<()>,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        let (tx, rx) = unbounded();
        let (interrupt_tx, interrupt_rx) = unbounded();
        Self {
            name,
            tx,
            rx,
            interrupt_tx: Mutex::new(Some(interrupt_tx)),
            interrupt_rx,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Append a task. Returns `false` if the queue was interrupted.
    pub(crate) fn put(&self, task: T) -> bool {
        if self.is_interrupted() {
            return false;
        }
        // The queue owns a receiver, so the send cannot fail.
        self.tx.send(task).is_ok()
    }

    /// Block until a task is available or the queue is interrupted.
    pub(crate) fn get_next_task(&self) -> NextTask<T> {
        if self.is_interrupted() {
            return NextTask::Interrupted;
        }
        select! {
            recv(self.rx) -> task => match task {
                Ok(task) => NextTask::Task(task),
                Err(_) => NextTask::Interrupted,
            },
            recv(self.interrupt_rx) -> _ => NextTask::Interrupted,
        }
    }

    /// Wake every blocked consumer. Tasks still queued are discarded when the
    /// queue is dropped.
    pub(crate) fn interrupt(&self) {
        self.interrupt_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Drop every queued task, returning how many there were.
    pub(crate) fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = TaskQueue::new("test");
        for i in 0..5 {
            assert!(queue.put(i));
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            match queue.get_next_task() {
                NextTask::Task(t) => assert_eq!(t, i),
                NextTask::Interrupted => panic!("unexpected interrupt"),
            }
        }
    }

    #[test]
    fn blocked_consumer_receives_later_task() {
        let queue = Arc::new(TaskQueue::new("test"));
        let q = Arc::clone(&queue);
        let consumer = thread::spawn(move || match q.get_next_task() {
            NextTask::Task(t) => Some(t),
            NextTask::Interrupted => None,
        });
        thread::sleep(Duration::from_millis(20));
        queue.put(42u32);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn interrupt_wakes_all_blocked_consumers() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new("test"));
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&queue);
                thread::spawn(move || matches!(q.get_next_task(), NextTask::Interrupted))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        for consumer in consumers {
            assert!(consumer.join().unwrap());
        }
    }

    #[test]
    fn put_after_interrupt_is_rejected() {
        let queue = TaskQueue::new("test");
        queue.interrupt();
        assert!(queue.is_interrupted());
        assert!(!queue.put(1));
        assert!(matches!(queue.get_next_task(), NextTask::Interrupted));
    }

    #[test]
    fn drain_discards_queued_tasks() {
        let queue = TaskQueue::new("test");
        queue.put(1);
        queue.put(2);
        assert_eq!(queue.drain(), 2);
        assert_eq!(queue.len(), 0);
    }
}
