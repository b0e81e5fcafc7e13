use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Debug, Default)]
struct Inner {
    messages: VecDeque<String>,
    dropped: u64,
}

/// Diagnostic messages waiting to be published on the log topic.
///
/// Cloning gives another handle to the same queue. Messages are drained
/// oldest first. Once `capacity` entries are waiting, each push discards the
/// oldest pending message.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl LogBuffer {
    /// A `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        LogBuffer {
            inner: Default::default(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock can't leave the queue half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut inner = self.lock();

        while inner.messages.len() >= self.capacity {
            inner.messages.pop_front();
            inner.dropped += 1;
        }

        inner.messages.push_back(message.into());
    }

    /// Logs `message` locally and queues it for the log topic.
    pub fn report(&self, level: log::Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(level, "{}", message);
        self.push(message);
    }

    pub fn drain_one(&self) -> Option<String> {
        self.lock().messages.pop_front()
    }

    /// Puts back a message that was drained but could not be delivered.
    pub fn requeue_front(&self, message: String) {
        let mut inner = self.lock();

        if inner.messages.len() >= self.capacity {
            inner.dropped += 1;
            return;
        }

        inner.messages.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
