//! Priority thread spawning.
//!
//! A [`ThreadFactory`] is created once at startup. Its backend is picked by
//! a capability probe: if a probe thread can raise its own priority the
//! elevated backend is used, otherwise threads are spawned plainly. Both
//! facts stay queryable for the lifetime of the factory.

use crate::error::{Error, Result};
use crate::lockfree::AtomicFlag;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thread_priority::{ThreadPriority, ThreadPriorityValue};

/// Logical thread priority, 0 (lowest) to 28 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const LOW: Priority = Priority(4);
    pub const NORMAL: Priority = Priority(14);
    pub const HIGH: Priority = Priority(24);
    pub const REALTIME: Priority = Priority(28);

    /// Values above 28 are clamped.
    pub fn new(level: u8) -> Self {
        Self(level.min(28))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    fn to_os(self) -> Option<ThreadPriority> {
        let value = (u32::from(self.0) * 99 / 28) as u8;
        ThreadPriorityValue::try_from(value)
            .ok()
            .map(ThreadPriority::Crossplatform)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingBackend {
    /// Threads raise their OS priority on start.
    Elevated,
    /// Plain threads at default priority.
    Standard,
}

/// Spawns named threads with a logical priority.
#[derive(Debug, Clone)]
pub struct ThreadFactory {
    backend: SchedulingBackend,
    could_set_priority: Arc<AtomicFlag>,
}

impl ThreadFactory {
    /// Pick the backend by trying to raise a probe thread's priority.
    pub fn probe() -> Self {
        let probe = thread::Builder::new()
            .name("harmonia-probe".into())
            .spawn(|| thread_priority::set_current_thread_priority(ThreadPriority::Max).is_ok());
        let elevated = match probe.map(|h| h.join()) {
            Ok(Ok(ok)) => ok,
            _ => false,
        };
        let backend = if elevated {
            SchedulingBackend::Elevated
        } else {
            SchedulingBackend::Standard
        };
        tracing::info!(?backend, "thread scheduling backend selected");
        Self {
            backend,
            could_set_priority: Arc::new(AtomicFlag::new(false)),
        }
    }

    /// Plain threads only, no probe.
    pub fn standard() -> Self {
        Self {
            backend: SchedulingBackend::Standard,
            could_set_priority: Arc::new(AtomicFlag::new(false)),
        }
    }

    pub fn backend(&self) -> SchedulingBackend {
        self.backend
    }

    pub fn has_elevated_scheduling(&self) -> bool {
        self.backend == SchedulingBackend::Elevated
    }

    /// Whether any thread spawned by this factory actually got a raised priority.
    pub fn could_set_priority(&self) -> bool {
        self.could_set_priority.get()
    }

    /// Spawn `f` on a new thread named `name`.
    ///
    /// With the elevated backend the thread tries `priority` and then every
    /// lower level down to 1 before running `f`.
    pub fn spawn<F>(&self, name: &str, priority: Priority, f: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let elevated = Arc::new(AtomicFlag::new(false));
        let thread_elevated = Arc::clone(&elevated);
        let factory_flag = Arc::clone(&self.could_set_priority);
        let backend = self.backend;
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if backend == SchedulingBackend::Elevated {
                    if let Some(level) = raise_priority(priority) {
                        thread_elevated.set(true);
                        factory_flag.set(true);
                        tracing::debug!(thread = %thread_name, level, "raised thread priority");
                    } else {
                        tracing::debug!(thread = %thread_name, "running at default priority");
                    }
                }
                f();
            })
            .map_err(|source| Error::ThreadSpawn {
                name: name.to_string(),
                source,
            })?;

        Ok(ThreadHandle {
            name: name.to_string(),
            id: handle.thread().id(),
            handle: Some(handle),
            elevated,
        })
    }
}

fn raise_priority(priority: Priority) -> Option<u8> {
    let mut level = priority.level();
    while level > 0 {
        if let Some(p) = Priority(level).to_os() {
            if thread_priority::set_current_thread_priority(p).is_ok() {
                return Some(level);
            }
        }
        level -= 1;
    }
    None
}

/// Handle to a thread spawned by a [`ThreadFactory`].
#[derive(Debug)]
pub struct ThreadHandle {
    name: String,
    id: ThreadId,
    handle: Option<JoinHandle<()>>,
    elevated: Arc<AtomicFlag>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Whether the thread runs at a raised OS priority.
    pub fn priority_elevated(&self) -> bool {
        self.elevated.get()
    }

    /// Wait up to `timeout` for the thread to exit and join it.
    ///
    /// Returns `false` if it is still running; the handle stays usable.
    pub fn try_join(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.name, "thread panicked");
            }
        }
        true
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` and detaches the thread if it is still running.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        let joined = self.try_join(timeout);
        if !joined {
            tracing::warn!(thread = %self.name, ?timeout, "thread did not exit in time, detaching");
        }
        joined
    }
}
