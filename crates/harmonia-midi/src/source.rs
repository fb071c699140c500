//! Event sources: anything that produces timestamped events for listeners.
//!
//! A source owns a clock. Registered with the maintenance thread, that clock
//! gets an offset which maps the source's device timestamps onto the master
//! timeline, so listeners receive events already in master time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use harmonia_core::{AdjustableClock, AudioClock, AudioTime, MonotonicClock};

use crate::event::TimedEvent;
use crate::{Error, Result};

/// Identity of an event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receiver of timestamped events.
///
/// Called on the producing thread; implementations must not block for long.
pub trait EventListener: Send + Sync {
    fn event_received(&self, event: TimedEvent);
}

/// A producer of events with its own adjustable clock.
pub trait EventSource: AdjustableClock {
    fn id(&self) -> SourceId;

    fn add_listener(&self, listener: Arc<dyn EventListener>);

    fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> bool;

    fn is_open(&self) -> bool;

    /// Stop delivering. Idempotent.
    fn close(&self);

    /// With timestamping on, events keep the device time they were produced
    /// at (mapped through the clock offset). Off, they are stamped with the
    /// clock's current time on arrival.
    fn set_timestamping(&self, enabled: bool);

    fn is_timestamping(&self) -> bool;
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// In-process event source: feed it raw bytes or events from any thread.
pub struct VirtualSource {
    id: SourceId,
    name: String,
    clock: MonotonicClock,
    listeners: ArcSwap<Vec<Arc<dyn EventListener>>>,
    open: AtomicBool,
    timestamping: AtomicBool,
}

impl VirtualSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SourceId::next(),
            name: name.into(),
            clock: MonotonicClock::new(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            open: AtomicBool::new(true),
            timestamping: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Parse `bytes` and deliver them stamped with the current time.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let event = TimedEvent::from_bytes(self.now(), bytes)?;
        self.deliver(event)
    }

    /// Parse `bytes` produced at `device_time` on this source's device clock.
    pub fn send_at(&self, device_time: AudioTime, bytes: &[u8]) -> Result<()> {
        let time = if self.is_timestamping() {
            self.clock.offset() + device_time
        } else {
            self.now()
        };
        let event = TimedEvent::from_bytes(time, bytes)?;
        self.deliver(event)
    }

    /// Deliver an event whose time is already on this source's timeline.
    pub fn send_event(&self, event: TimedEvent) -> Result<()> {
        let event = if self.is_timestamping() {
            event
        } else {
            event.with_time(self.now())
        };
        self.deliver(event)
    }

    fn deliver(&self, event: TimedEvent) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SourceClosed);
        }
        let event = event.with_source(self.id);
        tracing::trace!(source = %self.name, %event, "event");
        for listener in self.listeners.load().iter() {
            listener.event_received(event.clone());
        }
        Ok(())
    }
}

impl AudioClock for VirtualSource {
    fn now(&self) -> AudioTime {
        self.clock.now()
    }
}

impl AdjustableClock for VirtualSource {
    fn device_time(&self) -> AudioTime {
        self.clock.device_time()
    }

    fn offset(&self) -> AudioTime {
        self.clock.offset()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.clock.set_offset(offset);
    }
}

impl EventSource for VirtualSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|l| same_listener(l, &listener)) {
                next.push(Arc::clone(&listener));
            }
            next
        });
    }

    fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        let previous = self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|l| !same_listener(l, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|l| same_listener(l, listener))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.listeners.store(Arc::new(Vec::new()));
            tracing::debug!(source = %self.name, "event source closed");
        }
    }

    fn set_timestamping(&self, enabled: bool) {
        self.timestamping.store(enabled, Ordering::Release);
    }

    fn is_timestamping(&self) -> bool {
        self.timestamping.load(Ordering::Acquire)
    }
}
