//! Maintenance thread: clock synchronization and periodic housekeeping.
//!
//! Every `interval` the thread:
//! - computes, for each registered adjustable clock, the offset that puts its
//!   device time on the master clock's timeline, and publishes it;
//! - calls [`Serviceable::service`] on every registered component.
//!
//! [`MaintenanceThread::synchronize_now`] runs a forced clock pass on the
//! calling thread without waiting for the next tick.

use crate::clock::{AdjustableClock, AudioClock};
use crate::config::MaintenanceConfig;
use crate::lockfree::Counter;
use crate::thread::{ThreadFactory, ThreadHandle};
use crate::time::AudioTime;
use crate::{Error, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Periodic housekeeping hook, called from the maintenance thread.
pub trait Serviceable: Send + Sync {
    fn service(&self);
}

/// Offset that maps `clock`'s device time onto `master`'s timeline.
///
/// The device is read between two master reads and compared against their
/// midpoint, which halves the error from being preempted in between.
pub fn offset_for(master: &dyn AudioClock, clock: &dyn AdjustableClock) -> AudioTime {
    let before = master.now();
    let device = clock.device_time();
    let after = master.now();
    let midpoint = before + AudioTime::from_nanos((after - before).nanos() / 2);
    midpoint - device
}

fn same_object<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Default)]
struct Registry {
    master: RwLock<Option<Arc<dyn AudioClock>>>,
    clocks: RwLock<Vec<Arc<dyn AdjustableClock>>>,
    serviceables: RwLock<Vec<Arc<dyn Serviceable>>>,
    passes: Counter,
    adjustments: Counter,
}

impl Registry {
    fn synchronize(&self, force: bool, threshold: AudioTime) -> usize {
        let Some(master) = self.master.read().clone() else {
            return 0;
        };
        let clocks = self.clocks.read().clone();
        let mut adjusted = 0;
        for clock in &clocks {
            if same_object(clock, &master) {
                continue;
            }
            let offset = offset_for(master.as_ref(), clock.as_ref());
            let previous = clock.offset();
            if force || (offset - previous).abs() > threshold {
                clock.set_offset(offset);
                adjusted += 1;
                tracing::trace!(%previous, %offset, "clock offset adjusted");
            }
        }
        self.adjustments.add(adjusted as u64);
        adjusted
    }

    fn service_all(&self) {
        let serviceables = self.serviceables.read().clone();
        for s in &serviceables {
            s.service();
        }
    }
}

enum MaintenanceCommand {
    Shutdown,
}

/// Low-priority periodic thread keeping clocks aligned to a master clock.
pub struct MaintenanceThread {
    config: MaintenanceConfig,
    registry: Arc<Registry>,
    factory: ThreadFactory,
    worker: Mutex<Option<(Sender<MaintenanceCommand>, ThreadHandle)>>,
}

impl MaintenanceThread {
    pub fn new(config: MaintenanceConfig, factory: ThreadFactory) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(Registry::default()),
            factory,
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    pub fn set_master_clock(&self, clock: Arc<dyn AudioClock>) {
        *self.registry.master.write() = Some(clock);
    }

    pub fn master_clock(&self) -> Option<Arc<dyn AudioClock>> {
        self.registry.master.read().clone()
    }

    pub fn add_adjustable_clock(&self, clock: Arc<dyn AdjustableClock>) {
        let mut clocks = self.registry.clocks.write();
        if !clocks.iter().any(|c| same_object(c, &clock)) {
            clocks.push(clock);
        }
    }

    pub fn remove_adjustable_clock(&self, clock: &Arc<dyn AdjustableClock>) -> bool {
        let mut clocks = self.registry.clocks.write();
        let before = clocks.len();
        clocks.retain(|c| !same_object(c, clock));
        clocks.len() != before
    }

    pub fn add_serviceable(&self, serviceable: Arc<dyn Serviceable>) {
        let mut list = self.registry.serviceables.write();
        if !list.iter().any(|s| same_object(s, &serviceable)) {
            list.push(serviceable);
        }
    }

    pub fn remove_serviceable(&self, serviceable: &Arc<dyn Serviceable>) -> bool {
        let mut list = self.registry.serviceables.write();
        let before = list.len();
        list.retain(|s| !same_object(s, serviceable));
        list.len() != before
    }

    /// Align every registered clock to the master now. Returns how many
    /// offsets were written.
    pub fn synchronize_now(&self) -> usize {
        self.registry.synchronize(true, self.config.sync_threshold)
    }

    /// Number of periodic passes run so far.
    pub fn passes(&self) -> u64 {
        self.registry.passes.get()
    }

    pub fn adjustments(&self) -> u64 {
        self.registry.adjustments.get()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let (tx, rx) = bounded::<MaintenanceCommand>(1);
        let registry = Arc::clone(&self.registry);
        let interval = self.config.interval;
        let threshold = self.config.sync_threshold;

        let handle = self
            .factory
            .spawn("harmonia-maintenance", self.config.priority, move || loop {
                registry.synchronize(false, threshold);
                registry.service_all();
                registry.passes.incr();
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(MaintenanceCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        tracing::debug!(?interval, "maintenance thread started");
        *worker = Some((tx, handle));
        Ok(())
    }

    /// Stop the thread. Idempotent; returns once it has exited or the join
    /// timeout passed.
    pub fn stop(&self) {
        let Some((tx, handle)) = self.worker.lock().take() else {
            return;
        };
        let _ = tx.try_send(MaintenanceCommand::Shutdown);
        drop(tx);
        handle.join_timeout(self.config.join_timeout);
        tracing::debug!("maintenance thread stopped");
    }
}

impl Drop for MaintenanceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingService(AtomicUsize);

    impl Serviceable for CountingService {
        fn service(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_offset_for_manual_clocks() {
        let master = ManualClock::new(AudioTime::from_millis(500));
        let device = ManualClock::new(AudioTime::from_millis(120));
        let offset = offset_for(&master, &device);
        assert_eq!(offset, AudioTime::from_millis(380));
    }

    #[test]
    fn test_synchronize_now_converges() {
        let maintenance =
            MaintenanceThread::new(MaintenanceConfig::default(), ThreadFactory::standard()).unwrap();
        let master = Arc::new(ManualClock::new(AudioTime::from_secs_f64(12.5)));
        let device = Arc::new(ManualClock::new(AudioTime::from_millis(3)));
        maintenance.set_master_clock(master.clone());
        maintenance.add_adjustable_clock(device.clone());
        assert_eq!(maintenance.synchronize_now(), 1);
        assert_eq!(device.now(), master.now());

        // drift, then resync
        device.advance(AudioTime::from_millis(7));
        master.advance(AudioTime::from_millis(5));
        assert_ne!(device.now(), master.now());
        maintenance.synchronize_now();
        assert_eq!(device.now(), master.now());
    }

    #[test]
    fn test_master_registered_as_adjustable_is_skipped() {
        let maintenance =
            MaintenanceThread::new(MaintenanceConfig::default(), ThreadFactory::standard()).unwrap();
        let master = Arc::new(ManualClock::new(AudioTime::from_millis(10)));
        maintenance.set_master_clock(master.clone());
        maintenance.add_adjustable_clock(master.clone());
        assert_eq!(maintenance.synchronize_now(), 0);
        assert_eq!(master.offset(), AudioTime::ZERO);
    }

    #[test]
    fn test_periodic_pass_services_and_syncs() {
        let config = MaintenanceConfig {
            interval: Duration::from_millis(5),
            ..MaintenanceConfig::default()
        };
        let maintenance = MaintenanceThread::new(config, ThreadFactory::standard()).unwrap();
        let master = Arc::new(MonotonicClock::new());
        master.set_offset(AudioTime::from_secs_f64(100.0));
        let device = Arc::new(MonotonicClock::new());
        let service = Arc::new(CountingService(AtomicUsize::new(0)));
        maintenance.set_master_clock(master.clone());
        maintenance.add_adjustable_clock(device.clone());
        maintenance.add_serviceable(service.clone());

        maintenance.start().unwrap();
        assert!(matches!(maintenance.start(), Err(Error::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(40));
        maintenance.stop();
        maintenance.stop();

        assert!(service.0.load(Ordering::SeqCst) >= 2);
        assert!(maintenance.passes() >= 2);
        let diff = (device.now() - master.now()).abs();
        assert!(diff < AudioTime::from_millis(5), "diff {diff}");
    }

    #[test]
    fn test_remove_registrations() {
        let maintenance =
            MaintenanceThread::new(MaintenanceConfig::default(), ThreadFactory::standard()).unwrap();
        let clock: Arc<dyn AdjustableClock> = Arc::new(ManualClock::default());
        maintenance.add_adjustable_clock(clock.clone());
        maintenance.add_adjustable_clock(clock.clone());
        assert!(maintenance.remove_adjustable_clock(&clock));
        assert!(!maintenance.remove_adjustable_clock(&clock));
        let service: Arc<dyn Serviceable> = Arc::new(CountingService(AtomicUsize::new(0)));
        maintenance.add_serviceable(service.clone());
        assert!(maintenance.remove_serviceable(&service));
    }
}
