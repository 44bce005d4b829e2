//! Process-wide monitor registry (§3 "Registry", C6).
//!
//! Holds every configured [`crate::monitor::MonitorInstance`], in the order
//! they were added — a freshly reactivated monitor is reinserted at the
//! front, mirroring the original core's `insert_front` behavior so that a
//! restarted monitor module is tried first on the next iteration over "all
//! monitors" callers commonly do at startup.

use crate::monitor::MonitorInstance;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The monitor registry. Cheap to clone (an `Arc` around a mutex-guarded
/// `Vec`), so every admin-facing API entry point can hold its own handle.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Vec<Arc<MonitorInstance>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `monitor` at the front of the list.
    pub fn insert_front(&self, monitor: Arc<MonitorInstance>) {
        self.inner.lock().insert(0, monitor);
    }

    /// Finds the first *active* monitor by name (§4.6: deactivated entries
    /// are retained for [`Registry::reactivate`] but not addressable by
    /// plain lookup).
    pub fn find(&self, name: &str) -> Option<Arc<MonitorInstance>> {
        self.inner.lock().iter().find(|m| m.name() == name && m.is_active()).cloned()
    }

    /// True iff some active registered monitor already owns a backend with
    /// this name, used to reject double-registration across monitors (§3
    /// invariant, P7).
    pub fn server_is_monitored(&self, server_name: &str) -> Option<String> {
        self.inner
            .lock()
            .iter()
            .find(|m| m.is_active() && m.has_backend(server_name))
            .map(|m| m.name().to_string())
    }

    /// Marks `name`'s active monitor inactive without removing it from the
    /// list, so a later [`Registry::reactivate`] of the same name+module can
    /// find it again (§3 "logically deleted but still addressable").
    pub fn deactivate(&self, name: &str) -> bool {
        match self.find(name) {
            Some(monitor) => {
                monitor.active.store(false, std::sync::atomic::Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Finds the first *inactive* monitor matching both `name` and `module`
    /// and marks it active again, returning it. Grounded on
    /// `MonitorManager::reactivate_monitor` in the original monitor core
    /// (§4.6).
    pub fn reactivate(&self, name: &str, module: &str) -> Option<Arc<MonitorInstance>> {
        let monitors = self.inner.lock();
        let found = monitors
            .iter()
            .find(|m| !m.is_active() && m.name() == name && m.module() == module)
            .cloned();
        if let Some(monitor) = &found {
            monitor.active.store(true, std::sync::atomic::Ordering::Release);
        }
        found
    }

    /// Runs `f` over every registered monitor in order, stopping early the
    /// first time `f` returns `false`.
    pub fn foreach(&self, mut f: impl FnMut(&Arc<MonitorInstance>) -> bool) {
        let snapshot = self.inner.lock().clone();
        for monitor in &snapshot {
            if !f(monitor) {
                break;
            }
        }
    }

    /// Snapshot of every registered monitor's name, in registry order.
    pub fn list(&self) -> Vec<String> {
        self.inner.lock().iter().map(|m| m.name().to_string()).collect()
    }

    /// Atomically takes ownership of the whole list, leaving the registry
    /// empty. Callers must have already stopped every monitor; this is a
    /// shutdown-only operation and does not itself stop anything.
    pub fn clear(&self) -> Vec<Arc<MonitorInstance>> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Blocks the calling thread until `name`'s monitor has completed at
    /// least one more tick than it had at call time, or `timeout` elapses.
    /// Used by admin operations that want to observe the effect of a change
    /// they just made (Section B.2 of the expanded design).
    pub fn wait_for_tick(&self, name: &str, timeout: Duration) -> bool {
        let Some(monitor) = self.find(name) else { return false };
        let start_tick = monitor.tick_count();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if monitor.tick_count() > start_tick {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{NullExternalCommand, NullServiceRouter};
    use crate::monitor::MonitorInstance;
    use crate::probe::classic::ClassicReplicationProbe;
    use crate::settings::MonitorSettings;
    use std::path::PathBuf;

    fn make_monitor(name: &str) -> Arc<MonitorInstance> {
        Arc::new(MonitorInstance::new(
            name.to_string(),
            "classic_replication".to_string(),
            MonitorSettings::default(),
            PathBuf::from(format!("/tmp/{name}.journal")),
            Box::new(ClassicReplicationProbe::default()),
            Arc::new(NullServiceRouter),
            Arc::new(NullExternalCommand),
        ))
    }

    #[test]
    fn insert_front_puts_newest_monitor_first() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        registry.insert_front(make_monitor("b"));
        assert_eq!(registry.list(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn find_locates_by_name() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        assert!(registry.find("a").is_some());
        assert!(registry.find("missing").is_none());
    }

    #[test]
    fn clear_empties_registry_and_returns_contents() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        let taken = registry.clear();
        assert_eq!(taken.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn deactivated_monitor_is_unfindable_until_reactivated() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        assert!(registry.deactivate("a"));
        assert!(registry.find("a").is_none());
        // still present in the list, just inactive
        assert_eq!(registry.list(), vec!["a".to_string()]);

        let reactivated = registry.reactivate("a", "classic_replication").expect("reactivates");
        assert_eq!(reactivated.name(), "a");
        assert!(registry.find("a").is_some());
    }

    #[test]
    fn reactivate_requires_matching_module() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        registry.deactivate("a");
        assert!(registry.reactivate("a", "synced_quorum").is_none());
        assert!(registry.reactivate("a", "classic_replication").is_some());
    }

    #[test]
    fn foreach_stops_early_on_false() {
        let registry = Registry::new();
        registry.insert_front(make_monitor("a"));
        registry.insert_front(make_monitor("b"));
        let mut seen = Vec::new();
        registry.foreach(|m| {
            seen.push(m.name().to_string());
            false
        });
        assert_eq!(seen.len(), 1);
    }
}
