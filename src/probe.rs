//! Periodic concurrent liveness probing.
//!
//! Every cycle reads the current host set from the registry (never a
//! stale capture), fires one reachability check per host concurrently,
//! and merges the results into the status cache. Cycles never overlap:
//! the next tick is only honoured once the slowest probe of the
//! previous cycle has returned or timed out.

use crate::models::{Host, HostId};
use crate::registry::SharedHostRegistry;
use crate::status::SharedStatusCache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Reachability primitive, trait-seamed so tests inject scripted fakes.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn check_reachable(&self, host: &Host) -> bool;
}

/// TCP connect against `address:port`. DNS resolution is part of the
/// probe; any failure reads as unreachable.
pub struct TcpPinger;

#[async_trait]
impl Pinger for TcpPinger {
    async fn check_reachable(&self, host: &Host) -> bool {
        TcpStream::connect((host.address.as_str(), host.port)).await.is_ok()
    }
}

/// Probes every host concurrently, each bounded by `timeout`. A probe
/// failure is never escalated — it only yields `false`.
pub async fn probe_all(
    pinger: &dyn Pinger,
    hosts: &[Host],
    timeout: Duration,
) -> HashMap<HostId, bool> {
    let checks = hosts.iter().map(|host| async move {
        let online = tokio::time::timeout(timeout, pinger.check_reachable(host))
            .await
            .unwrap_or(false);
        (host.id, online)
    });
    futures::future::join_all(checks).await.into_iter().collect()
}

pub struct Prober {
    registry: SharedHostRegistry,
    cache: SharedStatusCache,
    pinger: Arc<dyn Pinger>,
    interval: Duration,
    timeout: Duration,
}

/// Stops the probe loop when dropped or explicitly shut down.
pub struct ProbeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl Prober {
    pub fn new(
        registry: SharedHostRegistry,
        cache: SharedStatusCache,
        pinger: Arc<dyn Pinger>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self { registry, cache, pinger, interval, timeout }
    }

    /// One full probe cycle over the host set as it is right now.
    pub async fn run_cycle(&self) {
        let hosts = self.registry.list().await;
        if hosts.is_empty() {
            // An empty set idles the loop rather than cancelling it; the
            // timer keeps ticking so a re-added host is picked up on the
            // next tick without a restart.
            return;
        }
        let results = probe_all(self.pinger.as_ref(), &hosts, self.timeout).await;
        let online = results.values().filter(|v| **v).count();
        debug!("probe cycle: {}/{} hosts online", online, results.len());
        self.cache.update(results);
    }

    /// Spawns the periodic probe loop. The cadence restarts cleanly
    /// whenever the registered host count changes, and missed ticks
    /// collapse instead of stacking when a cycle overruns.
    pub fn spawn(self) -> ProbeHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!("probe loop started (interval {:?})", self.interval);
            let mut period = tokio::time::interval(self.interval);
            period.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_count = usize::MAX;

            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        info!("probe loop stopped");
                        break;
                    }
                    _ = period.tick() => {
                        let count = self.registry.count().await;
                        if count != last_count {
                            // Host set changed: restart the cadence from
                            // now, probing the new set in this cycle.
                            last_count = count;
                            period = tokio::time::interval_at(
                                tokio::time::Instant::now() + self.interval,
                                self.interval,
                            );
                            period.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                        self.run_cycle().await;
                    }
                }
            }
        });
        ProbeHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostRegistry;
    use crate::status::StatusCache;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use uuid::Uuid;

    fn host(id: HostId) -> Host {
        Host {
            id,
            name: format!("host-{id}"),
            address: "10.0.0.5".into(),
            port: 9876,
            mac: None,
        }
    }

    /// Answers each probe from a prerecorded per-cycle script.
    struct ScriptedPinger {
        script: Mutex<VecDeque<bool>>,
    }

    impl ScriptedPinger {
        fn new(script: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into_iter().collect()) })
        }
    }

    #[async_trait]
    impl Pinger for ScriptedPinger {
        async fn check_reachable(&self, _host: &Host) -> bool {
            self.script.lock().pop_front().unwrap_or(false)
        }
    }

    /// Never answers; only the probe timeout ends it.
    struct HangingPinger;

    #[async_trait]
    impl Pinger for HangingPinger {
        async fn check_reachable(&self, _host: &Host) -> bool {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            true
        }
    }

    async fn temp_registry() -> SharedHostRegistry {
        let path = std::env::temp_dir().join(format!("lanward-probe-{}.json", Uuid::new_v4()));
        Arc::new(HostRegistry::new(path.to_str().unwrap()))
    }

    #[tokio::test]
    async fn probe_timeout_reads_as_offline() {
        let hosts = vec![host(1)];
        let results = probe_all(&HangingPinger, &hosts, Duration::from_millis(20)).await;
        assert_eq!(results.get(&1), Some(&false));
    }

    #[tokio::test]
    async fn probes_of_one_cycle_run_concurrently() {
        struct BarrierPinger(tokio::sync::Barrier);

        #[async_trait]
        impl Pinger for BarrierPinger {
            async fn check_reachable(&self, _host: &Host) -> bool {
                // Only passes if every probe of the cycle is in flight
                // at the same time.
                self.0.wait().await;
                true
            }
        }

        let n = 8;
        let hosts: Vec<Host> = (1..=n).map(host).collect();
        let pinger = BarrierPinger(tokio::sync::Barrier::new(n as usize));
        let results =
            tokio::time::timeout(Duration::from_secs(2), probe_all(&pinger, &hosts, Duration::from_secs(1)))
                .await
                .expect("probes did not start concurrently");
        assert!(results.values().all(|v| *v));
    }

    #[tokio::test]
    async fn status_progresses_absent_then_offline_then_online() {
        let registry = temp_registry().await;
        registry.add("desk".into(), "10.0.0.5".into(), 9876, None).await.unwrap();
        let cache = StatusCache::new();
        let pinger = ScriptedPinger::new([false, false, true]);

        let prober = Prober::new(
            registry,
            cache.clone(),
            pinger,
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        // Never probed: absent, not offline.
        assert_eq!(cache.get(1), None);

        prober.run_cycle().await;
        assert_eq!(cache.get(1), Some(false));
        prober.run_cycle().await;
        assert_eq!(cache.get(1), Some(false));
        prober.run_cycle().await;
        assert_eq!(cache.get(1), Some(true));
    }

    #[tokio::test]
    async fn empty_host_set_skips_the_cycle() {
        let registry = temp_registry().await;
        let cache = StatusCache::new();
        let prober = Prober::new(
            registry,
            cache.clone(),
            ScriptedPinger::new([true]),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );
        prober.run_cycle().await;
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn host_set_change_restarts_cadence_without_duplicate_timers() {
        /// Counts probes per host, always answering online.
        struct RecordingPinger {
            counts: Mutex<std::collections::HashMap<HostId, usize>>,
        }

        #[async_trait]
        impl Pinger for RecordingPinger {
            async fn check_reachable(&self, host: &Host) -> bool {
                *self.counts.lock().entry(host.id).or_insert(0) += 1;
                true
            }
        }

        let registry = temp_registry().await;
        registry.add("desk".into(), "10.0.0.1".into(), 9876, None).await.unwrap();
        let cache = StatusCache::new();
        let pinger = Arc::new(RecordingPinger { counts: Mutex::new(Default::default()) });

        let interval = Duration::from_millis(40);
        let prober = Prober::new(
            registry.clone(),
            cache.clone(),
            pinger.clone(),
            interval,
            Duration::from_millis(20),
        );
        let handle = prober.spawn();

        // Let a few cycles of the original cadence run.
        tokio::time::sleep(Duration::from_millis(140)).await;
        let before_change = *pinger.counts.lock().get(&1).unwrap_or(&0);
        assert!(before_change >= 2, "loop never reached steady cadence");

        registry.add("nas".into(), "10.0.0.2".into(), 9876, None).await.unwrap();

        // The change-observing tick probes the grown set in a fresh cycle.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        assert_eq!(cache.get(2), Some(true), "new host was never probed");

        // A clean restart means each post-change cycle probes both hosts
        // exactly once. A leftover timer from the old cadence would keep
        // probing host 1 on its own, pushing the counts apart.
        let counts = pinger.counts.lock();
        let host1_after = *counts.get(&1).unwrap_or(&0) - before_change;
        let host2 = *counts.get(&2).unwrap_or(&0);
        assert!(
            host1_after.abs_diff(host2) <= 1,
            "cadence restarted dirty: host1 probed {host1_after}x, host2 {host2}x after the change"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overrunning_cycles_stay_sequential() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Slower than the cadence; tracks how many probes are in
        /// flight at once.
        struct SlowPinger {
            in_flight: AtomicUsize,
            max_in_flight: AtomicUsize,
            cycles: AtomicUsize,
        }

        #[async_trait]
        impl Pinger for SlowPinger {
            async fn check_reachable(&self, _host: &Host) -> bool {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(90)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.cycles.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let registry = temp_registry().await;
        registry.add("desk".into(), "10.0.0.1".into(), 9876, None).await.unwrap();
        let pinger = Arc::new(SlowPinger {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cycles: AtomicUsize::new(0),
        });

        // Every cycle overruns the 30ms cadence threefold.
        let prober = Prober::new(
            registry,
            StatusCache::new(),
            pinger.clone(),
            Duration::from_millis(30),
            Duration::from_millis(300),
        );
        let handle = prober.spawn();
        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.stop().await;

        assert!(
            pinger.cycles.load(Ordering::SeqCst) >= 2,
            "overrunning loop stopped cycling"
        );
        // With a single host, more than one probe in flight can only
        // mean two cycles overlapped.
        assert_eq!(pinger.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_loop_stops_on_shutdown() {
        let registry = temp_registry().await;
        let cache = StatusCache::new();
        let prober = Prober::new(
            registry,
            cache,
            ScriptedPinger::new([]),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let handle = prober.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("probe loop did not stop");
    }
}
