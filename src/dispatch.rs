//! Single-flight power command dispatch.
//!
//! One lock per command class (wake, shutdown): while a command of a
//! class is in flight or cooling down, further commands of that class
//! are rejected with `Busy` — never queued, never retried. The two
//! classes are independent, so a wake for host A does not block a
//! shutdown for host B. Lock state is process-lifetime and in-memory.

use crate::errors::{classify_error, ErrorKind};
use crate::models::{Host, HostId};
use crate::registry::SharedHostRegistry;
use crate::state::{new_state, Shared};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Wake,
    Shutdown,
}

impl CommandClass {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandClass::Wake => "wake",
            CommandClass::Shutdown => "shutdown",
        }
    }
}

/// Result of a dispatch call. `Busy` is returned synchronously without
/// touching the network; failures arrive pre-classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Busy,
    Failure(ErrorKind),
}

/// The wake/shutdown primitives, trait-seamed so tests can stub the
/// network side.
#[async_trait]
pub trait PowerCommander: Send + Sync {
    async fn send_wake(&self, host: &Host) -> anyhow::Result<()>;
    async fn send_shutdown(&self, host: &Host) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Idle,
    InFlight { host_id: HostId },
    CoolingDown { host_id: HostId },
}

#[derive(Debug)]
struct ClassLock {
    state: LockState,
    // Bumped on every acquisition so a late cool-down timer can never
    // clear a newer flight.
    epoch: u64,
}

impl ClassLock {
    fn new() -> Shared<ClassLock> {
        new_state(ClassLock { state: LockState::Idle, epoch: 0 })
    }
}

pub struct CommandDispatcher {
    registry: SharedHostRegistry,
    commander: Arc<dyn PowerCommander>,
    cooldown: Duration,
    wake_lock: Shared<ClassLock>,
    shutdown_lock: Shared<ClassLock>,
}

pub type SharedDispatcher = Arc<CommandDispatcher>;

impl CommandDispatcher {
    pub fn new(
        registry: SharedHostRegistry,
        commander: Arc<dyn PowerCommander>,
        cooldown: Duration,
    ) -> SharedDispatcher {
        Arc::new(Self {
            registry,
            commander,
            cooldown,
            wake_lock: ClassLock::new(),
            shutdown_lock: ClassLock::new(),
        })
    }

    fn lock_for(&self, class: CommandClass) -> &Shared<ClassLock> {
        match class {
            CommandClass::Wake => &self.wake_lock,
            CommandClass::Shutdown => &self.shutdown_lock,
        }
    }

    /// Executes one power command against one host.
    ///
    /// State machine per class: Idle -> InFlight -> CoolingDown -> Idle,
    /// the last transition driven by a timer, not by a caller.
    pub async fn dispatch(&self, class: CommandClass, host_id: HostId) -> Outcome {
        let Some(host) = self.registry.get(host_id).await else {
            return Outcome::Failure(ErrorKind::HostNotFound);
        };

        // Acquire, or reject immediately.
        {
            let mut lock = self.lock_for(class).lock();
            if lock.state != LockState::Idle {
                return Outcome::Busy;
            }
            lock.state = LockState::InFlight { host_id };
            lock.epoch += 1;
        }

        let command_id = Uuid::new_v4();
        info!("dispatch {command_id}: {} host {} ({})", class.as_str(), host.id, host.name);

        let result = match class {
            CommandClass::Wake => self.commander.send_wake(&host).await,
            CommandClass::Shutdown => self.commander.send_shutdown(&host).await,
        };

        let outcome = match result {
            Ok(()) => {
                info!("dispatch {command_id}: ok");
                Outcome::Success
            }
            Err(e) => {
                let kind = classify_error(&e);
                warn!("dispatch {command_id}: failed ({kind:?}): {e:#}");
                Outcome::Failure(kind)
            }
        };

        self.enter_cooldown(class, host_id);
        outcome
    }

    /// Moves the class lock to CoolingDown and schedules the automatic
    /// return to Idle. Success and failure cool down alike, absorbing
    /// double-press UI triggers.
    fn enter_cooldown(&self, class: CommandClass, host_id: HostId) {
        let shared = self.lock_for(class).clone();
        let epoch = {
            let mut lock = shared.lock();
            lock.state = LockState::CoolingDown { host_id };
            lock.epoch
        };

        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let mut lock = shared.lock();
            if lock.epoch == epoch {
                lock.state = LockState::Idle;
            }
        });
    }

    /// Currently locked host for a class, exposed for status displays.
    pub fn active_host(&self, class: CommandClass) -> Option<HostId> {
        match self.lock_for(class).lock().state {
            LockState::Idle => None,
            LockState::InFlight { host_id } | LockState::CoolingDown { host_id } => Some(host_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    async fn registry_with_hosts(n: u32) -> SharedHostRegistry {
        let path =
            std::env::temp_dir().join(format!("lanward-dispatch-{}.json", Uuid::new_v4()));
        let reg = Arc::new(HostRegistry::new(path.to_str().unwrap()));
        for i in 1..=n {
            reg.add(format!("host-{i}"), format!("10.0.0.{i}"), 9876, None).await.unwrap();
        }
        reg
    }

    /// Wake blocks until the test releases the gate; shutdown returns
    /// immediately. Both count their invocations.
    struct GatedCommander {
        wake_calls: AtomicUsize,
        shutdown_calls: AtomicUsize,
        gate: tokio::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl GatedCommander {
        fn new() -> (Arc<Self>, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel(4);
            let me = Arc::new(Self {
                wake_calls: AtomicUsize::new(0),
                shutdown_calls: AtomicUsize::new(0),
                gate: tokio::sync::Mutex::new(rx),
            });
            (me, tx)
        }
    }

    #[async_trait]
    impl PowerCommander for GatedCommander {
        async fn send_wake(&self, _host: &Host) -> anyhow::Result<()> {
            self.wake_calls.fetch_add(1, Ordering::SeqCst);
            self.gate.lock().await.recv().await;
            Ok(())
        }

        async fn send_shutdown(&self, _host: &Host) -> anyhow::Result<()> {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingCommander(&'static str);

    #[async_trait]
    impl PowerCommander for FailingCommander {
        async fn send_wake(&self, _host: &Host) -> anyhow::Result<()> {
            Err(anyhow::anyhow!(self.0))
        }

        async fn send_shutdown(&self, _host: &Host) -> anyhow::Result<()> {
            Err(anyhow::anyhow!(self.0))
        }
    }

    #[tokio::test]
    async fn second_wake_is_rejected_while_first_is_in_flight() {
        let registry = registry_with_hosts(2).await;
        let (commander, release) = GatedCommander::new();
        let dispatcher =
            CommandDispatcher::new(registry, commander.clone(), Duration::from_millis(10));

        let d = dispatcher.clone();
        let first = tokio::spawn(async move { d.dispatch(CommandClass::Wake, 1).await });
        // Let the first dispatch reach the blocked primitive.
        while commander.wake_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.dispatch(CommandClass::Wake, 2).await, Outcome::Busy);
        assert_eq!(commander.wake_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.active_host(CommandClass::Wake), Some(1));

        release.send(()).await.unwrap();
        assert_eq!(first.await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn wake_and_shutdown_locks_are_independent() {
        let registry = registry_with_hosts(2).await;
        let (commander, release) = GatedCommander::new();
        let dispatcher =
            CommandDispatcher::new(registry, commander.clone(), Duration::from_millis(10));

        let d = dispatcher.clone();
        let wake = tokio::spawn(async move { d.dispatch(CommandClass::Wake, 2).await });
        while commander.wake_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Shutdown of another host proceeds while the wake is in flight.
        assert_eq!(dispatcher.dispatch(CommandClass::Shutdown, 1).await, Outcome::Success);
        assert_eq!(commander.shutdown_calls.load(Ordering::SeqCst), 1);

        release.send(()).await.unwrap();
        assert_eq!(wake.await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn cooldown_rejects_then_releases() {
        let registry = registry_with_hosts(1).await;
        let (commander, release) = GatedCommander::new();
        release.send(()).await.unwrap();
        release.send(()).await.unwrap();
        let dispatcher =
            CommandDispatcher::new(registry, commander, Duration::from_millis(50));

        assert_eq!(dispatcher.dispatch(CommandClass::Wake, 1).await, Outcome::Success);

        // Still cooling down: rejected without invoking the primitive.
        assert_eq!(dispatcher.dispatch(CommandClass::Wake, 1).await, Outcome::Busy);
        assert_eq!(dispatcher.active_host(CommandClass::Wake), Some(1));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(dispatcher.active_host(CommandClass::Wake), None);
        assert_eq!(dispatcher.dispatch(CommandClass::Wake, 1).await, Outcome::Success);
    }

    #[tokio::test]
    async fn failures_cool_down_too_and_come_back_classified() {
        let registry = registry_with_hosts(1).await;
        let dispatcher = CommandDispatcher::new(
            registry,
            Arc::new(FailingCommander("Connection refused (os error 111)")),
            Duration::from_millis(50),
        );

        assert_eq!(
            dispatcher.dispatch(CommandClass::Shutdown, 1).await,
            Outcome::Failure(ErrorKind::AgentNotRunning)
        );
        // The failed flight still holds the class through its cool-down.
        assert_eq!(dispatcher.dispatch(CommandClass::Shutdown, 1).await, Outcome::Busy);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            dispatcher.dispatch(CommandClass::Shutdown, 1).await,
            Outcome::Failure(ErrorKind::AgentNotRunning)
        );
    }

    #[tokio::test]
    async fn unknown_host_fails_without_taking_the_lock() {
        let registry = registry_with_hosts(1).await;
        let (commander, release) = GatedCommander::new();
        release.send(()).await.unwrap();
        let dispatcher =
            CommandDispatcher::new(registry, commander, Duration::from_millis(10));

        assert_eq!(
            dispatcher.dispatch(CommandClass::Wake, 99).await,
            Outcome::Failure(ErrorKind::HostNotFound)
        );
        // The lock stayed Idle, so a real host dispatch goes straight through.
        assert_eq!(dispatcher.dispatch(CommandClass::Wake, 1).await, Outcome::Success);
    }
}
