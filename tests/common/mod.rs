//! Fakes shared by the integration tests. No `screen`, SQLite or network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use warden::approval::{ActionStore, InMemoryActionStore};
use warden::config::{SupervisorConfig, UnitConfig};
use warden::executor::{NoopChangeTracker, OverrideFileChanger};
use warden::health::{ActivitySource, ProbeError, Probes, ProcessProbe, ServiceProbe};
use warden::supervisor::{Collaborators, NullAdvisor};
use warden::types::ServiceState;

/// Sessions are alive or not; `launch` brings a session up when `launch_works`
#[derive(Default)]
pub struct FakeProcesses {
    pub alive: Mutex<HashMap<String, bool>>,
    pub launches: Mutex<Vec<String>>,
    pub launch_works: bool,
}

impl FakeProcesses {
    pub fn new(launch_works: bool) -> Self {
        Self {
            launch_works,
            ..Self::default()
        }
    }

    pub fn set_alive(&self, session: &str, alive: bool) {
        self.alive.lock().unwrap().insert(session.to_string(), alive);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessProbe for FakeProcesses {
    async fn is_alive(&self, session: &str) -> Result<bool, ProbeError> {
        Ok(self.alive.lock().unwrap().get(session).copied().unwrap_or(false))
    }

    async fn terminate(&self, session: &str) -> Result<(), ProbeError> {
        self.set_alive(session, false);
        Ok(())
    }

    async fn launch(&self, session: &str, _directory: &Path, _command: &str) -> Result<(), ProbeError> {
        self.launches.lock().unwrap().push(session.to_string());
        if self.launch_works {
            self.set_alive(session, true);
        }
        Ok(())
    }
}

/// Per-store canned answers
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    pub last_activity: Option<String>,
    pub loss_streak: u32,
    pub settlements: u64,
}

#[derive(Default)]
pub struct FakeActivity {
    pub stores: Mutex<HashMap<PathBuf, FakeStore>>,
    /// The next `last_activity` call panics, once
    pub panic_next: AtomicBool,
}

impl FakeActivity {
    pub fn set(&self, data_path: &Path, store: FakeStore) {
        self.stores.lock().unwrap().insert(data_path.to_path_buf(), store);
    }

    fn get(&self, data_path: &Path) -> Result<FakeStore, ProbeError> {
        self.stores
            .lock()
            .unwrap()
            .get(data_path)
            .cloned()
            .ok_or(ProbeError::NoDataPath)
    }
}

impl ActivitySource for FakeActivity {
    fn last_activity(&self, data_path: &Path) -> Result<Option<String>, ProbeError> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("activity store exploded");
        }
        Ok(self.get(data_path)?.last_activity)
    }

    fn loss_streak(&self, data_path: &Path, _window: usize) -> Result<u32, ProbeError> {
        Ok(self.get(data_path)?.loss_streak)
    }

    fn recent_settlements(&self, data_path: &Path, _lookback_minutes: i64) -> Result<u64, ProbeError> {
        Ok(self.get(data_path)?.settlements)
    }
}

pub struct ReachableService;

#[async_trait]
impl ServiceProbe for ReachableService {
    async fn check(&self, _url: &str) -> ServiceState {
        ServiceState::Reachable { status_code: 200 }
    }
}

/// Everything a test needs to steer the loop from outside
pub struct Harness {
    pub processes: Arc<FakeProcesses>,
    pub activity: Arc<FakeActivity>,
    pub store: Arc<InMemoryActionStore>,
}

impl Harness {
    pub fn new(launch_works: bool) -> Self {
        Self {
            processes: Arc::new(FakeProcesses::new(launch_works)),
            activity: Arc::new(FakeActivity::default()),
            store: Arc::new(InMemoryActionStore::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        let store: Arc<dyn ActionStore> = self.store.clone();
        Collaborators {
            probes: Probes {
                process: self.processes.clone(),
                activity: self.activity.clone(),
                service: Arc::new(ReachableService),
            },
            store,
            parameters: Arc::new(OverrideFileChanger),
            tracker: Arc::new(NoopChangeTracker),
            advisor: Arc::new(NullAdvisor),
        }
    }
}

/// Defaults with no settle delays and a one-second loop sleep
pub fn fast_config() -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.watchdog.restart_settle_secs = 0;
    config.watchdog.launch_settle_secs = 0;
    config.watchdog.loop_sleep_secs = 1;
    config.watchdog.error_backoff_secs = 1;
    config
}

/// A restartable unit rooted at `directory`, with its store at `<directory>/trades.db`
pub fn unit_in(directory: &Path) -> UnitConfig {
    UnitConfig {
        directory: directory.to_path_buf(),
        launch_command: "./run.sh".to_string(),
        data_path: directory.join("trades.db"),
        ..UnitConfig::default()
    }
}

/// RFC 3339 timestamp `secs_ago` seconds in the past
pub fn seconds_ago(secs_ago: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::seconds(secs_ago)).to_rfc3339()
}
