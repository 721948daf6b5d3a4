//! Fixtures for stage tests

use ads_deploy_core::domain::payload::Payload;
use ads_deploy_core::domain::topology::{PipelineTopology, StageKind};
use ads_deploy_core::dto::status::StatusEvent;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use crate::bus::{Delivery, DeliveryInfo, InMemoryBus, MessageBus};
use crate::config::Config;
use crate::db;
use crate::executioner::{CommandResult, ExecError, Executioner};
use crate::scheduler::RequeueScheduler;
use crate::worker::{PipelineContext, StageError, StageWorker};

/// Executioner answering from a script and recording every command
#[derive(Default)]
pub struct ScriptedExecutioner {
    rules: Vec<(String, i32, String)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` exit with `exit_code` and print `stdout`
    pub fn on(mut self, needle: &str, exit_code: i32, stdout: &str) -> Self {
        self.rules
            .push((needle.to_string(), exit_code, stdout.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executioner for ScriptedExecutioner {
    async fn execute(
        &self,
        command: &str,
        _working_dir: &Path,
        _max_wait: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.calls.lock().unwrap().push(command.to_string());

        let (exit_code, stdout) = self
            .rules
            .iter()
            .find(|(needle, _, _)| command.contains(needle.as_str()))
            .map(|(_, code, out)| (*code, out.clone()))
            .unwrap_or((0, String::new()));

        Ok(CommandResult {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "simulated failure".to_string()
            },
            error: None,
        })
    }
}

/// Deploy home holding the `sandbox` application and a virtualenv
pub fn deploy_home() -> (TempDir, Config) {
    let home = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(home.path().join("sandbox/sandbox")).unwrap();
    std::fs::create_dir_all(home.path().join("python/bin")).unwrap();
    std::fs::write(home.path().join("python/bin/activate"), "").unwrap();

    let mut config = Config::new(home.path());
    config.requeue_delay = Duration::from_millis(50);
    config.retry_delay = Duration::from_millis(10);
    (home, config)
}

/// A wired pipeline context over an in-memory bus and database
pub struct Harness {
    pub bus: Arc<InMemoryBus>,
    pub executioner: Arc<ScriptedExecutioner>,
    pub pool: SqlitePool,
    pub shared: Arc<PipelineContext>,
    pub home: TempDir,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn new(executioner: ScriptedExecutioner) -> Self {
        Self::with_config(executioner, |_| {}).await
    }

    pub async fn with_config(
        executioner: ScriptedExecutioner,
        adjust: impl FnOnce(&mut Config),
    ) -> Self {
        let (home, mut config) = deploy_home();
        adjust(&mut config);

        let bus = Arc::new(InMemoryBus::new(config.topology.exchange.clone()));
        for (topic, durable) in config.topology.topics() {
            bus.declare(&topic, durable).await.unwrap();
        }

        let (scheduler, requeue_loop) = RequeueScheduler::new(
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::new(config.topology.clone()),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(requeue_loop.run(shutdown_rx));

        let executioner = Arc::new(executioner);
        let pool = db::test_pool().await;
        let shared = Arc::new(PipelineContext {
            config: Arc::new(config),
            bus: Arc::clone(&bus) as Arc<dyn MessageBus>,
            executioner: Arc::clone(&executioner) as Arc<dyn Executioner>,
            scheduler,
            pool: pool.clone(),
        });

        Self {
            bus,
            executioner,
            pool,
            shared,
            home,
            _shutdown: shutdown_tx,
        }
    }

    pub fn topology(&self) -> &PipelineTopology {
        self.shared.topology()
    }

    pub fn worker(&self, kind: StageKind) -> StageWorker {
        let stage_config = self.topology().stage(kind).unwrap().clone();
        StageWorker::new(
            super::for_kind(kind),
            stage_config,
            Arc::clone(&self.shared),
        )
    }

    /// Runs one payload through a stage without going through the queue
    pub async fn run(&self, kind: StageKind, payload: &Payload) -> Result<(), StageError> {
        self.run_raw(kind, payload.to_vec()).await
    }

    pub async fn run_raw(&self, kind: StageKind, body: Vec<u8>) -> Result<(), StageError> {
        let worker = self.worker(kind);
        let delivery = Delivery {
            info: DeliveryInfo {
                tag: 0,
                topic: worker.stage_config().subscribe.clone(),
                redelivered: false,
                persistent: true,
                attempt: 1,
            },
            body,
        };
        worker.process_delivery(&delivery).await
    }

    /// Everything currently queued on `topic`
    pub async fn drain(&self, topic: &str) -> Vec<Vec<u8>> {
        let mut subscription = self.bus.subscribe(topic).await.unwrap();
        let mut bodies = Vec::new();
        while let Some(delivery) = subscription.try_next() {
            self.bus.ack(&delivery).await.unwrap();
            bodies.push(delivery.body);
        }
        bodies
    }

    pub async fn payloads(&self, topic: &str) -> Vec<Payload> {
        self.drain(topic)
            .await
            .iter()
            .map(|body| Payload::from_slice(body).unwrap())
            .collect()
    }

    pub async fn statuses(&self, topic: &str) -> Vec<StatusEvent> {
        self.drain(topic)
            .await
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }
}
