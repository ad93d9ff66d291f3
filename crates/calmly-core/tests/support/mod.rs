#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use calmly_core::sync::{PullPage, PushOperation, PushOutcome, RejectionKind};
use calmly_core::{
    Engine, EngineConfig, EntityType, ManualClock, MemoryRemote, RemoteBackend, RemoteError,
};

/// Scripted misbehaviour for the next push or pull call
#[derive(Debug, Clone)]
pub enum Fault {
    /// The whole call fails
    Fail(RemoteError),
    /// The call hangs for this long before answering normally
    Stall(Duration),
    /// Every operation in the call is rejected
    RejectAll(RejectionKind, String),
    /// The call succeeds on the server but the response is lost
    LoseResponse,
    /// Serve this page instead of asking the server
    Page(PullPage),
}

/// A [`MemoryRemote`] with a queue of injected faults.
#[derive(Clone)]
pub struct FlakyRemote {
    pub server: MemoryRemote,
    push_faults: Arc<Mutex<VecDeque<Fault>>>,
    pull_faults: Arc<Mutex<VecDeque<Fault>>>,
    push_calls: Arc<AtomicUsize>,
    pull_calls: Arc<AtomicUsize>,
}

impl FlakyRemote {
    pub fn new(server: MemoryRemote) -> Self {
        Self {
            server,
            push_faults: Arc::default(),
            pull_faults: Arc::default(),
            push_calls: Arc::default(),
            pull_calls: Arc::default(),
        }
    }

    pub fn on_push(&self, fault: Fault) {
        self.push_faults.lock().unwrap().push_back(fault);
    }

    pub fn on_pull(&self, fault: Fault) {
        self.pull_faults.lock().unwrap().push_back(fault);
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBackend for FlakyRemote {
    async fn push(
        &self,
        entity: EntityType,
        operations: Vec<PushOperation>,
    ) -> Result<Vec<PushOutcome>, RemoteError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.push_faults.lock().unwrap().pop_front();
        match fault {
            None => self.server.push(entity, operations).await,
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                self.server.push(entity, operations).await
            }
            Some(Fault::RejectAll(kind, message)) => Ok(operations
                .iter()
                .map(|op| PushOutcome::Rejected {
                    client_op_id: op.client_op_id,
                    kind,
                    message: message.clone(),
                })
                .collect()),
            Some(Fault::LoseResponse) => {
                self.server.push(entity, operations).await?;
                Err(RemoteError::Transport("connection reset".to_string()))
            }
            Some(Fault::Page(_)) => panic!("page fault scripted for push"),
        }
    }

    async fn pull(
        &self,
        entity: EntityType,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PullPage, RemoteError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.pull_faults.lock().unwrap().pop_front();
        match fault {
            None => self.server.pull(entity, cursor, limit).await,
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                self.server.pull(entity, cursor, limit).await
            }
            Some(Fault::Page(page)) => Ok(page),
            Some(Fault::LoseResponse) => {
                self.server.pull(entity, cursor, limit).await?;
                Err(RemoteError::Transport("connection reset".to_string()))
            }
            Some(Fault::RejectAll(..)) => panic!("rejection scripted for pull"),
        }
    }

    async fn health(&self) -> Result<(), RemoteError> {
        self.server.health().await
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub remote: FlakyRemote,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            probe_interval_secs: 0,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let remote = FlakyRemote::new(MemoryRemote::new(clock.clone()));
        let engine = Engine::in_memory(config, clock.clone(), Some(Arc::new(remote.clone()))).unwrap();
        Self {
            clock,
            remote,
            engine,
        }
    }

    /// A second engine sharing the same backend, as another device would
    pub fn second_device(&self) -> Engine {
        let config = EngineConfig {
            probe_interval_secs: 0,
            ..EngineConfig::default()
        };
        Engine::in_memory(
            config,
            self.clock.clone(),
            Some(Arc::new(self.remote.server.clone())),
        )
        .unwrap()
    }

    pub fn server(&self) -> &MemoryRemote {
        &self.remote.server
    }
}
