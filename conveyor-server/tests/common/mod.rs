#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conveyor_core::domain::{PipelineId, TaskId};
use conveyor_core::dto::pipeline::CreatePipeline;
use conveyor_core::dto::task::CreateTask;
use conveyor_core::message::SyncMessage;
use conveyor_server::api::AppState;
use conveyor_server::config::{Config, StorageBackend};
use conveyor_server::hub::{Hub, ObserverHandle};
use conveyor_server::repository::{MemoryRepository, Repository, RepositoryTx};

pub struct TestApp {
    pub repo: Arc<MemoryRepository>,
    pub hub: Hub,
    pub state: AppState<MemoryRepository>,
}

pub fn test_config() -> Config {
    Config {
        storage: StorageBackend::Memory,
        ..Config::default()
    }
}

/// Must be called from inside a tokio runtime
pub fn setup() -> TestApp {
    let config = test_config();
    let repo = Arc::new(MemoryRepository::new());
    let hub = Hub::spawn(config.hub_config());
    let state = AppState::new(repo.clone(), hub.clone(), &config);
    TestApp { repo, hub, state }
}

pub fn new_task(name: &str) -> CreateTask {
    CreateTask {
        name: name.to_string(),
        description: String::new(),
    }
}

impl TestApp {
    pub async fn pipeline(&self, name: &str) -> PipelineId {
        self.state
            .pipelines
            .create(CreatePipeline {
                name: name.to_string(),
                description: String::new(),
            })
            .await
            .unwrap()
            .pipeline_id
    }

    pub async fn append(&self, pipeline_id: PipelineId, name: &str) -> TaskId {
        self.state
            .chain
            .append_task(pipeline_id, new_task(name))
            .await
            .unwrap()
            .task_id
    }

    /// `(task, depends_on)` edges in task order
    pub async fn edges(&self, pipeline_id: PipelineId) -> Vec<(TaskId, TaskId)> {
        let mut tx = self.repo.begin().await.unwrap();
        tx.list_edges(pipeline_id).await.unwrap()
    }

    /// `(task, order)` in ascending order
    pub async fn orders(&self, pipeline_id: PipelineId) -> Vec<(TaskId, i32)> {
        let mut tx = self.repo.begin().await.unwrap();
        tx.list_tasks_by_pipeline(pipeline_id)
            .await
            .unwrap()
            .into_iter()
            .map(|task| (task.id, task.order))
            .collect()
    }

    /// Panics unless the edges are exactly one per adjacent pair
    pub async fn assert_chain(&self, pipeline_id: PipelineId) {
        let orders = self.orders(pipeline_id).await;
        let expected: Vec<(TaskId, TaskId)> = orders
            .windows(2)
            .map(|pair| (pair[1].0, pair[0].0))
            .collect();
        assert_eq!(self.edges(pipeline_id).await, expected);

        let mut seen: Vec<i32> = orders.iter().map(|(_, order)| *order).collect();
        seen.dedup();
        assert_eq!(seen.len(), orders.len(), "duplicate order in {:?}", orders);
    }

    /// Subscribes once everything published so far has been delivered
    pub async fn observer(&self) -> ObserverHandle {
        self.hub.flush().await.unwrap();
        self.hub.subscribe().await.unwrap()
    }
}

pub async fn next_message(observer: &mut ObserverHandle) -> SyncMessage {
    tokio::time::timeout(Duration::from_secs(2), observer.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("observer closed")
}

pub async fn next_action(observer: &mut ObserverHandle) -> &'static str {
    next_message(observer).await.action()
}
