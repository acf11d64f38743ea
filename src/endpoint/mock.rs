//! In-memory endpoint for exercising the bridge without a network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{emit, wait_for_shutdown, Endpoint, Platform};
use crate::common::error::{ConfigError, EndpointError, EndpointResult};
use crate::common::types::{Content, EndpointId, PlatformMessageId, Revision, Update};
use crate::config::types::EndpointConfig;

/// Revision clock start, in unix seconds.
const CLOCK_START: i64 = 1_000_000;

/// Apply-call received by a mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    New(Content),
    Edit(PlatformMessageId, Content),
    Delete(PlatformMessageId),
}

/// How apply-calls answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    Fail,
    /// Never answer.
    Stall,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    behavior: Behavior,
    next_message: u64,
    tick: i64,
    script: Vec<Update>,
}

/// Endpoint double that records apply-calls.
///
/// Clones share state, so a test can keep one clone while the bridge owns another.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    id: EndpointId,
    state: Arc<Mutex<MockState>>,
}

impl MockEndpoint {
    pub fn new(id: u32) -> Self {
        Self {
            id: EndpointId(id),
            state: Arc::default(),
        }
    }

    /// Updates emitted by `listen_updates` before it waits for shutdown.
    pub fn with_script(self, updates: Vec<Update>) -> Self {
        self.state.lock().unwrap().script = updates;
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.state.lock().unwrap().behavior = behavior;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn new_posts(&self) -> Vec<Content> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::New(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(PlatformMessageId, Content)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Edit(id, content) => Some((id, content)),
                _ => None,
            })
            .collect()
    }

    /// Record a call and decide how to answer it. Returns the next revision on success.
    async fn answer(&self, call: MockCall) -> EndpointResult<Revision> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.behavior
        };
        match behavior {
            Behavior::Succeed => Ok(self.tick()),
            Behavior::Fail => Err(EndpointError::Api {
                code: 500,
                description: "mock failure".to_string(),
            }),
            Behavior::Stall => std::future::pending().await,
        }
    }

    fn tick(&self) -> Revision {
        let mut state = self.state.lock().unwrap();
        state.tick += 1;
        Revision::from_unix_seconds(CLOCK_START + state.tick).unwrap()
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn platform(&self) -> Platform {
        Platform::Mock
    }

    async fn initialize(&mut self, _config: &EndpointConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn listen_updates(
        &self,
        mut shutdown: watch::Receiver<bool>,
        updates: mpsc::Sender<Update>,
    ) -> EndpointResult<()> {
        let script = std::mem::take(&mut self.state.lock().unwrap().script);
        for update in script {
            if !emit(&updates, &mut shutdown, update).await {
                return Ok(());
            }
        }
        wait_for_shutdown(&mut shutdown).await;
        Ok(())
    }

    async fn apply_new(&self, content: &Content) -> EndpointResult<(PlatformMessageId, Revision)> {
        let revision = self.answer(MockCall::New(content.clone())).await?;
        let mut state = self.state.lock().unwrap();
        state.next_message += 1;
        let id = PlatformMessageId(format!("m{}-{}", self.id, state.next_message));
        Ok((id, revision))
    }

    async fn apply_edit(&self, id: &PlatformMessageId, content: &Content) -> EndpointResult<Revision> {
        self.answer(MockCall::Edit(id.clone(), content.clone())).await
    }

    async fn apply_delete(&self, id: &PlatformMessageId) -> EndpointResult<()> {
        self.state.lock().unwrap().calls.push(MockCall::Delete(id.clone()));
        Err(EndpointError::Unsupported)
    }
}
