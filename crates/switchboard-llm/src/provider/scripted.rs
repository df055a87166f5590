//! In-process provider that replays a script, for tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ProviderClient, ProviderStream};
use crate::LlmError;
use crate::normalize::ProviderMessage;
use crate::types::{ChatCompletion, ChoiceMessage, FinishReason, StreamDelta, Usage};

/// One step of a scripted stream
pub enum Step {
    Delta(StreamDelta),
    Fail(LlmError),
    Panic,
    /// Never resolves
    Hang,
    /// Text deltas forever
    Endless,
}

/// Observations shared with the test
#[derive(Clone, Default)]
pub struct Tracker {
    pub recv_calls: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl Tracker {
    pub fn recv_calls(&self) -> usize {
        self.recv_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the worker released the stream
    pub async fn wait_closed(&self) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !self.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("stream was never closed");
    }
}

pub struct ScriptedStream {
    steps: VecDeque<Step>,
    tracker: Tracker,
}

impl ScriptedStream {
    pub fn new(steps: Vec<Step>) -> (Self, Tracker) {
        let tracker = Tracker::default();
        (
            Self {
                steps: steps.into(),
                tracker: tracker.clone(),
            },
            tracker,
        )
    }
}

#[async_trait]
impl ProviderStream for ScriptedStream {
    async fn recv(&mut self) -> Result<Option<StreamDelta>, LlmError> {
        self.tracker.recv_calls.fetch_add(1, Ordering::SeqCst);

        match self.steps.pop_front() {
            None => Ok(None),
            Some(Step::Delta(delta)) => Ok(Some(delta)),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Panic) => panic!("scripted provider panic"),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Endless) => {
                self.steps.push_front(Step::Endless);
                tokio::task::yield_now().await;
                Ok(Some(StreamDelta::text("x")))
            }
        }
    }

    async fn close(&mut self) {
        self.tracker.closed.store(true, Ordering::SeqCst);
    }
}

/// Client whose stream replays `"He"`, `"llo"`, then a stop
pub struct HelloClient;

pub fn hello_steps() -> Vec<Step> {
    vec![
        Step::Delta(StreamDelta::text("He")),
        Step::Delta(StreamDelta::text("llo").with_finish(FinishReason::Stop)),
    ]
}

#[async_trait]
impl ProviderClient for HelloClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: Vec<ProviderMessage>) -> Result<ChatCompletion, LlmError> {
        let mut completion = ChatCompletion::single(
            String::new(),
            ChoiceMessage::assistant(format!("Hello after {} messages", messages.len())),
            Some(FinishReason::Stop),
            Usage::new(1, 2),
        );
        completion.id = String::new();
        completion.created = 0;
        Ok(completion)
    }

    async fn stream(&self, _messages: Vec<ProviderMessage>) -> Result<Box<dyn ProviderStream>, LlmError> {
        Ok(Box::new(ScriptedStream::new(hello_steps()).0))
    }
}
