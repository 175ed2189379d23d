//! Test doubles: a scripted gateway that records every call and an audit
//! sink that keeps emitted events in memory.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::GatewayError;
use crate::gateway::{
    ContainerGateway, ContainerHandle, ContainerSpec, ExitStatus, LogFrame, LogStream,
    PullProgress, PullStream,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const SCRIPTED_CONTAINER_ID: &str = "scripted-container";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    ImageExists(String),
    Pull(String),
    Create(ContainerSpec),
    Start(String),
    Wait(String),
    Logs(String),
    Remove(String),
}

#[derive(Debug, Clone)]
enum WaitScript {
    Exit(i64),
    ExitAfter(Duration, i64),
    Fail(String),
    Hang,
}

/// Gateway whose every answer is configured up front.
///
/// Defaults describe a clean run: image pulls, container `scripted-container`
/// is created, started, exits 0 and writes nothing.
#[derive(Debug)]
pub struct ScriptedGateway {
    image_exists: bool,
    pull: Vec<Result<PullProgress, String>>,
    create: Result<String, String>,
    start: Result<(), String>,
    wait: WaitScript,
    logs: Vec<Result<LogFrame, String>>,
    remove: Result<(), String>,
    remove_delay: Duration,
    removals_completed: AtomicUsize,
    calls: Mutex<Vec<GatewayCall>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            image_exists: false,
            pull: vec![Ok(PullProgress {
                id: None,
                status: Some("Pulling from library".to_string()),
            })],
            create: Ok(SCRIPTED_CONTAINER_ID.to_string()),
            start: Ok(()),
            wait: WaitScript::Exit(0),
            logs: Vec::new(),
            remove: Ok(()),
            remove_delay: Duration::ZERO,
            removals_completed: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_exists(mut self, exists: bool) -> Self {
        self.image_exists = exists;
        self
    }

    /// Pull request itself is rejected
    pub fn fail_pull(mut self, message: &str) -> Self {
        self.pull = vec![Err(message.to_string())];
        self
    }

    /// Pull starts, then reports an error mid-stream
    pub fn fail_pull_midway(mut self, message: &str) -> Self {
        self.pull.push(Err(message.to_string()));
        self
    }

    pub fn fail_create(mut self, message: &str) -> Self {
        self.create = Err(message.to_string());
        self
    }

    pub fn fail_start(mut self, message: &str) -> Self {
        self.start = Err(message.to_string());
        self
    }

    pub fn exit_with(mut self, code: i64) -> Self {
        self.wait = WaitScript::Exit(code);
        self
    }

    /// Container runs for `delay` before exiting with `code`
    pub fn exit_after(mut self, delay: Duration, code: i64) -> Self {
        self.wait = WaitScript::ExitAfter(delay, code);
        self
    }

    pub fn fail_wait(mut self, message: &str) -> Self {
        self.wait = WaitScript::Fail(message.to_string());
        self
    }

    /// Container never stops on its own
    pub fn hang_wait(mut self) -> Self {
        self.wait = WaitScript::Hang;
        self
    }

    pub fn with_stdout(mut self, text: &str) -> Self {
        self.logs.push(Ok(LogFrame::Stdout(text.as_bytes().to_vec())));
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.logs.push(Ok(LogFrame::Stderr(text.as_bytes().to_vec())));
        self
    }

    pub fn with_frame(mut self, frame: LogFrame) -> Self {
        self.logs.push(Ok(frame));
        self
    }

    /// Log stream breaks after whatever frames were scripted so far
    pub fn fail_logs(mut self, message: &str) -> Self {
        self.logs.push(Err(message.to_string()));
        self
    }

    pub fn fail_remove(mut self, message: &str) -> Self {
        self.remove = Err(message.to_string());
        self
    }

    /// Engine takes `delay` to answer each remove request
    pub fn slow_remove(mut self, delay: Duration) -> Self {
        self.remove_delay = delay;
        self
    }

    /// Remove requests the engine finished answering
    pub fn completed_removals(&self) -> usize {
        self.removals_completed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remove_count(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Remove(_)))
    }

    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, GatewayCall::Create(_)))
    }

    /// Calls other than the image existence probe
    pub fn lifecycle_calls(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, GatewayCall::ImageExists(_)))
            .collect()
    }

    fn count(&self, predicate: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerGateway for ScriptedGateway {
    async fn image_exists(&self, image: &str) -> bool {
        self.record(GatewayCall::ImageExists(image.to_string()));
        self.image_exists
    }

    fn pull(&self, image: &str) -> PullStream {
        self.record(GatewayCall::Pull(image.to_string()));
        let items: Vec<_> = self
            .pull
            .iter()
            .cloned()
            .map(|item| item.map_err(GatewayError::Engine))
            .collect();
        stream::iter(items).boxed()
    }

    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, GatewayError> {
        self.record(GatewayCall::Create(spec));
        self.create
            .clone()
            .map(ContainerHandle::new)
            .map_err(GatewayError::Engine)
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), GatewayError> {
        self.record(GatewayCall::Start(handle.id().to_string()));
        self.start.clone().map_err(GatewayError::Engine)
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, GatewayError> {
        self.record(GatewayCall::Wait(handle.id().to_string()));
        match &self.wait {
            WaitScript::Exit(code) => Ok(ExitStatus { code: *code }),
            WaitScript::ExitAfter(delay, code) => {
                tokio::time::sleep(*delay).await;
                Ok(ExitStatus { code: *code })
            }
            WaitScript::Fail(message) => Err(GatewayError::engine(message.clone())),
            WaitScript::Hang => std::future::pending().await,
        }
    }

    fn logs(&self, handle: &ContainerHandle) -> LogStream {
        self.record(GatewayCall::Logs(handle.id().to_string()));
        let items: Vec<_> = self
            .logs
            .iter()
            .cloned()
            .map(|item| item.map_err(GatewayError::Engine))
            .collect();
        stream::iter(items).boxed()
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), GatewayError> {
        self.record(GatewayCall::Remove(handle.id().to_string()));
        if !self.remove_delay.is_zero() {
            tokio::time::sleep(self.remove_delay).await;
        }
        self.removals_completed.fetch_add(1, Ordering::SeqCst);
        self.remove.clone().map_err(GatewayError::Engine)
    }
}

/// Keeps every emitted audit event
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
