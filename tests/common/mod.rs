//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use beaconmind_assessment::assessment::PhaseRegistry;
use beaconmind_assessment::config::PipeConfig;
use beaconmind_assessment::error::{LangbaseError, LangbaseResult};
use beaconmind_assessment::langbase::Message;
use beaconmind_assessment::oracle::{OracleClient, PipeRunner, PipeTable};
use beaconmind_assessment::pipeline::{PipelineSettings, SessionPipeline};
use beaconmind_assessment::storage::SqliteStorage;

pub const CLASSIFY_PIPE: &str = "assessment-classify-v1";
pub const SCORE_PIPE: &str = "assessment-score-v1";
pub const COMPOSE_PIPE: &str = "assessment-compose-v1";

/// One recorded pipe invocation.
#[derive(Debug, Clone)]
pub struct PipeCall {
    pub pipe: String,
    pub messages: Vec<Message>,
}

/// Pipe runner that replays queued completions in order and records every call.
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Mutex<VecDeque<LangbaseResult<String>>>,
    calls: Mutex<Vec<PipeCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: LangbaseResult<String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a well-formed `{"response": ...}` completion.
    pub fn respond(&self, response: Value) {
        self.push(Ok(json!({ "response": response }).to_string()));
    }

    pub fn classify(&self, verdict: &str) {
        self.respond(json!(verdict));
    }

    pub fn compose(&self, reply: &str) {
        self.respond(json!(reply));
    }

    pub fn fail(&self) {
        self.push(Err(LangbaseError::Unavailable {
            message: "connection refused".to_string(),
            retries: 3,
        }));
    }

    pub fn calls(&self) -> Vec<PipeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, pipe: &str) -> usize {
        self.calls().iter().filter(|c| c.pipe == pipe).count()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl PipeRunner for ScriptedRunner {
    async fn run_pipe(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String> {
        self.calls.lock().unwrap().push(PipeCall {
            pipe: pipe.to_string(),
            messages,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LangbaseError::InvalidResponse {
                    message: format!("no scripted reply for {}", pipe),
                })
            })
    }
}

/// A pipeline over a fresh in-memory database with the default phase sequence.
pub struct Harness {
    pub storage: Arc<SqliteStorage>,
    pub runner: Arc<ScriptedRunner>,
    pub registry: Arc<PhaseRegistry>,
    pub pipeline: Arc<SessionPipeline>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_sequence(&["assessment.phq9", "assessment.gad7", "monitoring"]).await
    }

    pub async fn with_sequence(sequence: &[&str]) -> Self {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let runner = Arc::new(ScriptedRunner::new());
        let registry = Arc::new(PhaseRegistry::with_sequence(sequence).unwrap());
        let pipes = PipeTable::from_config(&PipeConfig::default()).unwrap();
        let pipeline = Arc::new(SessionPipeline::new(
            storage.clone(),
            registry.clone(),
            OracleClient::new(runner.clone(), pipes),
            PipelineSettings::default(),
        ));

        Self {
            storage,
            runner,
            registry,
            pipeline,
        }
    }

    pub fn oracle(&self) -> OracleClient {
        OracleClient::new(
            self.runner.clone(),
            PipeTable::from_config(&PipeConfig::default()).unwrap(),
        )
    }
}
