use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde_json::{json, Value};
use storefetch::{FetchExecutor, FetchFuture, FetchKey, FetchRequest};
use tokio::time::sleep;

/// Response handed out for one call.
#[derive(Clone)]
pub enum Scripted {
    Payload(Value),
    Failure(&'static str),
}

#[derive(Default)]
struct ScriptState {
    responses: HashMap<FetchKey, VecDeque<Scripted>>,
    latency: HashMap<FetchKey, Duration>,
    calls: HashMap<FetchKey, usize>,
}

/// Executor that replays scripted responses per request key and records how
/// many calls each key received and how many overlapped.
#[derive(Clone)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ScriptState>>,
    default_latency: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new(default_latency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            default_latency,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn script(&self, request: &FetchRequest, responses: Vec<Scripted>) {
        let mut state = self.state.lock().unwrap();
        state
            .responses
            .entry(request.key())
            .or_default()
            .extend(responses);
    }

    pub fn latency(&self, request: &FetchRequest, latency: Duration) {
        self.state
            .lock()
            .unwrap()
            .latency
            .insert(request.key(), latency);
    }

    pub fn calls(&self, request: &FetchRequest) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&request.key())
            .copied()
            .unwrap_or(0)
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl FetchExecutor for ScriptedExecutor {
    fn execute(&self, request: FetchRequest) -> FetchFuture {
        let key = request.key();
        let (response, latency) = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(key.clone()).or_default() += 1;
            let response = state
                .responses
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Scripted::Payload(json!({ "detail": {} })));
            let latency = state
                .latency
                .get(&key)
                .copied()
                .unwrap_or(self.default_latency);
            (response, latency)
        };

        let active = self.active.clone();
        let max_active = self.max_active.clone();
        Box::pin(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            sleep(latency).await;
            active.fetch_sub(1, Ordering::SeqCst);

            match response {
                Scripted::Payload(payload) => Ok(payload),
                Scripted::Failure(message) => Err(anyhow!(message)),
            }
        })
    }
}
