// src/sources/mock.rs
//! Scripted sources for tests and the demo binary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use super::{IpLocation, IpLocator, LocationSensor, SensorError, SensorRequest, SensorResult};

/// Sensor that answers one-shot requests from a script and replays a fixed
/// stream to watchers. An exhausted script answers `UNAVAILABLE`.
#[derive(Default)]
pub struct ScriptedSensor {
    one_shot: Mutex<VecDeque<SensorResult>>,
    stream: Mutex<Vec<SensorResult>>,
    watch_error: Option<SensorError>,
    requests: Mutex<Vec<SensorRequest>>,
    subscriptions: AtomicUsize,
    unsubscriptions: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers for successive one-shot requests.
    pub fn respond_with(self, results: impl IntoIterator<Item = SensorResult>) -> Self {
        self.one_shot
            .lock()
            .expect("scripted sensor mutex poisoned")
            .extend(results);
        self
    }

    /// Items delivered to the next watcher; the stream then stays open.
    pub fn stream_with(self, results: impl IntoIterator<Item = SensorResult>) -> Self {
        self.stream
            .lock()
            .expect("scripted sensor mutex poisoned")
            .extend(results);
        self
    }

    /// Make `watch` fail.
    pub fn refuse_watch(mut self, error: SensorError) -> Self {
        self.watch_error = Some(error);
        self
    }

    /// One-shot requests seen so far.
    pub fn requests(&self) -> Vec<SensorRequest> {
        self.requests
            .lock()
            .expect("scripted sensor mutex poisoned")
            .clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Watchers whose receiver has been dropped.
    pub fn unsubscriptions(&self) -> usize {
        self.unsubscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LocationSensor for ScriptedSensor {
    async fn request_fix(&self, request: SensorRequest) -> SensorResult {
        self.requests
            .lock()
            .expect("scripted sensor mutex poisoned")
            .push(request);
        self.one_shot
            .lock()
            .expect("scripted sensor mutex poisoned")
            .pop_front()
            .unwrap_or(Err(SensorError::Unavailable))
    }

    async fn watch(
        &self,
        _request: SensorRequest,
    ) -> std::result::Result<mpsc::Receiver<SensorResult>, SensorError> {
        if let Some(error) = self.watch_error {
            return Err(error);
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let items = std::mem::take(
            &mut *self
                .stream
                .lock()
                .expect("scripted sensor mutex poisoned"),
        );
        let (tx, rx) = mpsc::channel(items.len().max(1));
        let unsubscriptions = Arc::clone(&self.unsubscriptions);
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            tx.closed().await;
            unsubscriptions.fetch_add(1, Ordering::SeqCst);
        });
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// IP locator answering from a script; an exhausted script fails.
#[derive(Default)]
pub struct ScriptedIpLocator {
    answers: Mutex<VecDeque<std::result::Result<IpLocation, String>>>,
    calls: AtomicUsize,
}

impl ScriptedIpLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(latitude: f64, longitude: f64) -> Self {
        let s = Self::new();
        s.push(Ok(IpLocation {
            latitude,
            longitude,
        }));
        s
    }

    pub fn failing(reason: &str) -> Self {
        let s = Self::new();
        s.push(Err(reason.to_string()));
        s
    }

    pub fn push(&self, answer: std::result::Result<IpLocation, String>) {
        self.answers
            .lock()
            .expect("scripted ip mutex poisoned")
            .push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IpLocator for ScriptedIpLocator {
    async fn lookup(&self) -> Result<IpLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .answers
            .lock()
            .expect("scripted ip mutex poisoned")
            .pop_front();
        match next {
            Some(Ok(loc)) => Ok(loc),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("IP lookup script exhausted")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted-ip"
    }
}
