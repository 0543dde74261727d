use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::Mutex;

use crate::models::Log;
use crate::request::RequestUnit;
use crate::transport::{Transport, TransportError};

pub const METRIC_1: &str = "cpu.load.short,host=server01,region=cn value=0.6 1672321328000000000";
pub const METRIC_2: &str = "cpu.load.short,host=server01,region=cn value=0.2 1672321358000000000";

pub fn weather_log(value: &str, time_nano: &str) -> Log {
    Log::new(&[
        ("__time_nano__", time_nano),
        ("__name__", "weather"),
        ("__labels__", "location#$#hangzhou|province#$#zhejiang"),
        ("__value__", value),
    ])
}

/// Accepts everything with 200 and keeps what it was sent.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<RequestUnit>>>,
}

impl RecordingTransport {
    pub async fn requests(&self) -> Vec<RequestUnit> {
        self.sent.lock().await.clone()
    }

    pub async fn bodies(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|u| String::from_utf8_lossy(&u.body).into_owned())
            .collect()
    }
}

impl Transport for RecordingTransport {
    async fn send(
        &self,
        request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        self.sent.lock().await.push(request.clone());
        Ok(StatusCode::OK)
    }
}

/// Plays back a fixed script of outcomes, then answers 200.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<StatusCode, Duration>>>>,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedTransport {
    /// `Err(d)` entries simulate a timeout after `d`.
    pub fn new(script: Vec<Result<StatusCode, Duration>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(after)) => Err(TransportError::Timeout(after)),
            None => Ok(StatusCode::OK),
        }
    }
}

/// Always answers with the same status.
#[derive(Clone)]
pub struct FailingTransport {
    pub status: StatusCode,
    pub calls: Arc<AtomicU32>,
}

impl FailingTransport {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for FailingTransport {
    async fn send(
        &self,
        _request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

/// Fails requests whose URL contains `needle`, accepts the rest.
#[derive(Clone)]
pub struct SelectiveTransport {
    pub needle: &'static str,
    pub delivered: Arc<AtomicUsize>,
}

impl Transport for SelectiveTransport {
    async fn send(
        &self,
        request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        if request.url.as_str().contains(self.needle) {
            return Ok(StatusCode::INTERNAL_SERVER_ERROR);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(StatusCode::OK)
    }
}

/// Takes `delay` per request and tracks peak concurrency.
#[derive(Clone)]
pub struct SlowTransport {
    pub delay: Duration,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Transport for SlowTransport {
    async fn send(
        &self,
        _request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(StatusCode::OK)
    }
}

/// Panics on requests whose URL contains `needle`; the rest take `delay`
/// and count as delivered.
#[derive(Clone)]
pub struct PanickingTransport {
    pub needle: &'static str,
    pub delay: Duration,
    pub delivered: Arc<AtomicUsize>,
}

impl Transport for PanickingTransport {
    async fn send(
        &self,
        request: &RequestUnit,
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        if request.url.as_str().contains(self.needle) {
            panic!("transport blew up on {}", request.url);
        }
        tokio::time::sleep(self.delay).await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(StatusCode::OK)
    }
}
