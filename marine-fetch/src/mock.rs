use crate::error::FetchError;
use crate::transport::{FetchRequest, RawResponse, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, &'static str),
    Delayed(Duration, u16, &'static str),
    Network(&'static str),
    Hang,
}

/// Scripted transport: pops one reply per call, repeating the last one
/// once the script runs out.
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockTransport {
    pub fn new(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            *last = Some(reply.clone());
            return reply;
        }
        last.clone().unwrap_or(MockReply::Status(200, "{}"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match self.next_reply() {
            MockReply::Status(status, body) => {
                Ok(RawResponse::new(status, vec![], body.as_bytes().to_vec()))
            }
            MockReply::Delayed(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(RawResponse::new(status, vec![], body.as_bytes().to_vec()))
            }
            MockReply::Network(message) => Err(FetchError::Network(message.to_string())),
            MockReply::Hang => futures::future::pending().await,
        }
    }
}
