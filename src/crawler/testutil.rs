//! Test utilities: a scripted `DocumentSource`
//!
//! Responses are queued per locator. Each call pops the front of the queue;
//! the last response stays in place and is repeated. Unknown locators answer
//! `NotFound`. Every call is recorded for assertions.

use crate::crawler::{DocumentSource, SourceResponse};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockSource {
    responses: Arc<Mutex<HashMap<String, VecDeque<SourceResponse>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, locator: &str, body: &str) -> Self {
        self.with_response(locator, SourceResponse::Ok(body.to_string()))
    }

    pub fn with_response(self, locator: &str, response: SourceResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, locator: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == locator)
            .count()
    }
}

impl DocumentSource for MockSource {
    async fn get(&self, locator: &str) -> SourceResponse {
        self.calls.lock().unwrap().push(locator.to_string());

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(locator) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(SourceResponse::NotFound),
            None => SourceResponse::NotFound,
        }
    }
}
