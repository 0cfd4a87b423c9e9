//! Scripted HTTP transport shared by the behaviour tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ferroscreen_core::{HttpClient, HttpError, HttpRequest, HttpResponse};
use serde_json::{json, Value};

/// What the fake upstream does with one request.
pub struct Reply {
    pub delay: Duration,
    pub outcome: Result<HttpResponse, HttpError>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(HttpResponse::new(status, body.to_string().into_bytes())),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn response(response: HttpResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(response),
        }
    }

    pub fn error(error: HttpError) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = Box<dyn Fn(&HttpRequest, usize) -> Reply + Send + Sync>;

/// Records every request and answers through a closure of (request, call index).
pub struct ScriptedHttpClient {
    responder: Responder,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedHttpClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest, usize) -> Reply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answers with `(status, body)` pairs in order, repeating the last one.
    pub fn sequence(replies: Vec<(u16, Value)>) -> Self {
        assert!(!replies.is_empty(), "a sequence needs at least one reply");
        Self::new(move |_, call| {
            let (status, body) = &replies[call.min(replies.len() - 1)];
            Reply::json(*status, body.clone())
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .clone()
    }

    pub fn request_bodies(&self) -> Vec<Value> {
        self.requests()
            .iter()
            .map(|request| {
                serde_json::from_str(&request.body)
                    .expect("request body should be JSON")
            })
            .collect()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.responder)(&request, call);
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request);

        Box::pin(async move {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reply.outcome
        })
    }
}

/// Parsed JSON body of a request.
pub fn body_of(request: &HttpRequest) -> Value {
    serde_json::from_str(&request.body).expect("JSON body")
}

/// `stockCodes` of a request body.
pub fn codes_of(request: &HttpRequest) -> Vec<String> {
    body_of(request)["stockCodes"]
        .as_array()
        .map(|codes| {
            codes
                .iter()
                .filter_map(|code| code.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// A `{total, data}` body with one minimal record per code.
pub fn echo_codes(codes: &[String]) -> Value {
    let data: Vec<Value> = codes.iter().map(|code| json!({ "stockCode": code })).collect();
    json!({ "total": data.len(), "data": data })
}

pub fn codes(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|index| format!("{index:05}")).collect()
}
