//! Common test utilities for the HTTP client tests
//!
//! `MockServer` runs a `tiny_http` server on a background thread, answers
//! requests from a table of canned routes and records everything it
//! receives so tests can assert on paths, query strings and bodies.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tiny_http::{Header, Response, Server};
use url::Url;

/// One request as seen by the mock server
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: Vec<u8>,
    pub authorization: Option<String>,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn has_query(&self, key: &str, value: &str) -> bool {
        self.query
            .split('&')
            .any(|pair| pair == format!("{key}={value}"))
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// Canned response
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: value.to_string().into_bytes(),
            headers: vec![("Content-Type".into(), "application/json".into())],
        }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            headers: vec![("Content-Type".into(), "application/octet-stream".into())],
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

struct Route {
    method: String,
    path: String,
    reply: Reply,
    /// Served for a single request, then skipped
    once: bool,
    used: bool,
}

/// In-process HTTP server for one test
pub struct MockServer {
    url: Url,
    server: Arc<Server>,
    routes: Arc<Mutex<Vec<Route>>>,
    recorded: Arc<Mutex<Vec<Recorded>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind mock server"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("mock server listens on TCP");
        let url = Url::parse(&format!("http://{addr}")).expect("valid mock url");

        let routes: Arc<Mutex<Vec<Route>>> = Arc::default();
        let recorded: Arc<Mutex<Vec<Recorded>>> = Arc::default();
        let handle = {
            let server = Arc::clone(&server);
            let routes = Arc::clone(&routes);
            let recorded = Arc::clone(&recorded);
            std::thread::spawn(move || {
                for mut request in server.incoming_requests() {
                    let (path, query) = match request.url().split_once('?') {
                        Some((p, q)) => (p.to_string(), q.to_string()),
                        None => (request.url().to_string(), String::new()),
                    };
                    let method = request.method().as_str().to_string();
                    let authorization = request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Authorization"))
                        .map(|h| h.value.as_str().to_string());
                    let mut body = Vec::new();
                    let _ = request.as_reader().read_to_end(&mut body);

                    recorded.lock().unwrap().push(Recorded {
                        method: method.clone(),
                        path: path.clone(),
                        query,
                        body,
                        authorization,
                    });

                    let reply = routes
                        .lock()
                        .unwrap()
                        .iter_mut()
                        .find(|r| r.method == method && r.path == path && !r.used)
                        .map(|r| {
                            r.used = r.once;
                            r.reply.clone()
                        })
                        .unwrap_or_else(|| Reply::status(404));
                    let mut response =
                        Response::from_data(reply.body).with_status_code(reply.status);
                    for (name, value) in &reply.headers {
                        let header = Header::from_bytes(name.as_bytes(), value.as_bytes())
                            .expect("valid header");
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            url,
            server,
            routes,
            recorded,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Answer `method path` with `reply`; later routes do not shadow earlier ones
    pub fn route(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.add(method, path, reply, false)
    }

    /// Answer the next `method path` request only; queued replies are served in order
    pub fn route_once(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.add(method, path, reply, true)
    }

    fn add(&self, method: &str, path: &str, reply: Reply, once: bool) -> &Self {
        self.routes.lock().unwrap().push(Route {
            method: method.to_string(),
            path: path.to_string(),
            reply,
            once,
            used: false,
        });
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    /// Requests whose path ends with `suffix`
    pub fn requests_to(&self, suffix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(suffix))
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Midnight UTC on `day` of January 2024
pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

/// Little-endian `u64` array, as `roots_binary` speaks
pub fn le_ids(ids: &[u64]) -> Vec<u8> {
    ids.iter().flat_map(|id| id.to_le_bytes()).collect()
}

pub fn read_le_ids(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}
