//! A throwaway HTTP server for fetch and registry tests.
//!
//! Serves fixed responses by path on `127.0.0.1`, one request per connection. Routes
//! can require a bearer token (answering `401` otherwise) and carry an ETag, answering
//! `304` to a matching `If-None-Match`. Every request is counted per path.

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const MAX_HEAD: usize = 64 * 1024;

/// A canned response.
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub etag: Option<String>,
    /// Bearer token the request must carry
    pub token: Option<String>,
}

impl Route {
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_type: "application/octet-stream".to_string(),
            etag: None,
            token: None,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self {
            content_type: "application/json".to_string(),
            ..Self::bytes(value.to_string())
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::bytes(Vec::new())
        }
    }

    pub fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, Route>>,
    hits: DashMap<String, usize>,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, &state).await {
                        tracing::debug!(target: "fetch", "Test server connection failed: {:#}", e);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            state,
            task,
        })
    }

    /// Absolute URL for `path` (which starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn route(&self, path: &str, route: Route) {
        self.state.routes.lock().unwrap_or_else(PoisonError::into_inner).insert(path.to_string(), route);
    }

    /// Requests received for `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.get(path).map_or(0, |hits| *hits)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_HEAD {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&head);
    let mut lines = head.split("\r\n");
    let path = lines.next().and_then(|line| line.split_whitespace().nth(1)).unwrap_or("/").to_string();
    let headers: HashMap<String, String> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    *state.hits.entry(path.clone()).or_insert(0) += 1;

    let route = state.routes.lock().unwrap_or_else(PoisonError::into_inner).get(&path).cloned();
    let (status, body, extra) = match route {
        None => (404, Vec::new(), Vec::new()),
        Some(route) => {
            let authorized = route
                .token
                .as_ref()
                .is_none_or(|token| headers.get("authorization") == Some(&format!("Bearer {token}")));
            let fresh = route.etag.is_some() && route.etag.as_ref() == headers.get("if-none-match");
            let mut extra = vec![("content-type".to_string(), route.content_type.clone())];
            if let Some(etag) = &route.etag {
                extra.push(("etag".to_string(), etag.clone()));
            }
            if !authorized {
                (401, Vec::new(), Vec::new())
            } else if fresh {
                (304, Vec::new(), extra)
            } else {
                (route.status, route.body, extra)
            }
        }
    };

    let mut response = format!("HTTP/1.1 {status} {}\r\ncontent-length: {}\r\nconnection: close\r\n", reason(status), body.len());
    for (name, value) in extra {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

const fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
