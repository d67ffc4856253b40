//! Minimal HTTP/1.1 server for end-to-end job tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Reply {
    /// `Content-Length` framed.
    Sized,
    /// `Transfer-Encoding: chunked`, no length announced.
    Chunked,
    /// Reads the request, then never answers.
    Silent,
}

#[derive(Clone)]
struct Route {
    method: &'static str,
    path: &'static str,
    status: u16,
    body: Vec<u8>,
    reply: Reply,
}

/// Serves canned responses per `(method, path)` and records every request.
pub struct MockServer {
    pub url: String,
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<Mutex<Vec<Route>>> = Arc::default();
        let requests: Arc<Mutex<Vec<Recorded>>> = Arc::default();

        let handle = {
            let routes = Arc::clone(&routes);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = Arc::clone(&routes);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let _ = serve(stream, routes, requests).await;
                    });
                }
            })
        };

        Self {
            url: format!("http://127.0.0.1:{port}"),
            routes,
            requests,
            handle,
        }
    }

    /// Registers a canned response.
    pub fn route(
        &self,
        method: &'static str,
        path: &'static str,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> &Self {
        self.add(method, path, status, body.into(), Reply::Sized)
    }

    /// Registers a response sent with chunked transfer encoding.
    pub fn route_chunked(
        &self,
        method: &'static str,
        path: &'static str,
        status: u16,
        body: impl Into<Vec<u8>>,
    ) -> &Self {
        self.add(method, path, status, body.into(), Reply::Chunked)
    }

    /// Registers a route that accepts the request and never responds.
    pub fn route_silent(&self, method: &'static str, path: &'static str) -> &Self {
        self.add(method, path, 0, Vec::new(), Reply::Silent)
    }

    fn add(
        &self,
        method: &'static str,
        path: &'static str,
        status: u16,
        body: Vec<u8>,
        reply: Reply,
    ) -> &Self {
        self.routes.lock().unwrap().push(Route {
            method,
            path,
            status,
            body,
            reply,
        });
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.url)
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Waits until `path` has received `count` requests.
    pub async fn wait_for(&self, path: &str, count: usize) -> Vec<Recorded> {
        for _ in 0..500 {
            let seen = self.requests_to(path);
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} request(s) to {path}");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    stream: TcpStream,
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let body = if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        read_chunked(&mut reader).await?
    } else {
        let len: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        body
    };

    let route = routes
        .lock()
        .unwrap()
        .iter()
        .find(|r| r.method == method && r.path == path)
        .cloned();
    requests.lock().unwrap().push(Recorded {
        method,
        path,
        headers,
        body,
    });

    let (status, body, reply) = match route {
        Some(route) => (route.status, route.body, route.reply),
        None => (404, b"no route".to_vec(), Reply::Sized),
    };

    let mut stream = reader.into_inner();
    match reply {
        Reply::Silent => {
            // Keep the connection open so the client sees no EOF.
            std::future::pending::<()>().await;
        }
        Reply::Sized => {
            let head = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
        }
        Reply::Chunked => {
            let head = format!(
                "HTTP/1.1 {status} Mock\r\nContent-Type: application/octet-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
            );
            stream.write_all(head.as_bytes()).await?;
            for piece in body.chunks(4) {
                stream
                    .write_all(format!("{:x}\r\n", piece.len()).as_bytes())
                    .await?;
                stream.write_all(piece).await?;
                stream.write_all(b"\r\n").await?;
            }
            stream.write_all(b"0\r\n\r\n").await?;
        }
    }
    stream.shutdown().await
}

async fn read_chunked(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        if size == 0 {
            let mut trailer = String::new();
            reader.read_line(&mut trailer).await?;
            return Ok(body);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}
