//! A scripted stand-in for the Docker daemon, speaking HTTP/1.1 over a Unix socket

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// A request as the daemon saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    /// Lowercased header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    /// Target without the query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    pub fn query(&self) -> &str {
        self.target.split_once('?').map_or("", |(_, query)| query)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// What the daemon sends back
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, Value),
    Text(u16, String),
    /// A `Content-Length` body with the given content type
    Body {
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Chunked encoding, one HTTP chunk per entry, flushed separately
    Chunked {
        content_type: &'static str,
        chunks: Vec<Vec<u8>>,
    },
    /// Chunked, but the body never ends until the client hangs up
    Endless {
        content_type: &'static str,
        chunks: Vec<Vec<u8>>,
    },
    /// Announce `declared` bytes, send `body`, then close the connection
    Truncated { declared: usize, body: Vec<u8> },
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

pub struct FakeDaemon {
    _dir: TempDir,
    socket: PathBuf,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).expect("bind fake daemon");

        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let task = tokio::spawn({
            let connections = Arc::clone(&connections);
            let requests = Arc::clone(&requests);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let handler = Arc::clone(&handler);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, handler, requests).await {
                            eprintln!("fake daemon connection ended: {}", e);
                        }
                    });
                }
            }
        });

        Self {
            _dir: dir,
            socket,
            connections,
            requests,
            task,
        }
    }

    pub fn host(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// The last request whose path ends with `suffix`
    pub fn last_request(&self, suffix: &str) -> Option<Recorded> {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.path().ends_with(suffix))
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: UnixStream,
    handler: Handler,
    requests: Arc<Mutex<Vec<Recorded>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).await?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let length = headers
            .get("content-length")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;

        let request = Recorded {
            method,
            target,
            headers,
            body,
        };
        requests.lock().unwrap().push(request.clone());

        let keep_open = respond(reader.get_mut(), handler(&request)).await?;
        if !keep_open {
            return Ok(());
        }
    }
}

fn head(status: u16, content_type: &str, framing: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nApi-Version: 1.41\r\nServer: Docker/24.0.0 (linux)\r\n{}\r\n",
        status,
        reason(status),
        content_type,
        framing
    )
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

async fn write_chunks(stream: &mut UnixStream, chunks: &[Vec<u8>]) -> std::io::Result<()> {
    for chunk in chunks {
        stream
            .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
            .await?;
        stream.write_all(chunk).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Ok(())
}

/// Write one response, returning whether the connection stays usable
async fn respond(stream: &mut UnixStream, reply: Reply) -> std::io::Result<bool> {
    match reply {
        Reply::Json(status, value) => {
            let body = serde_json::to_vec(&value).unwrap();
            let head = head(
                status,
                "application/json",
                &format!("Content-Length: {}\r\n", body.len()),
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
        }
        Reply::Text(status, text) => {
            let head = head(
                status,
                "text/plain; charset=utf-8",
                &format!("Content-Length: {}\r\n", text.len()),
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(text.as_bytes()).await?;
        }
        Reply::Body { content_type, body } => {
            let head = head(
                200,
                content_type,
                &format!("Content-Length: {}\r\n", body.len()),
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
        }
        Reply::Chunked {
            content_type,
            chunks,
        } => {
            let head = head(200, content_type, "Transfer-Encoding: chunked\r\n");
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;
            write_chunks(stream, &chunks).await?;
            stream.write_all(b"0\r\n\r\n").await?;
        }
        Reply::Endless {
            content_type,
            chunks,
        } => {
            let head = head(200, content_type, "Transfer-Encoding: chunked\r\n");
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;
            write_chunks(stream, &chunks).await?;

            // hold the body open until the client goes away
            let mut sink = [0u8; 64];
            while stream.read(&mut sink).await? > 0 {}
            return Ok(false);
        }
        Reply::Truncated { declared, body } => {
            let head = head(
                200,
                "application/vnd.docker.multiplexed-stream",
                &format!("Content-Length: {}\r\n", declared),
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
            stream.flush().await?;
            stream.shutdown().await?;
            return Ok(false);
        }
    }

    stream.flush().await?;
    Ok(true)
}

/// JSON documents laid out as the daemon streams them, one per line
pub fn json_lines(documents: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for document in documents {
        out.extend(serde_json::to_vec(document).unwrap());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Cut `data` into chunks at `splits`
pub fn split_at(data: &[u8], splits: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for &split in splits {
        chunks.push(data[start..split].to_vec());
        start = split;
    }
    chunks.push(data[start..].to_vec());
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}
