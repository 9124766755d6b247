//! Minimal HTTP/1.1 server for integration tests.
//!
//! Each route is a pattern plus a canned status and body. A request is answered
//! by the first route whose pattern occurs in the request target; anything else
//! gets 404. Connections are closed after every response.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use kira_pdc_downloader::app::{ProgressEvent, ProgressSink};
use kira_pdc_downloader::domain::FileDescriptor;

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(pattern: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: pattern.to_string(),
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(pattern: &str, status: u16) -> Self {
        Self {
            pattern: pattern.to_string(),
            status,
            body: Vec::new(),
        }
    }
}

pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// Starts a server in a background thread. It runs until the process exits.
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let routes = Arc::new(routes);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    handle(stream, &routes);
                });
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}"),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn handle(mut stream: TcpStream, routes: &[Route]) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 16384];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("");

    let (status, body) = match routes.iter().find(|route| target.contains(&route.pattern)) {
        Some(route) => (route.status, route.body.as_slice()),
        None => (404, &b""[..]),
    };
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        reason(status),
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(body);
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

pub fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

pub fn descriptor(
    pdc_study_id: &str,
    file_id: &str,
    file_name: &str,
    body: &[u8],
    url: String,
) -> FileDescriptor {
    FileDescriptor {
        study_id: format!("{pdc_study_id}-v1"),
        pdc_study_id: pdc_study_id.to_string(),
        file_id: file_id.to_string(),
        file_name: file_name.to_string(),
        file_size: body.len() as u64,
        md5sum: kira_pdc_downloader::checksum::md5_hex(body),
        download_url: url,
    }
}
