//! Raw TCP range server whose first response for each start offset stops
//! partway through the body.
//!
//! wiremock only sends whole bodies, so a transfer served by it can never be
//! interrupted with some bytes already on disk. This server answers HEAD with
//! the length and `Accept-Ranges: bytes`, sends `stall_after` bytes of the
//! first GET for a given range start and then goes quiet, and serves any
//! later request for that start in full.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const STALL: Duration = Duration::from_secs(60);

struct Shared {
    body: Vec<u8>,
    stall_after: usize,
    ranges: Mutex<Vec<String>>,
    stalled: Mutex<HashSet<usize>>,
}

pub struct StallingServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl StallingServer {
    pub async fn start(body: Vec<u8>, stall_after: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            body,
            stall_after,
            ranges: Mutex::new(Vec::new()),
            stalled: Mutex::new(HashSet::new()),
        });
        let accept = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&shared)));
                }
            }
        });
        Self {
            addr,
            shared,
            accept,
        }
    }

    pub fn url(&self, route: &str) -> String {
        format!("http://{}{route}", self.addr)
    }

    /// Range headers received so far, in arrival order.
    pub fn ranges(&self) -> Vec<String> {
        self.shared.ranges.lock().unwrap().clone()
    }
}

impl Drop for StallingServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    let Some(head) = read_head(&mut stream).await else {
        return;
    };
    let mut lines = head.lines();
    let method = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());
    let total = shared.body.len();

    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n"
        );
        let _ = stream.write_all(head.as_bytes()).await;
        return;
    }

    let (start, end, head) = match range {
        Some(header) => {
            shared.ranges.lock().unwrap().push(header.clone());
            let Some((start, end)) = parse_range(&header, total) else {
                let head = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(head.as_bytes()).await;
                return;
            };
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{end}/{total}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                end - start + 1
            );
            (start, end, head)
        }
        None => (
            0,
            total - 1,
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"),
        ),
    };

    let first_for_start = shared.stalled.lock().unwrap().insert(start);
    let slice = &shared.body[start..=end];
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    if first_for_start && slice.len() > shared.stall_after {
        let _ = stream.write_all(&slice[..shared.stall_after]).await;
        let _ = stream.flush().await;
        // Keep the connection open without sending the rest.
        tokio::time::sleep(STALL).await;
        return;
    }
    let _ = stream.write_all(slice).await;
    let _ = stream.flush().await;
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8(buf).ok()
}

fn parse_range(header: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let last = total.checked_sub(1)?;
    let end = if end.trim().is_empty() {
        last
    } else {
        end.trim().parse::<usize>().ok()?.min(last)
    };
    (start <= end).then_some((start, end))
}
