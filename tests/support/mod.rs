//! Shared utilities for integration tests: a trickling HTTP server and event helpers.
//!
//! wiremock answers with the whole body at once, which finishes a download
//! before the progress sampler ever ticks. [`start_slow_server`] writes the
//! body in chunks with a pause between them instead.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use download_hub::DownloadEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// How the slow server answers every request.
#[derive(Debug, Clone)]
pub struct SlowResponse {
    pub body: Vec<u8>,
    pub chunk_size: usize,
    pub delay: Duration,
    pub file_name: Option<String>,
    pub send_length: bool,
    /// Close the connection after this many body bytes.
    pub truncate_at: Option<usize>,
}

impl SlowResponse {
    pub fn attachment(file_name: &str, len: usize, chunk_size: usize, delay: Duration) -> Self {
        Self {
            body: (0..len).map(|i| (i % 251) as u8).collect(),
            chunk_size,
            delay,
            file_name: Some(file_name.to_string()),
            send_length: true,
            truncate_at: None,
        }
    }
}

/// Starts the server and returns its base URL.
pub async fn start_slow_server(response: SlowResponse) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind slow server");
    let addr = listener.local_addr().expect("slow server has no address");
    let response = Arc::new(response);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let response = Arc::clone(&response);
            tokio::spawn(async move {
                let _ = serve(socket, &response).await;
            });
        }
    });

    format!("http://{addr}")
}

async fn serve(mut socket: TcpStream, response: &SlowResponse) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let mut head = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n",
    );
    if response.send_length {
        head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    if let Some(name) = &response.file_name {
        head.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{name}\"\r\n"
        ));
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    let limit = response.truncate_at.unwrap_or(response.body.len());
    for chunk in response.body[..limit].chunks(response.chunk_size) {
        socket.write_all(chunk).await?;
        socket.flush().await?;
        tokio::time::sleep(response.delay).await;
    }
    socket.shutdown().await
}

/// Next event, failing the test after ten seconds.
pub async fn next_event(events: &mut broadcast::Receiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a download event")
        .expect("event bus closed")
}

/// Every event up to and including the `DownloadRemoved` of `id`.
pub async fn events_until_removed(
    events: &mut broadcast::Receiver<DownloadEvent>,
    id: &str,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches!(&event, DownloadEvent::DownloadRemoved { id: removed, .. } if removed == id);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Waits for the next `DownloadAdded` and returns the download id.
pub async fn next_added_id(events: &mut broadcast::Receiver<DownloadEvent>) -> String {
    loop {
        if let DownloadEvent::DownloadAdded { download } = next_event(events).await {
            return download.id;
        }
    }
}
