//! TCP event feed standing in for the property-change transport.
//!
//! Each client sends one JSON message per line. Accepted messages go to the
//! monitor's event loop over a bounded channel in arrival order, so a status
//! request is answered only after everything the same client sent before it.

use crate::metrics::{FEED_MESSAGES, FEED_REJECTED};
use crate::protocol::{FeedMessage, StatusMsg};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub struct FeedConfig {
    pub bind_addr: String,
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7100".to_string(),
            channel_capacity: 256,
        }
    }
}

/// What the event loop receives from the feed.
#[derive(Debug)]
pub enum FeedEvent {
    Update(FeedMessage),
    Status(oneshot::Sender<StatusMsg>),
}

pub async fn bind(config: &FeedConfig) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "Event feed listening");
    Ok(listener)
}

/// Accept clients until the event loop drops its receiver.
pub async fn run_feed(listener: TcpListener, events: mpsc::Sender<FeedEvent>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(client_addr = %addr, "Feed client connected");
                    tokio::spawn(handle_client(stream, addr, events.clone()));
                }
                Err(err) => warn!(error = %err, "Feed accept error"),
            },
            _ = events.closed() => break,
        }
    }
    debug!("Event feed stopped");
}

async fn handle_client(stream: TcpStream, addr: SocketAddr, events: mpsc::Sender<FeedEvent>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(client_addr = %addr, "Feed client disconnected");
                return;
            }
            Err(err) => {
                warn!(client_addr = %addr, error = %err, "Feed read error");
                return;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg = match FeedMessage::parse(trimmed) {
            Ok(msg) => msg,
            Err(e) => {
                FEED_REJECTED.inc();
                warn!(client_addr = %addr, error = %e, "Rejected feed line");
                continue;
            }
        };
        FEED_MESSAGES.inc();

        if msg == FeedMessage::Status {
            let (reply_tx, reply_rx) = oneshot::channel();
            if events.send(FeedEvent::Status(reply_tx)).await.is_err() {
                return;
            }
            let Ok(status) = reply_rx.await else {
                return;
            };
            let Ok(mut out) = serde_json::to_string(&status) else {
                continue;
            };
            out.push('\n');
            if let Err(err) = writer.write_all(out.as_bytes()).await {
                warn!(client_addr = %addr, error = %err, "Feed write error");
                return;
            }
        } else if events.send(FeedEvent::Update(msg)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn forwards_lines_in_order_and_skips_garbage() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(run_feed(listener, tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"{\"type\":\"power\",\"on\":true}\nnot json\n\n{\"type\":\"tach\",\"sensor\":\"fan0_0\",\"value\":900}\n",
            )
            .await
            .unwrap();

        match rx.recv().await {
            Some(FeedEvent::Update(FeedMessage::Power(p))) => assert!(p.on),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await {
            Some(FeedEvent::Update(FeedMessage::Tach(t))) => assert_eq!(t.sensor, "fan0_0"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn answers_status_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(run_feed(listener, tx));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let FeedEvent::Status(reply) = event {
                    let _ = reply.send(StatusMsg::new(false, Vec::new()));
                }
            }
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"type\":\"status\"}\n").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let reply = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(reply.starts_with("{\"type\":\"status\",\"power_on\":false"));
        assert!(reply.ends_with('\n'));
    }
}
