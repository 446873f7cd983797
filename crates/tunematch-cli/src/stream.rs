//! Websocket streaming client with reconnection
//!
//! Sends PCM chunks to a tunematch server and hands every decoded event to a
//! callback. A dropped connection is retried with backoff and streaming
//! resumes at the first chunk that was not sent; the server treats the
//! reconnect as a new session.

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tunematch_core::audio::encode_pcm_s16le;
use tunematch_core::client::{BackoffPolicy, ClientAction, ClientEvent, ReconnectMachine};
use tunematch_core::ServerEvent;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub url: String,
    pub chunk_samples: usize,
    /// Pause after each chunk; `None` sends as fast as the socket allows
    pub pace: Option<Duration>,
    /// Stop waiting for results after this much silence from the server
    pub drain_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl StreamOptions {
    pub fn new(url: &str, sample_rate: u32) -> Self {
        Self {
            url: url.to_string(),
            chunk_samples: sample_rate as usize,
            pace: None,
            drain_timeout: Duration::from_secs(3),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub sessions: u32,
    pub chunks_sent: usize,
    pub events: usize,
}

/// Stream `samples` until every chunk is sent and the server goes quiet
pub async fn stream_samples<F>(
    samples: &[f32],
    options: &StreamOptions,
    mut on_event: F,
) -> Result<StreamReport>
where
    F: FnMut(&ServerEvent),
{
    let chunks: Vec<Vec<u8>> = samples
        .chunks(options.chunk_samples.max(1))
        .map(encode_pcm_s16le)
        .collect();

    let mut report = StreamReport::default();
    let mut machine = ReconnectMachine::new(options.backoff);
    let mut action = machine.handle(ClientEvent::Start)?;
    let mut connection = None;

    loop {
        action = match action {
            ClientAction::Connect => {
                match tokio_tungstenite::connect_async(options.url.as_str()).await {
                    Ok((ws, _)) => {
                        log::info!("Connected to {}", options.url);
                        report.sessions += 1;
                        connection = Some(ws);
                        machine.handle(ClientEvent::Connected)?
                    }
                    Err(e) => {
                        log::warn!("Connection to {} failed: {}", options.url, e);
                        machine.handle(ClientEvent::ConnectFailed)?
                    }
                }
            }
            ClientAction::Wait(delay) => {
                log::info!("Reconnecting in {:?}", delay);
                tokio::time::sleep(delay).await;
                machine.handle(ClientEvent::BackoffElapsed)?
            }
            ClientAction::Stream => {
                let Some(ws) = connection.take() else {
                    return Err(anyhow!("streaming without a connection"));
                };
                match run_connection(ws, &chunks, &mut report, options, &mut on_event).await {
                    Ok(()) => machine.handle(ClientEvent::Stop)?,
                    Err(e) => {
                        log::warn!("Connection lost after {} chunks: {}", report.chunks_sent, e);
                        machine.handle(ClientEvent::Disconnected)?
                    }
                }
            }
            ClientAction::GiveUp => {
                anyhow::bail!(
                    "Giving up on {} after {} failed attempts",
                    options.url,
                    options.backoff.max_attempts
                );
            }
            ClientAction::Shutdown => break,
        };
    }

    Ok(report)
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_connection<F>(
    ws: WsStream,
    chunks: &[Vec<u8>],
    report: &mut StreamReport,
    options: &StreamOptions,
    on_event: &mut F,
) -> Result<()>
where
    F: FnMut(&ServerEvent),
{
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<ServerEvent>>();

    let reader = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let event = match message {
                Ok(Message::Text(text)) => match ServerEvent::from_json(&text) {
                    Ok(event) => Ok(event),
                    Err(e) => {
                        log::warn!("Undecodable event: {}", e);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => Err(anyhow!(e)),
            };
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });

    let outcome = async {
        while report.chunks_sent < chunks.len() {
            let chunk = chunks[report.chunks_sent].clone();
            write.send(Message::Binary(chunk.into())).await?;
            report.chunks_sent += 1;

            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        on_event(&event?);
                        report.events += 1;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        anyhow::bail!("server closed the connection")
                    }
                }
            }
            if let Some(pace) = options.pace {
                tokio::time::sleep(pace).await;
            }
        }

        loop {
            match tokio::time::timeout(options.drain_timeout, rx.recv()).await {
                Ok(Some(event)) => {
                    on_event(&event?);
                    report.events += 1;
                }
                Ok(None) => anyhow::bail!("server closed the connection"),
                Err(_) => break,
            }
        }

        let _ = write.send(Message::Close(None)).await;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    reader.abort();
    outcome
}
