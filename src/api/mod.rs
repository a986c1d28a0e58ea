pub mod command;
pub mod messages;
pub mod route_spec;

pub use command::{Command, PeerSelector, RemoveTarget};
pub use messages::{Direction, Event, EventKind};
pub use route_spec::RouteSpec;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

/// How a subscriber wants its event stream rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

struct SubscriberHandle {
    tx: mpsc::UnboundedSender<String>,
    format: OutputFormat,
}

#[derive(Default)]
struct Subscribers {
    next_id: usize,
    handles: HashMap<usize, SubscriberHandle>,
}

/// The line-based command/event surface. Connections are plain byte
/// streams; each line in is a command, each line out is a reply or event.
/// Connection tasks only shuttle bytes; protocol state stays in the
/// reactor.
pub struct ApiServer {
    command_rx: mpsc::UnboundedReceiver<(usize, String)>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ApiServer {
    pub async fn bind(addr: SocketAddr) -> io::Result<ApiServer> {
        let listener = TcpListener::bind(addr).await?;
        info!("API listening on {}", addr);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        tokio::spawn(accept_loop(listener, command_tx, Arc::clone(&subscribers)));
        Ok(ApiServer {
            command_rx,
            subscribers,
        })
    }

    /// The next command line from any subscriber
    pub async fn next_command(&mut self) -> (usize, String) {
        loop {
            if let Some(command) = self.command_rx.recv().await {
                return command;
            }
        }
    }

    pub fn reply(&self, subscriber: usize, line: String) {
        let subscribers = self.subscribers.lock().expect("subscriber registry");
        if let Some(handle) = subscribers.handles.get(&subscriber) {
            let _ = handle.tx.send(line);
        }
    }

    /// Fan one event out to every connected subscriber in its format
    pub fn broadcast(&self, event: &Event) {
        let subscribers = self.subscribers.lock().expect("subscriber registry");
        let mut json_line: Option<String> = None;
        let mut text_line: Option<String> = None;
        for handle in subscribers.handles.values() {
            let line = match handle.format {
                OutputFormat::Json => {
                    json_line.get_or_insert_with(|| event.to_json().to_string())
                }
                OutputFormat::Text => text_line.get_or_insert_with(|| event.to_text()),
            };
            let _ = handle.tx.send(line.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry")
            .handles
            .len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    command_tx: mpsc::UnboundedSender<(usize, String)>,
    subscribers: Arc<Mutex<Subscribers>>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("API accept failed: {}", err);
                continue;
            }
        };
        debug!("New API subscriber from {}", remote);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = subscribers.lock().expect("subscriber registry");
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handles.insert(
                id,
                SubscriberHandle {
                    tx: reply_tx,
                    format: OutputFormat::Json,
                },
            );
            id
        };
        tokio::spawn(subscriber_loop(
            id,
            stream,
            command_tx.clone(),
            reply_rx,
            Arc::clone(&subscribers),
        ));
    }
}

async fn subscriber_loop(
    id: usize,
    stream: TcpStream,
    command_tx: mpsc::UnboundedSender<(usize, String)>,
    mut reply_rx: mpsc::UnboundedReceiver<String>,
    subscribers: Arc<Mutex<Subscribers>>,
) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    loop {
        tokio::select! {
            line = framed.next() => match line {
                Some(Ok(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    // Output format is per-subscription, switched inline
                    if let Some(format) = trimmed.strip_prefix("encoding ") {
                        let format = match format {
                            "json" => Some(OutputFormat::Json),
                            "text" => Some(OutputFormat::Text),
                            _ => None,
                        };
                        let mut registry = subscribers.lock().expect("subscriber registry");
                        if let (Some(handle), Some(format)) =
                            (registry.handles.get_mut(&id), format)
                        {
                            handle.format = format;
                        }
                        continue;
                    }
                    if command_tx.send((id, trimmed.to_string())).is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!("API subscriber {} read error: {}", id, err);
                    break;
                }
                None => break,
            },
            outgoing = reply_rx.recv() => match outgoing {
                Some(line) => {
                    if framed.send(line).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    subscribers
        .lock()
        .expect("subscriber registry")
        .handles
        .remove(&id);
    debug!("API subscriber {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fsm::FsmState;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn connect(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.unwrap()
    }

    #[tokio::test]
    async fn test_command_and_reply() {
        let addr: SocketAddr = "127.0.0.1:17901".parse().unwrap();
        let mut api = ApiServer::bind(addr).await.unwrap();
        let mut stream = connect(addr).await;
        stream.write_all(b"show neighbor\n").await.unwrap();
        let (id, line) = api.next_command().await;
        assert_eq!(line, "show neighbor");
        api.reply(id, "[]".to_string());
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        assert_eq!(reply.trim(), "[]");
    }

    #[tokio::test]
    async fn test_broadcast_formats() {
        let addr: SocketAddr = "127.0.0.1:17902".parse().unwrap();
        let mut api = ApiServer::bind(addr).await.unwrap();

        let mut json_sub = connect(addr).await;
        let mut text_sub = connect(addr).await;
        text_sub.write_all(b"encoding text\n").await.unwrap();
        // A real command proves the encoding line was consumed first
        text_sub.write_all(b"show neighbor\n").await.unwrap();
        let (_, line) = api.next_command().await;
        assert_eq!(line, "show neighbor");
        // Make sure the json subscriber is registered before broadcasting
        json_sub.write_all(b"show neighbor\n").await.unwrap();
        let _ = api.next_command().await;
        assert_eq!(api.subscriber_count(), 2);

        let event = Event::new(
            "127.0.0.2".parse().unwrap(),
            65001,
            EventKind::State(FsmState::Established),
        );
        api.broadcast(&event);

        let mut json_reader = BufReader::new(json_sub);
        let mut json_line = String::new();
        json_reader.read_line(&mut json_line).await.unwrap();
        assert!(json_line.contains("\"type\":\"state\""));

        let mut text_reader = BufReader::new(text_sub);
        let mut text_line = String::new();
        text_reader.read_line(&mut text_line).await.unwrap();
        assert_eq!(text_line.trim(), "neighbor 127.0.0.2 state established");
    }
}
