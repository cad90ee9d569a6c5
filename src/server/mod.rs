//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! The control-surface server: a newline-delimited JSON-RPC 2.0 listener
//! that also pushes `Event` frames to every connected client, mirroring
//! `event_server.cpp`'s combined request/event socket. One thread per
//! connected client.
//!

pub mod event;
pub mod rpc;

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{info, warn};

use crate::error::RpcError;
use event::{Event, EventEnvelope};
use rpc::{dispatch, RpcHandler};

pub const MESSAGE_VERSION: u32 = 1;

/// Short git commit hash captured by `build.rs` at compile time, used as
/// the `PHDSubver` field of the `Version` event so clients can tell two
/// builds of the same `CARGO_PKG_VERSION` apart.
fn build_commit_hash() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/version"))
}

/// Handle used by the rest of the engine to push events to every
/// connected RPC client.
#[derive(Clone)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
    host: String,
    instance_id: u32,
}

impl EventBroadcaster {
    fn new(host: String, instance_id: u32) -> EventBroadcaster {
        EventBroadcaster { subscribers: Arc::new(Mutex::new(Vec::new())), host, instance_id }
    }

    fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn send(&self, event: Event) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn envelope<'a>(&self, event: &'a Event) -> EventEnvelope<'a> {
        EventEnvelope::new(event, Utc::now(), self.host.clone(), self.instance_id)
    }
}

pub struct EventServer {
    listener: TcpListener,
    broadcaster: EventBroadcaster,
}

impl EventServer {
    pub fn bind(addr: &str, instance_id: u32) -> std::io::Result<EventServer> {
        let listener = TcpListener::bind(addr)?;
        let host = listener.local_addr().map(|a| a.ip().to_string()).unwrap_or_else(|_| "localhost".to_string());
        Ok(EventServer { listener, broadcaster: EventBroadcaster::new(host, instance_id) })
    }

    pub fn broadcaster(&self) -> EventBroadcaster {
        self.broadcaster.clone()
    }

    /// Accepts connections forever, spawning one handler thread per
    /// client. `handler_factory` builds a fresh `RpcHandler` view onto
    /// the shared session for each connection (the session itself is
    /// internally synchronized).
    pub fn serve<F, H>(&self, handler_factory: F) -> std::io::Result<()>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RpcHandler + Send + 'static,
    {
        let handler_factory = Arc::new(handler_factory);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("event server: accept failed: {}", e);
                    continue;
                }
            };
            let broadcaster = self.broadcaster.clone();
            let handler_factory = handler_factory.clone();
            std::thread::spawn(move || {
                let mut handler = handler_factory();
                if let Err(e) = handle_client(stream, &broadcaster, &mut handler) {
                    warn!("event server: client disconnected: {}", e);
                }
            });
        }
        Ok(())
    }
}

fn handle_client(stream: TcpStream, broadcaster: &EventBroadcaster, handler: &mut dyn RpcHandler) -> std::io::Result<()> {
    info!("event server: client connected");
    let events = broadcaster.subscribe();
    let mut writer = stream.try_clone()?;

    let version_event = Event::Version { version: env!("CARGO_PKG_VERSION").to_string(), subversion: build_commit_hash().to_string(), msg_version: MESSAGE_VERSION };
    writer.write_all(broadcaster.envelope(&version_event).to_json_line().unwrap_or_default().as_bytes())?;

    if let Ok(state) = handler.get_app_state() {
        let app_state_event = Event::AppState { state: state.as_str().unwrap_or("Stopped").to_string() };
        writer.write_all(broadcaster.envelope(&app_state_event).to_json_line().unwrap_or_default().as_bytes())?;
    }

    let event_broadcaster = broadcaster.clone();
    let mut event_writer = stream.try_clone()?;
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            let line = event_broadcaster.envelope(&event).to_json_line().unwrap_or_default();
            if event_writer.write_all(line.as_bytes()).is_err() {
                break;
            }
        }
    });

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<rpc::Request>(&line) {
            Ok(request) => dispatch(handler, request),
            Err(e) => Some(rpc::Response::err(None, &RpcError::Malformed(e))),
        };
        if let Some(response) = response {
            writer.write_all(response.to_json_line().unwrap_or_default().as_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcaster_drops_disconnected_subscribers() {
        let broadcaster = EventBroadcaster::new("localhost".into(), 1);
        let rx = broadcaster.subscribe();
        drop(rx);
        broadcaster.send(Event::StartGuiding);
        assert_eq!(broadcaster.subscribers.lock().unwrap().len(), 0);
    }

    #[test]
    fn broadcaster_delivers_to_live_subscriber() {
        let broadcaster = EventBroadcaster::new("localhost".into(), 1);
        let rx = broadcaster.subscribe();
        broadcaster.send(Event::StartGuiding);
        assert!(matches!(rx.recv().unwrap(), Event::StartGuiding));
    }
}
