#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use destiny_manifest_cache::model::DisplayProperties;
use destiny_manifest_cache::{CacheStore, EntityDictionary, EntityRecord, StoreError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A store operation as observed by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Flush,
    Set(String),
}

#[derive(Debug, Default)]
struct StoreState {
    ops: Vec<StoreOp>,
    contents: BTreeMap<String, String>,
    fail_flush: bool,
    failing_keys: HashSet<String>,
}

/// In-memory store that records every call and can inject failures.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<StoreState>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(entries: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for (key, value) in entries {
                state.contents.insert(key.to_string(), value.to_string());
            }
        }
        store
    }

    pub fn failing_flush(self) -> Self {
        self.state.lock().fail_flush = true;
        self
    }

    pub fn failing_key(self, key: &str) -> Self {
        self.state.lock().failing_keys.insert(key.to_string());
        self
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().ops.clone()
    }

    pub fn set_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, StoreOp::Set(_)))
            .count()
    }

    pub fn contents(&self) -> BTreeMap<String, String> {
        self.state.lock().contents.clone()
    }

    /// Decode every stored value back into a record.
    pub fn decoded(&self) -> EntityDictionary {
        self.contents()
            .into_iter()
            .map(|(key, value)| {
                let record = serde_json::from_str(&value).expect("stored value is a record");
                (key, record)
            })
            .collect()
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn flush_all(&mut self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.ops.push(StoreOp::Flush);
        if state.fail_flush {
            return Err(StoreError::Backend("flush rejected".to_string()));
        }
        state.contents.clear();
        Ok(())
    }

    async fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.ops.push(StoreOp::Set(key.to_string()));
        if state.failing_keys.contains(key) {
            return Err(StoreError::Backend(format!("write rejected for {key}")));
        }
        state.contents.insert(key.to_string(), value);
        Ok(())
    }
}

pub fn record(name: &str, mode: Option<i32>) -> EntityRecord {
    EntityRecord {
        mode,
        display_properties: DisplayProperties {
            description: format!("{name} description"),
            name: name.to_string(),
            icon: format!("/common/destiny2_content/icons/{name}.png"),
            has_icon: true,
        },
        original_display_properties: DisplayProperties {
            name: name.to_string(),
            ..DisplayProperties::default()
        },
        release_icon: String::new(),
        release_time: 0,
    }
}

pub fn dictionary(entries: &[(&str, EntityRecord)]) -> EntityDictionary {
    entries
        .iter()
        .map(|(key, record)| (key.to_string(), record.clone()))
        .collect()
}

/// Manifest body advertising the four definition tables for `language`.
pub fn manifest_body(language: &str) -> Value {
    json!({
        "Response": {
            "version": "test.1",
            "jsonWorldComponentContentPaths": {
                language: {
                    "DestinyActivityDefinition": "/content/activity.json",
                    "DestinyClassDefinition": "/content/class.json",
                    "DestinyGenderDefinition": "/content/gender.json",
                    "DestinyRaceDefinition": "/content/race.json",
                    "DestinyInventoryItemDefinition": "/content/items.json"
                }
            }
        },
        "ErrorCode": 1,
        "ErrorStatus": "Success"
    })
}

/// Response served for one route of the fake API.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Raw(StatusCode, String),
}

impl IntoResponse for Reply {
    fn into_response(self) -> axum::response::Response {
        match self {
            Reply::Json(value) => (StatusCode::OK, axum::Json(value)).into_response(),
            Reply::Raw(status, body) => (status, body).into_response(),
        }
    }
}

/// Routes for a fake Bungie API, defaulting to a healthy English manifest and
/// small definition tables.
#[derive(Debug, Clone)]
pub struct FakeApi {
    pub manifest: Reply,
    pub race: Reply,
    pub class: Reply,
    pub gender: Reply,
    pub activity: Reply,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            manifest: Reply::Json(manifest_body("en")),
            race: Reply::Json(json!({
                "1": { "displayProperties": { "name": "Human" } },
                "2": { "displayProperties": { "name": "Awoken" } }
            })),
            class: Reply::Json(json!({
                "1": { "directActivityModeType": 5, "displayProperties": { "name": "Titan" } },
                "3": { "displayProperties": { "name": "Hunter" } }
            })),
            gender: Reply::Json(json!({
                "4": { "displayProperties": { "name": "Female" } }
            })),
            activity: Reply::Json(json!({
                "100": { "directActivityModeType": 4, "displayProperties": { "name": "Leviathan" }, "releaseTime": 1504000000 },
                "101": { "directActivityModeType": 3, "displayProperties": { "name": "Lake of Shadows" } },
                "102": { "directActivityModeType": null, "displayProperties": { "name": "Orbit" } },
                "4":   { "directActivityModeType": 4, "displayProperties": { "name": "Eater of Worlds" } }
            })),
        }
    }
}

impl FakeApi {
    pub async fn serve(self) -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route("/Platform/Destiny2/Manifest", get(reply(self.manifest)))
            .route("/content/race.json", get(reply(self.race)))
            .route("/content/class.json", get(reply(self.class)))
            .route("/content/gender.json", get(reply(self.gender)))
            .route("/content/activity.json", get(reply(self.activity)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), handle)
    }
}

fn reply(reply: Reply) -> impl Fn() -> std::future::Ready<Reply> + Clone + Send + Sync + 'static {
    move || std::future::ready(reply.clone())
}

/// Minimal RESP server standing in for Redis. Every command is recorded and
/// answered with `+OK` after `reply_delay`, one reply at a time.
#[derive(Debug, Clone, Default)]
pub struct FakeRedis {
    pub reply_delay: Duration,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeRedis {
    pub fn with_reply_delay(reply_delay: Duration) -> Self {
        Self {
            reply_delay,
            ..Self::default()
        }
    }

    /// Commands received so far, as upper-cased name followed by arguments.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }

    /// Returns a `redis://` URL selecting database `db`.
    pub async fn serve(&self, db: u8) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let server = self.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(server.clone().handle(socket));
            }
        });
        (format!("redis://{addr}/{db}"), handle)
    }

    async fn handle(self, mut socket: TcpStream) {
        let mut pending = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            pending.extend_from_slice(&chunk[..read]);
            while let Some((command, used)) = parse_command(&pending) {
                pending.drain(..used);
                self.commands.lock().push(command);
                tokio::time::sleep(self.reply_delay).await;
                if socket.write_all(b"+OK\r\n").await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Parses one RESP array of bulk strings, returning it and the bytes consumed.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (header, mut pos) = read_line(buf, 0)?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let (len_line, next) = read_line(buf, pos)?;
        let len: usize = len_line.strip_prefix('$')?.parse().ok()?;
        let end = next + len;
        if buf.len() < end + 2 {
            return None;
        }
        parts.push(String::from_utf8_lossy(&buf[next..end]).into_owned());
        pos = end + 2;
    }
    if let Some(name) = parts.first_mut() {
        *name = name.to_ascii_uppercase();
    }
    Some((parts, pos))
}

fn read_line(buf: &[u8], start: usize) -> Option<(&str, usize)> {
    let rest = buf.get(start..)?;
    let end = rest.windows(2).position(|pair| pair == b"\r\n")?;
    let line = std::str::from_utf8(&rest[..end]).ok()?;
    Some((line, start + end + 2))
}
