//! Load test for the document store.
//!
//! Spawns many WebSocket clients that all join the same room document at
//! once, then hammer it with score increments. Afterwards the document must
//! hold every joiner and every increment; anything less is a lost write.
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N      Number of clients to spawn (default: 100)
//!   --increments N   Score increments per client (default: 20)
//!   --room CODE      Room key to use (default: LOAD-<unix ms>)
//!   --url URL        Server URL (default: ws://127.0.0.1:9002/ws)

use futures_util::{SinkExt, StreamExt};
use quizduel_shared::document::{FieldOp, Guard};
use quizduel_shared::protocol::{ClientMsg, ErrorCode, Outcome, ServerMsg};
use quizduel_shared::room::{new_room_ops, FIELD_JOINED_AT, FIELD_PLAYERS, FIELD_SCORE};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// === Metrics ===

struct Metrics {
    connected: AtomicU64,
    joins_ok: AtomicU64,
    rejoins: AtomicU64,
    increments_ok: AtomicU64,
    errors: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_count: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            connected: AtomicU64::new(0),
            joins_ok: AtomicU64::new(0),
            rejoins: AtomicU64::new(0),
            increments_ok: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    fn record_latency(&self, started: Instant) {
        self.latency_sum_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }
}

// === Client task ===

async fn wait_welcome(ws: &mut Ws) -> bool {
    let welcome = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Text(text)) = msg {
                return matches!(
                    serde_json::from_str::<ServerMsg>(&text),
                    Ok(ServerMsg::Welcome(_))
                );
            }
        }
        false
    })
    .await;
    matches!(welcome, Ok(true))
}

/// Send a request and wait for the reply carrying its id.
async fn request(ws: &mut Ws, msg: ClientMsg) -> Option<Outcome> {
    let req_id = msg.req_id()?;
    let json = serde_json::to_string(&msg).ok()?;
    ws.send(Message::Text(json.into())).await.ok()?;
    while let Some(msg) = ws.next().await {
        if let Ok(Message::Text(text)) = msg {
            if let Ok(ServerMsg::Reply(reply)) = serde_json::from_str::<ServerMsg>(&text) {
                if reply.req_id == req_id {
                    return Some(reply.outcome);
                }
            }
        }
    }
    None
}

async fn run_client(
    client_id: u32,
    url: String,
    room: String,
    increments: u32,
    metrics: Arc<Metrics>,
    barrier: Arc<Barrier>,
) {
    let ws_result = connect_async(&url).await;
    let mut ws = match ws_result {
        Ok((ws, _)) => ws,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            barrier.wait().await;
            return;
        }
    };

    if !wait_welcome(&mut ws).await {
        if client_id < 3 {
            eprintln!("Client {} failed to get welcome", client_id);
        }
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        barrier.wait().await;
        return;
    }
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    // Everyone joins at the same instant.
    barrier.wait().await;

    let name = format!("player-{}", client_id);
    let mut req_id = 0u64;
    let mut next_id = || {
        req_id += 1;
        req_id
    };

    let started = Instant::now();
    let joined = request(
        &mut ws,
        ClientMsg::Create {
            req_id: next_id(),
            key: room.clone(),
            ops: new_room_ops(&name),
        },
    )
    .await;
    let joined = match joined {
        Some(Outcome::Err {
            code: ErrorCode::AlreadyExists,
            ..
        }) => {
            request(
                &mut ws,
                ClientMsg::Update {
                    req_id: next_id(),
                    key: room.clone(),
                    guards: vec![Guard::absent([FIELD_PLAYERS, name.as_str()])],
                    ops: vec![
                        FieldOp::set([FIELD_PLAYERS, name.as_str(), FIELD_SCORE], json!(0)),
                        FieldOp::server_timestamp([FIELD_PLAYERS, name.as_str(), FIELD_JOINED_AT]),
                    ],
                },
            )
            .await
        }
        other => other,
    };
    metrics.record_latency(started);

    match joined {
        Some(Outcome::Ok { .. }) => {
            metrics.joins_ok.fetch_add(1, Ordering::Relaxed);
        }
        Some(Outcome::Err {
            code: ErrorCode::PreconditionFailed,
            ..
        }) => {
            metrics.rejoins.fetch_add(1, Ordering::Relaxed);
        }
        Some(Outcome::Err { code, message }) => {
            if client_id < 5 {
                eprintln!("Client {} join failed: {:?} {}", client_id, code, message);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        None => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    for _ in 0..increments {
        let started = Instant::now();
        let outcome = request(
            &mut ws,
            ClientMsg::Update {
                req_id: next_id(),
                key: room.clone(),
                guards: vec![],
                ops: vec![
                    FieldOp::increment([FIELD_PLAYERS, name.as_str(), FIELD_SCORE], 1),
                    FieldOp::increment(["loadtestTotal"], 1),
                ],
            },
        )
        .await;
        metrics.record_latency(started);
        match outcome {
            Some(Outcome::Ok { .. }) => {
                metrics.increments_ok.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    let _ = ws.close(None).await;
}

async fn fetch_room(url: &str, room: &str) -> Option<Value> {
    let (mut ws, _) = connect_async(url).await.ok()?;
    if !wait_welcome(&mut ws).await {
        return None;
    }
    let outcome = request(
        &mut ws,
        ClientMsg::Get {
            req_id: 1,
            key: room.to_string(),
        },
    )
    .await;
    let _ = ws.close(None).await;
    match outcome {
        Some(Outcome::Ok { doc }) => doc,
        _ => None,
    }
}

// === Main ===

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut num_clients: u32 = 100;
    let mut increments: u32 = 20;
    let mut url = "ws://127.0.0.1:9002/ws".to_string();
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut room = format!("LOAD-{}", unix_ms);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--clients" => {
                i += 1;
                num_clients = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(100);
            }
            "--increments" => {
                i += 1;
                increments = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(20);
            }
            "--room" => {
                i += 1;
                room = args.get(i).cloned().unwrap_or(room);
            }
            "--url" => {
                i += 1;
                url = args.get(i).cloned().unwrap_or(url);
            }
            _ => {}
        }
        i += 1;
    }

    println!("=== Quizduel Store Load Test ===");
    println!("Clients: {}", num_clients);
    println!("Increments per client: {}", increments);
    println!("Room: {}", room);
    println!("URL: {}", url);
    println!();

    let metrics = Arc::new(Metrics::new());
    let barrier = Arc::new(Barrier::new(num_clients as usize));
    let start = Instant::now();

    let mut handles = Vec::with_capacity(num_clients as usize);
    for client_id in 0..num_clients {
        let url = url.clone();
        let room = room.clone();
        let metrics = Arc::clone(&metrics);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            run_client(client_id, url, room, increments, metrics, barrier).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    let elapsed = start.elapsed();

    println!("=== Final Results ===");
    let connected = metrics.connected.load(Ordering::Relaxed);
    let joins_ok = metrics.joins_ok.load(Ordering::Relaxed);
    let rejoins = metrics.rejoins.load(Ordering::Relaxed);
    let increments_ok = metrics.increments_ok.load(Ordering::Relaxed);
    let errors = metrics.errors.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_us.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Connected: {}", connected);
    println!("Joins committed: {}", joins_ok);
    println!("Rejoins (name already present): {}", rejoins);
    println!("Increments committed: {}", increments_ok);
    println!("Errors: {}", errors);
    println!("Elapsed: {:?}", elapsed);
    if latency_count > 0 {
        println!("Average request latency: {}us", latency_sum / latency_count);
        println!(
            "Requests/sec: {:.0}",
            latency_count as f64 / elapsed.as_secs_f64().max(0.001)
        );
    }

    let Some(doc) = fetch_room(&url, &room).await else {
        eprintln!("Could not read back room {}", room);
        std::process::exit(1);
    };

    let players = doc
        .get(FIELD_PLAYERS)
        .and_then(Value::as_object)
        .map_or(0, |p| p.len()) as u64;
    let total = doc.get("loadtestTotal").and_then(Value::as_u64).unwrap_or(0);

    println!();
    println!("Players in document: {} (expected {})", players, joins_ok);
    println!("Total increments in document: {} (expected {})", total, increments_ok);

    if players != joins_ok || total != increments_ok {
        eprintln!("LOST WRITES DETECTED");
        std::process::exit(1);
    }
    println!("No lost writes");
}
