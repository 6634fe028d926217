// Signalling relay CLI validation tool
// Checks a running relay through its health endpoint, ad-hoc messages and scripted scenarios

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Signalling relay CLI validation tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Test WebSocket connection
    Connect,

    /// Join a room and print what arrives
    Join {
        /// Room ID to join
        #[arg(short, long)]
        room_id: String,

        /// Keep connection alive (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Join a room, relay one signal to the other members and disconnect
    Signal {
        /// Room ID to join and signal into
        #[arg(short, long)]
        room_id: String,

        /// JSON object with the signal fields, e.g. '{"sdp":"..."}'
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send custom messages
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Join { room_id, keep_alive } => {
            join_room(&cli.server, room_id, *keep_alive).await;
        }
        Commands::Signal { room_id, payload } => {
            send_signal(&cli.server, room_id, payload).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/", server)
}

async fn connect(server: &str) -> Option<Ws> {
    match connect_async(ws_url(server)).await {
        Ok((ws_stream, _)) => Some(ws_stream),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn send_json(ws: &mut Ws, value: &Value) -> bool {
    ws.send(Message::Text(value.to_string())).await.is_ok()
}

/// Next text frame as JSON, skipping control frames. `None` on timeout or close.
async fn next_json(ws: &mut Ws, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Close(_)))) => return None,
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn expect_silence(ws: &mut Ws) -> bool {
    next_json(ws, SILENCE_WINDOW).await.is_none()
}

fn unique_room(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Rooms: {}", body["rooms"]);
                    println!("  Peers: {}", body["peers"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    if let Some(ws_stream) = connect(server).await {
        println!("{} WebSocket connection established", "✓".green());
        println!("  URL: {}", ws_url(server));
        drop(ws_stream);
        println!("{} Connection closed cleanly", "✓".green());
    }
}

async fn join_room(server: &str, room_id: &str, keep_alive: bool) {
    println!("{}", "Joining room...".cyan());
    println!("  Room ID: {}", room_id);

    let Some(mut ws) = connect(server).await else {
        return;
    };

    if !send_json(&mut ws, &json!({"type": "join", "roomId": room_id})).await {
        println!("{} Failed to send join message", "✗".red());
        return;
    }

    match next_json(&mut ws, REPLY_TIMEOUT).await {
        Some(response) if response["type"] == "joined" => {
            println!("{} Joined room", "✓".green());
            println!("\n{}", "═".repeat(50).green());
            println!("{} {}", "Room ID:".bold(), room_id.green().bold());
            println!("{} {}", "Peers in room:".bold(), response["count"].to_string().green().bold());
            println!("{}", "═".repeat(50).green());
        }
        Some(response) => {
            println!("{} Unexpected response: {}", "✗".yellow(), response);
            return;
        }
        None => {
            println!("{} No joined message received", "✗".red());
            return;
        }
    }

    if !keep_alive {
        println!("\n{}", "⚠ Note: Connection closed. You have left the room.".yellow());
        println!("Use {} to stay in the room.", "--keep-alive".cyan());
        return;
    }

    println!("\n{}", "Connection is being kept alive...".yellow());
    println!("Press {} to disconnect and leave the room.", "Ctrl+C".bold());

    loop {
        match timeout(Duration::from_secs(30), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                println!("{} {}", "◀".green(), text.bright_white());
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Err(_) => continue,
        }
    }
}

async fn send_signal(server: &str, room_id: &str, payload: &str) {
    let mut message = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(fields)) => fields,
        _ => {
            println!("{} Payload must be a JSON object", "✗".red());
            return;
        }
    };
    message.insert("type".to_string(), json!("signal"));
    message.insert("roomId".to_string(), json!(room_id));

    let Some(mut ws) = connect(server).await else {
        return;
    };

    if !send_json(&mut ws, &json!({"type": "join", "roomId": room_id})).await {
        println!("{} Failed to send join message", "✗".red());
        return;
    }

    match next_json(&mut ws, REPLY_TIMEOUT).await {
        Some(response) if response["type"] == "joined" => {
            println!("{} Joined room ({} peers)", "✓".green(), response["count"]);
        }
        _ => {
            println!("{} Join failed", "✗".red());
            return;
        }
    }

    if send_json(&mut ws, &Value::Object(message)).await {
        println!("{} Signal sent", "✓".green());
    } else {
        println!("{} Failed to send signal", "✗".red());
    }

    let _ = ws.close(None).await;
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Landing page and health endpoint", "http".cyan());
    println!("  {} - Join, signal and leave between two peers", "relay".cyan());
    println!("  {} - Signals never cross rooms", "isolation".cyan());
    println!("  {} - Malformed messages keep the connection open", "malformed".cyan());
    println!("\nExample: relay-cli validate --scenario relay");
}

const SCENARIOS: [&str; 5] = ["connection", "http", "relay", "isolation", "malformed"];

async fn run_validation(server: &str, scenario: &str) -> Option<bool> {
    let result = match scenario {
        "connection" => validate_connection(server).await,
        "http" => validate_http(server).await,
        "relay" => validate_relay(server).await,
        "isolation" => validate_isolation(server).await,
        "malformed" => validate_malformed(server).await,
        _ => return None,
    };
    Some(result)
}

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    match run_validation(server, scenario).await {
        Some(true) => println!("\n{} Scenario passed", "✓".green().bold()),
        Some(false) => println!("\n{} Scenario failed", "✗".red().bold()),
        None => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
        }
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    let mut failed = 0;

    for scenario in SCENARIOS {
        println!("\n{} Testing: {}", "▶".cyan(), scenario.bold());
        println!("{}", "─".repeat(60));

        if run_validation(server, scenario).await == Some(true) {
            passed += 1;
        } else {
            failed += 1;
        }

        sleep(Duration::from_millis(200)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    println!("{}", "Validation Summary".bold());
    println!("{}", "═".repeat(60).green());
    println!("  {} Passed: {}", "✓".green(), passed.to_string().green());
    println!("  {} Failed: {}", "✗".red(), failed.to_string().red());
    println!("  Total: {}", passed + failed);

    if failed == 0 {
        println!("\n{}", "All validations passed!".green().bold());
    } else {
        println!("\n{}", "Some validations failed. Check output above.".yellow());
    }
}

async fn validate_connection(server: &str) -> bool {
    match connect(server).await {
        Some(ws_stream) => {
            println!("{} WebSocket connection successful", "✓".green());
            drop(ws_stream);
            true
        }
        None => false,
    }
}

async fn validate_http(server: &str) -> bool {
    let client = reqwest::Client::new();

    let landing = client.get(format!("http://{}/", server)).send().await;
    match landing {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Landing page reachable", "✓".green());
        }
        Ok(resp) => {
            println!("{} Landing page returned {}", "✗".red(), resp.status());
            return false;
        }
        Err(e) => {
            println!("{} Cannot reach landing page: {}", "✗".red(), e);
            return false;
        }
    }

    match client.get(format!("http://{}/health", server)).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(body) if body["status"] == "healthy" => {
                println!("{} Health endpoint reports healthy", "✓".green());
                true
            }
            _ => {
                println!("{} Unexpected health body", "✗".red());
                false
            }
        },
        _ => {
            println!("{} Health endpoint unavailable", "✗".red());
            false
        }
    }
}

fn check(ok: bool, message: &str) -> bool {
    if ok {
        println!("{} {}", "✓".green(), message);
    } else {
        println!("{} {}", "✗".red(), message);
    }
    ok
}

async fn validate_relay(server: &str) -> bool {
    let room = unique_room("validate-relay");

    println!("  Step 1: Peer A joins {}", room);
    let Some(mut a) = connect(server).await else {
        return false;
    };
    send_json(&mut a, &json!({"type": "join", "roomId": room})).await;
    let reply = next_json(&mut a, REPLY_TIMEOUT).await;
    if !check(
        reply == Some(json!({"type": "joined", "roomId": room, "count": 1})),
        "A received joined with count 1",
    ) {
        return false;
    }

    println!("  Step 2: Peer B joins");
    let Some(mut b) = connect(server).await else {
        return false;
    };
    send_json(&mut b, &json!({"type": "join", "roomId": room})).await;
    let reply = next_json(&mut b, REPLY_TIMEOUT).await;
    if !check(
        reply == Some(json!({"type": "joined", "roomId": room, "count": 2})),
        "B received joined with count 2",
    ) {
        return false;
    }

    let new_peer = next_json(&mut a, REPLY_TIMEOUT).await.unwrap_or(Value::Null);
    let b_id = new_peer["peer"].clone();
    if !check(
        new_peer["type"] == "new-peer" && new_peer["roomId"] == room.as_str() && b_id.is_string(),
        "A was told about B",
    ) {
        return false;
    }

    println!("  Step 3: A sends an offer");
    let offer = json!({"type": "signal", "roomId": room, "sdp": "offer..."});
    send_json(&mut a, &offer).await;
    let relayed = next_json(&mut b, REPLY_TIMEOUT).await;
    if !check(relayed == Some(offer), "B received the offer unchanged") {
        return false;
    }
    if !check(expect_silence(&mut a).await, "A did not receive its own offer") {
        return false;
    }

    println!("  Step 4: B disconnects");
    let _ = b.close(None).await;
    let left = next_json(&mut a, REPLY_TIMEOUT).await;
    if !check(
        left == Some(json!({"type": "peer-left", "roomId": room, "peer": b_id})),
        "A was told that B left",
    ) {
        return false;
    }

    let _ = a.close(None).await;
    true
}

async fn validate_isolation(server: &str) -> bool {
    let room_x = unique_room("validate-x");
    let room_y = unique_room("validate-y");

    let (Some(mut a), Some(mut b), Some(mut c)) =
        (connect(server).await, connect(server).await, connect(server).await)
    else {
        return false;
    };

    for (ws, room) in [(&mut a, &room_x), (&mut b, &room_x), (&mut c, &room_y)] {
        send_json(ws, &json!({"type": "join", "roomId": room})).await;
        if next_json(ws, REPLY_TIMEOUT).await.is_none() {
            println!("{} Join to {} failed", "✗".red(), room);
            return false;
        }
    }
    // A hears about B
    next_json(&mut a, REPLY_TIMEOUT).await;

    send_json(&mut a, &json!({"type": "signal", "roomId": room_x, "candidate": "c1"})).await;
    send_json(&mut c, &json!({"type": "signal", "roomId": room_x, "candidate": "leak"})).await;

    let first = next_json(&mut b, REPLY_TIMEOUT).await;
    let ok = check(
        first.as_ref().map(|v| v["candidate"] == "c1").unwrap_or(false),
        "B received the signal from its own room",
    ) & check(expect_silence(&mut b).await, "B did not receive the cross-room signal")
        & check(expect_silence(&mut c).await, "C did not receive anything from the other room");

    for ws in [&mut a, &mut b, &mut c] {
        let _ = ws.close(None).await;
    }
    ok
}

async fn validate_malformed(server: &str) -> bool {
    let room = unique_room("validate-malformed");
    let Some(mut ws) = connect(server).await else {
        return false;
    };

    for raw in ["not json", r#"{"type":"join"}"#, r#"{"type":"unknown","roomId":"x"}"#] {
        if ws.send(Message::Text(raw.to_string())).await.is_err() {
            println!("{} Connection dropped after malformed message", "✗".red());
            return false;
        }
    }
    if !check(expect_silence(&mut ws).await, "Malformed messages produced no reply") {
        return false;
    }

    send_json(&mut ws, &json!({"type": "join", "roomId": room})).await;
    let reply = next_json(&mut ws, REPLY_TIMEOUT).await;
    let ok = check(
        reply.map(|v| v["type"] == "joined").unwrap_or(false),
        "Connection still usable afterwards",
    );

    let _ = ws.close(None).await;
    ok
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let Some(ws_stream) = connect(server).await else {
        return;
    };
    println!("{} Connected to server", "✓".green());

    let (mut write, mut read) = ws_stream.split();

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    loop {
        print!("{} ", "►".cyan());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input == "quit" || input == "exit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_interactive_help();
            continue;
        }

        if let Ok(parsed) = serde_json::from_str::<Value>(input) {
            if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                println!("{} Message sent", "✓".green());
            } else {
                println!("{} Failed to send message", "✗".red());
                break;
            }
        } else {
            println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
        }
    }

    receive_task.abort();
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON messages directly to the server.\n");

    println!("{}", "Example Messages:".bold());
    println!("\n{}:", "Join Room".cyan());
    println!(r#"  {{"type":"join","roomId":"lobby"}}"#);

    println!("\n{}:", "Offer".cyan());
    println!(r#"  {{"type":"signal","roomId":"lobby","sdp":"v=0..."}}"#);

    println!("\n{}:", "ICE Candidate".cyan());
    println!(r#"  {{"type":"signal","roomId":"lobby","candidate":"candidate:...","sdpMid":"0"}}"#);

    println!("\nDisconnect (quit) to leave the room.");
    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
