//! HTTP chat server for SqlBot
//! Minimal HTTP/1.1 handling on top of tokio; one JSON endpoint per operation.

use clap::Parser;
use serde::{Deserialize, Serialize};
use sqlbot::app::build_bot;
use sqlbot::config::Config;
use sqlbot::logging::init_tracing;
use sqlbot::prompts::EXAMPLE_QUESTIONS;
use sqlbot::SqlBot;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const MAX_REQUEST_BYTES: usize = 1_000_000;

#[derive(Parser)]
#[command(name = "sqlbot-server")]
#[command(about = "Chat API for SqlBot")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// SQLite database file (overrides SQLBOT_DATABASE)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

/// Body of `POST /api/chat`. `history` is the front end's transcript; the
/// model sessions keep their own, so it is only logged.
#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    history: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    response: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    let bot = Arc::new(build_bot(&config)?);

    let listener = TcpListener::bind(&args.bind).await?;
    info!("SqlBot server listening on http://{}", args.bind);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&bot)));
    }
}

async fn handle_connection(mut stream: TcpStream, bot: Arc<SqlBot>) {
    use tokio::time::{timeout, Duration};

    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut temp_buf).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&temp_buf[..n]);
            if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            warn!("Failed to read from stream: {}", e);
            return;
        }
        Ok(Ok(())) => {}
    }

    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&bot, &request).await,
        Err(_) => create_response(400, "Bad Request", r#"{"error":"request is not valid UTF-8"}"#),
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
}

/// Headers received and, if announced, the whole body.
fn request_complete(buffer: &[u8]) -> bool {
    let Some(headers_end) = find_subslice(buffer, b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&buffer[..headers_end]);
    match extract_content_length(&headers) {
        Some(content_length) => buffer.len() >= headers_end + 4 + content_length,
        None => true,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn extract_content_length(request: &str) -> Option<usize> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

async fn handle_request(bot: &SqlBot, request: &str) -> String {
    let Some(request_line) = request.lines().next() else {
        return create_response(400, "Bad Request", "{}");
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(full_path)) = (parts.next(), parts.next()) else {
        return create_response(400, "Bad Request", "{}");
    };

    let path = full_path.split('?').next().unwrap_or("/").trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    debug!("Request: {} {}", method, path);

    let body = request
        .find("\r\n\r\n")
        .map(|i| request[i + 4..].trim())
        .unwrap_or("");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            let (sql_turns, answer_turns) = bot.history_len().await;
            let last_activity = bot.last_activity().await.map(|at| at.to_rfc3339());
            json_response(&serde_json::json!({
                "status": "ok",
                "sql_history_turns": sql_turns,
                "answer_history_turns": answer_turns,
                "last_activity": last_activity,
            }))
        }
        ("GET", "/api/examples") => json_response(&serde_json::json!({ "examples": EXAMPLE_QUESTIONS })),
        ("POST", "/api/reset") => {
            bot.reset_history().await;
            info!("Conversation history reset");
            json_response(&serde_json::json!({ "status": "reset" }))
        }
        ("POST", "/api/chat") => match serde_json::from_str::<ChatBody>(body) {
            Ok(chat) => {
                debug!("Chat request with {} prior front-end messages", chat.history.len());
                let response = bot.ask(&chat.message).await;
                json_response(&ChatReply { response })
            }
            Err(e) => create_response(
                400,
                "Bad Request",
                &serde_json::json!({ "error": format!("Invalid chat request: {}", e) }).to_string(),
            ),
        },
        _ => create_response(404, "Not Found", r#"{"error":"not found"}"#),
    }
}

fn json_response<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(200, "OK", &body),
        Err(e) => create_response(
            500,
            "Internal Server Error",
            &serde_json::json!({ "error": e.to_string() }).to_string(),
        ),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
