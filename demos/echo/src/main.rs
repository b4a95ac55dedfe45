use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use trellis::prelude::*;
use trellis::ServerConfig;

async fn index() -> &'static str {
    "trellis echo demo: GET /hello/:name, POST /json, ws://.../ws, ws://.../chat"
}

async fn hello(Path(name): Path<String>) -> String {
    format!("hello, {name}")
}

async fn json_echo(Json(data): Json<serde_json::Value>) -> JsonResponse<serde_json::Value> {
    JsonResponse(serde_json::json!({ "echo": data }))
}

fn echo() -> Arc<dyn Handler> {
    from_fn(|ctx| {
        Box::pin(async move {
            let ws = match WebSocket::upgrade(ctx).await {
                Ok(ws) => ws,
                Err(err) => return err.into_response(ctx),
            };
            tokio::spawn(async move {
                while let Ok(msg) = ws.message().await {
                    if ws.send_message(&msg).await.is_err() {
                        break;
                    }
                }
                info!(peer = ?ws.peer_addr(), "echo connection finished");
            });
        })
    })
}

fn chat() -> Arc<dyn Handler> {
    from_fn(|ctx| {
        Box::pin(async move {
            let Some(room) = ctx.state::<WsGroup>() else {
                ctx.status_text(StatusCode::INTERNAL_SERVER_ERROR);
                return;
            };
            let ws = match WebSocket::upgrade(ctx).await {
                Ok(ws) => Arc::new(ws),
                Err(err) => return err.into_response(ctx),
            };
            room.add(Arc::clone(&ws)).await;
            let members = room.len().await;
            info!(members, "joined chat");

            tokio::spawn(async move {
                while let Ok(msg) = ws.message().await {
                    room.send(msg.as_bytes(), msg.opcode()).await;
                }
                room.clean().await;
                let members = room.len().await;
                info!(members, "left chat");
            });
        })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let router = app(config);
    info!("echo demo on http://127.0.0.1:8080");
    router.listen("127.0.0.1:8080").await
}

fn app(config: ServerConfig) -> Router {
    let room: WsGroup = WsGroup::new();
    Router::new()
        .config(config)
        .with_state(Arc::new(room))
        .layer(Recovery::new())
        .layer(LoggerMiddleware::new())
        .layer(AutoOptions::new())
        .get("/", handler(index))
        .get("/hello/:name", handler(hello))
        .post("/json", handler(json_echo))
        .get("/ws", echo())
        .get("/chat", chat())
}
