//! Open a WebSocket connection, echo a few messages, then close cleanly.
//!
//! ```text
//! cargo run --example websocket_echo --features websocket -- wss://echo.example.com/
//! ```

use std::sync::Arc;

use tristream::client::{Client, ClientConfig};
use tristream::ext::websocket::Message;
use tristream::resolver::dou::DouResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "wss://echo.example.com/".to_string());
    let uri: http::Uri = url.parse()?;

    let resolver = Arc::new(DouResolver::new("1.1.1.1:53".parse()?, std::time::Duration::from_secs(5)));
    let client = Client::new(resolver, ClientConfig::with_native_roots());

    let mut ws = client.websocket(uri, http::HeaderMap::new()).await?;

    ws.send_payload(Message::Text("hello from tristream".to_string())).await?;

    while let Some(message) = ws.next_payload().await? {
        match message {
            Message::Text(text) => {
                println!("received: {text}");
                ws.close(None).await?;
                break;
            }
            Message::Binary(data) => println!("received {} binary bytes", data.len()),
            Message::Ping(data) => println!("received ping ({} bytes)", data.len()),
            Message::Pong(_) => {}
            Message::Close(frame) => {
                println!("peer closed: {frame:?}");
                break;
            }
        }
    }

    Ok(())
}
