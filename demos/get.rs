//! Fetch one URL and print its status and body.
//!
//! ```text
//! cargo run --example get -- https://example.com/
//! ```

use std::sync::Arc;

use tristream::client::{Client, ClientConfig};
use tristream::resolver::dou::DouResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "https://example.com/".to_string());
    let uri: http::Uri = url.parse()?;

    let resolver = Arc::new(DouResolver::new("1.1.1.1:53".parse()?, std::time::Duration::from_secs(5)));
    let client = Client::new(resolver, ClientConfig::with_native_roots());

    let response = client.urlopen(http::Method::GET, uri, http::HeaderMap::new(), None).await?;
    println!("{} {:?}", response.status, response.headers);

    let body = response.bytes().await?;
    println!("{}", String::from_utf8_lossy(&body));

    Ok(())
}
