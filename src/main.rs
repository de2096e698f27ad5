use std::net::SocketAddr;

use hemmer_provider_couchbase::{init_logging, serve, serve_on, CouchbaseProvider};
use tracing::error;

const DEFAULT_DEBUG_ADDR: &str = "127.0.0.1:50051";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let result = match args.next().as_deref() {
        Some("--debug") => {
            let addr: SocketAddr = args
                .next()
                .as_deref()
                .unwrap_or(DEFAULT_DEBUG_ADDR)
                .parse()?;
            serve_on(CouchbaseProvider::new(), addr).await
        }
        Some(other) => return Err(format!("unknown argument: {}", other).into()),
        None => serve(CouchbaseProvider::new()).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Provider server failed");
    }
    result
}
