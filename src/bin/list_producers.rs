use nacre::SignalingError;
use nacre::util::get_producer_list;

const DEFAULT_URL: &str = "ws://127.0.0.1:8443";

#[tokio::main]
async fn main() -> Result<(), SignalingError> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URL.to_owned());

    let producers = get_producer_list(&url).await?;
    if producers.is_empty() {
        println!("No producers registered on {}", url);
        return Ok(());
    }

    for (peer_id, meta) in &producers {
        println!("{}  {}", peer_id, meta.name);
    }

    Ok(())
}
