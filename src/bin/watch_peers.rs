use nacre::role::{Listener, RoleEvent};

const DEFAULT_URL: &str = "ws://127.0.0.1:8443";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_URL.to_owned());

    let listener = Listener::new(url.clone(), "nacre-watch");

    println!("   Watching peer status on {}", url);
    println!("   Press Ctrl+C to stop\n");

    listener.connect().await?;

    let events = listener.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(RoleEvent::PeerStatusChanged { peer_id, roles, meta }) => {
                    let roles: Vec<_> = roles.iter().map(|r| r.as_str()).collect();
                    println!("{}  [{}]  {}", peer_id, roles.join(", "), meta.name);
                }
                Ok(RoleEvent::ServerError { details }) => {
                    eprintln!("server error: {}", details);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    listener.close().await?;
    Ok(())
}
