use tristar_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    // Create a channel for shutdown signaling
    let (shutdown_tx, _) = broadcast::channel(1);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    if let Err(e) = tristar_bridge::app(options, shutdown_tx).await {
        error!("Application error: {:?}", e);
        std::process::exit(255);
    }
}
