use flare_device_sync::service::DeviceSyncApplication;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let app = DeviceSyncApplication::new(config_path.as_deref()).await?;

    info!("Starting flare-device-sync replay from stdin");
    let summary = app.run().await?;

    if summary.failed > 0 {
        anyhow::bail!("{} sync transcripts failed after retries", summary.failed);
    }
    Ok(())
}
