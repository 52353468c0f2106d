#[tokio::main]
async fn main() -> anyhow::Result<()> {
    event_backend::start_server().await
}
