mod clock;
mod hardware;
mod host;
mod service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
