use finance_gateway::{config::Config, services::init_metrics, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        gateway_id = %config.gateway.id,
        enabled = config.gateway.enabled,
        "Starting finance gateway"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
