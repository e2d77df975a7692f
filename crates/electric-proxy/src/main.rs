use electric_core::ProxyConfig;
use electric_proxy::ElectricProxy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ProxyConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.report());
            std::process::exit(1);
        }
    };

    let default_filter = if config.trace_frames { "debug,electric_proxy=trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let proxy = ElectricProxy::new(config);
    tokio::select! {
        result = proxy.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    Ok(())
}
