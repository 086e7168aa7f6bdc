use sato_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = match std::env::var("SATO_CONFIG") {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::default(),
    };
    config.apply_env()?;

    sato_observability::init_with_level(&config.app.log_level);

    if config.auth.secret.is_empty() {
        tracing::warn!("SATO_AUTH_SECRET not set; using insecure dev default");
        config.auth.secret = "dev-secret".to_string();
    }

    let server = sato_api::demo::build_demo(config)?.build()?;
    server.run().await
}
