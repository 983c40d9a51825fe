use flowchat::config::{load_server_config, ServerConfig};
use flowchat::executor::{HttpProxyClient, NodeExecutor};
use flowchat::orchestration::{ChatOrchestrator, ChatSettings};
use flowchat::provider::{HttpChatProvider, ProviderKind};
use flowchat::server::{serve, ChatEndpoint};
use flowchat::shared::EventLog;
use flowchat::store::SqliteFlowStore;
use std::path::PathBuf;
use std::sync::Arc;

fn build_endpoint(config: &ServerConfig, log: &EventLog) -> Result<ChatEndpoint, String> {
    let store = Arc::new(SqliteFlowStore::open(&config.database_path).map_err(|e| e.to_string())?);
    let proxy = Arc::new(HttpProxyClient::new(
        &config.proxy.base_url,
        config.proxy_service_key(),
        config.http_timeout(),
    ));
    let executor = Arc::new(NodeExecutor::new(
        proxy,
        store.clone(),
        config.http_timeout(),
    ));

    let mut provider = HttpChatProvider::new(config.http_timeout());
    for kind in ProviderKind::ALL {
        if let Some(url) = config.providers.base_url(kind) {
            provider = provider.with_base_url(kind, url);
        }
    }

    let orchestrator = ChatOrchestrator::new(
        store,
        Arc::new(provider),
        executor,
        log.clone(),
        ChatSettings {
            temperature: config.temperature,
            fallback_key_env_vars: config.fallback_key_env_vars.clone(),
        },
    );
    Ok(ChatEndpoint::new(Arc::new(orchestrator)))
}

async fn run() -> Result<(), String> {
    let cli_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        load_server_config(cli_path, |name| std::env::var(name).ok()).map_err(|e| e.to_string())?;
    let log = EventLog::from_config(config.log_path.as_deref());
    let endpoint = build_endpoint(&config, &log)?;

    log.info(
        "server.started",
        &format!("listening on {}", config.bind_address),
    );
    serve(&config.bind_address, Arc::new(endpoint))
        .await
        .map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
