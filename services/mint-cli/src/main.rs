use anyhow::Context;
use em_chain_client::JsonRpcTransport;
use em_chain_http::HttpTransport;
use em_mint_core::{MintWorkflow, ViewModel};
use em_session::{
    FileSessionCache, InjectedBackend, ProviderRegistry, SessionProvider, UAuthBackend,
};
use std::sync::Arc;
use tracing::info;

mod config;
mod terminal;

use config::{AppConfig, COLLECTION_URL};
use terminal::{Console, interruptible};

const HELP: &str = "commands: connect | mint | refresh | disconnect | status | help | quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env().context("reading EPICMINT_* configuration")?;
    let abi = Arc::new(config.load_abi().await?);
    let console = Arc::new(Console::new());

    let wallet: Arc<dyn JsonRpcTransport> =
        Arc::new(HttpTransport::new(Some(config.wallet_url.clone())));
    let reader: Arc<dyn JsonRpcTransport> =
        Arc::new(HttpTransport::new(Some(config.rpc_url.clone())));

    let registry = em_session::install(
        ProviderRegistry::default()
            .with(Arc::new(InjectedBackend::new("Browser wallet", wallet.clone())))
            .with(Arc::new(UAuthBackend::new(
                config.uauth.clone(),
                console.clone(),
                wallet,
            ))),
    );
    let provider = SessionProvider::new(
        registry,
        Arc::new(FileSessionCache::new(&config.session_cache)),
        console.clone(),
    );

    let total_supply = config.settings.total_supply;
    let workflow = Arc::new(
        MintWorkflow::new(config.settings.clone(), abi, provider, reader, console.clone())
            .context("binding the NFT contract")?,
    );
    info!(
        rpc = %config.rpc_url,
        wallet = %config.wallet_url,
        contract = %config.settings.contract_address,
        "mint-cli starting"
    );

    println!("My NFT Collection");
    println!("Each unique. Each beautiful. Discover your NFT today.");
    println!("View collection: {COLLECTION_URL}");
    println!("{HELP}");

    workflow.initial_load().await;

    let mut ui = workflow.subscribe_ui();
    let renderer = tokio::spawn(async move {
        loop {
            let view = ViewModel::render(&ui.borrow_and_update(), total_supply);
            println!("{view}");
            if ui.changed().await.is_err() {
                break;
            }
        }
    });

    loop {
        let Some(line) = interruptible(console.read_line(), tokio::signal::ctrl_c())
            .await
            .flatten()
        else {
            break;
        };

        match line.trim() {
            "connect" | "c" => {
                match interruptible(workflow.connect(), tokio::signal::ctrl_c()).await {
                    Some(Ok(_)) => {}
                    Some(Err(err)) => console.notice(&format!("connect failed: {err}")),
                    None => break,
                }
            }
            "mint" | "m" => {
                let workflow = workflow.clone();
                let console = console.clone();
                tokio::spawn(async move {
                    match workflow.mint().await {
                        Ok(report) => console.notice(&format!(
                            "Mined, see transaction: {}",
                            report.explorer_url
                        )),
                        Err(err) => console.notice(&format!("mint failed: {err}")),
                    }
                });
            }
            "refresh" | "r" => {
                if let Err(err) = workflow.refresh_count().await {
                    console.notice(&format!("could not read minted count: {err}"));
                }
            }
            "disconnect" | "d" => {
                if let Err(err) = workflow.disconnect().await {
                    console.notice(&format!("disconnect incomplete: {err}"));
                }
            }
            "status" | "s" => println!("{}", workflow.view()),
            "help" | "h" | "" => println!("{HELP}"),
            "quit" | "q" | "exit" => break,
            other => console.notice(&format!("unknown command '{other}'; {HELP}")),
        }
    }

    renderer.abort();
    info!("mint-cli stopped");
    Ok(())
}
