mod category;
mod config;
mod creds;
mod error;
mod export;
mod http;
mod interpreter;
mod logging;
mod price;
mod report;
mod session;
mod store;
mod supervisor;
mod transport;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::category::Classifier;
use crate::config::Args;
use crate::creds::CredentialStore;
use crate::http::AppState;
use crate::interpreter::Interpreter;
use crate::store::ExpenseStore;
use crate::supervisor::{LinkState, PairingNotifier, ReconnectPolicy, Supervisor};
use crate::transport::BridgeTransport;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    for dir in [
        &args.public_dir,
        &args.download_dir,
        &args.log_dir,
        &args.credentials_dir,
    ] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("failed to create directory {:?}: {}", dir, e);
            return ExitCode::FAILURE;
        }
    }

    let logs = logging::init(&args.log_dir);
    log::info!("Starting expense bot...");

    let classifier = match &args.categories {
        Some(path) => match Classifier::from_yaml_file(path) {
            Ok(classifier) => classifier,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Classifier::builtin(),
    };

    let store = match ExpenseStore::open(&args.database) {
        Ok(store) => store,
        Err(e) => {
            log::error!("failed to open database {:?}: {}", args.database, e);
            return ExitCode::FAILURE;
        }
    };

    let base_url = args.get_base_url();
    let creds = CredentialStore::new(args.credentials_dir.clone());
    let link = LinkState::new();
    let interpreter = Arc::new(Interpreter::new(
        store,
        classifier,
        args.download_dir.clone(),
        base_url.clone(),
    ));

    let notifier = args
        .get_notify_token()
        .zip(args.notify_chat_id)
        .map(|(token, chat_id)| PairingNotifier::new(&token, chat_id, base_url.clone()));

    let supervisor = Supervisor::new(
        Arc::new(BridgeTransport::new(args.bridge_command.clone())),
        creds.clone(),
        interpreter,
        link.clone(),
        notifier,
        ReconnectPolicy::default(),
    );

    let state = AppState {
        link,
        creds,
        logs,
        download_dir: args.download_dir.clone(),
    };
    let app = http::router(state);
    let addr = format!("0.0.0.0:{}", args.get_port());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("Status server listening on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            log::error!("http server error: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
        });
    }

    match supervisor.run(shutdown).await {
        Ok(()) => {
            log::info!("catatbot stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
