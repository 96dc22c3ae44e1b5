use anyhow::Context;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

use wlk_core::{
    harness::{link_windows, pump_client, TEST_APP_ORIGIN, TEST_WALLET_ORIGIN},
    http_session::HttpSessionClient,
    relay::RelayBridge,
    types::new_request_id,
    wallet::LocalWallet,
    ClientConfig, RelayConfig, Responder, RpcClient,
};
use wlk_proto::{Message, Payload, SignMessagePayload};

const RELAY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage:");
        eprintln!("  wlk-demo relay-request <base_url> [message]");
        eprintln!("  wlk-demo relay-wallet <base_url> <session>");
        eprintln!("  wlk-demo popup [message]");
        std::process::exit(2);
    }
    match args[1].as_str() {
        "relay-request" => {
            let base_url = args.get(2).context("missing base_url")?;
            let message = args.get(3).map(String::as_str).unwrap_or("hello from wlk-demo");
            run_relay_request(base_url, message).await
        }
        "relay-wallet" => {
            let base_url = args.get(2).context("missing base_url")?;
            let session = args.get(3).context("missing session")?;
            run_relay_wallet(base_url, session).await
        }
        "popup" => {
            let message = args.get(2).map(String::as_str).unwrap_or("hello from wlk-demo");
            run_popup(message).await
        }
        _ => {
            anyhow::bail!("unknown mode");
        }
    }
}

async fn run_relay_request(base_url: &str, text: &str) -> anyhow::Result<()> {
    let client = HttpSessionClient::new(base_url)?;
    if !client.health().await {
        anyhow::bail!("session store at {base_url} is not healthy");
    }

    let request = Message::new(
        new_request_id(),
        TEST_APP_ORIGIN,
        Payload::SignMessage(SignMessagePayload::request(text.as_bytes().to_vec())),
    );
    let session = client.create_session(&request).await?;
    println!("SESSION={session}");
    println!("Run: wlk-demo relay-wallet {base_url} {session}");

    let response = client.await_response(&session, RELAY_RESPONSE_TIMEOUT).await?;
    if let Some(error) = response.error() {
        anyhow::bail!("wallet refused: {error}");
    }
    match response.payload() {
        Some(Payload::SignMessage(p)) => {
            let signature = p.signature.as_ref().context("response carries no signature")?;
            println!("SIGNATURE_HEX={}", hex::encode(signature));
            Ok(())
        }
        other => anyhow::bail!("unexpected response payload: {other:?}"),
    }
}

async fn run_relay_wallet(base_url: &str, session: &str) -> anyhow::Result<()> {
    let config = RelayConfig::new(base_url);
    config.validate()?;

    let wallet = Arc::new(LocalWallet::generate().with_trust_all());
    wallet.set_authenticated(true);
    println!("WALLET_PUBKEY_HEX={}", wallet.key());

    let store = Arc::new(HttpSessionClient::from_config(&config)?);
    let bridge = RelayBridge::from_config(store, Arc::new(Responder::new(wallet)), &config);
    let receipt = bridge.run(session).await?;
    info!(id = %receipt.request_id, success = receipt.success, "relay session served");
    println!("ACK={}", receipt.ack);
    Ok(())
}

async fn run_popup(text: &str) -> anyhow::Result<()> {
    let wallet = Arc::new(LocalWallet::generate().with_trust_all());
    wallet.set_authenticated(true);

    let responder = Arc::new(Responder::new(wallet.clone()));
    let (opener, inbox) = link_windows(TEST_APP_ORIGIN, TEST_WALLET_ORIGIN, responder);
    let client = Arc::new(RpcClient::new(
        ClientConfig::new(TEST_WALLET_ORIGIN, TEST_APP_ORIGIN),
        opener,
    ));
    let pump = pump_client(client.clone(), inbox);

    let key = client.request_public_key().await?;
    println!("PUBKEY_HEX={key}");

    let signature = client.request_sign_message(text.as_bytes().to_vec()).await?;
    println!("SIGNATURE_HEX={}", hex::encode(signature));

    let stats = client.stats().snapshot();
    info!(handshakes = stats.handshakes, resolved = stats.resolved, "popup demo finished");
    pump.abort();
    Ok(())
}
