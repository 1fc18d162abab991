use anyhow::Context;
use hitbtc_ws::{init_logging, AuthMode, ClientConfig, Credentials, HitBtcClient, Outcome};
use std::time::Duration;

const OUTCOMES_TO_PRINT: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_logging(tracing::Level::INFO);

    let symbol = std::env::args().nth(1).unwrap_or_else(|| "BTCUSD".to_string());
    println!("📡 HitBTC WebSocket client - streaming {} ticker", symbol);

    let config = ClientConfig {
        silent: true,
        ..Default::default()
    };
    let mut client = HitBtcClient::new(config).context("invalid client configuration")?;

    let credentials = Credentials::from_env().ok();
    if let Some(credentials) = credentials {
        client = client.with_credentials(credentials);
    }

    client.start()?;
    if !client.wait_connected(Duration::from_secs(15)).await {
        client.stop().await;
        anyhow::bail!("could not connect within 15s");
    }
    println!("✅ Connected");

    if client.credentials_given() {
        client
            .login(None, None, AuthMode::Signed, None)
            .await
            .context("login failed")?;
    }
    client.subscribe_ticker(&symbol, false, None).await?;

    for _ in 0..OUTCOMES_TO_PRINT {
        match client.recv(true, Some(Duration::from_secs(30))).await {
            Ok(Outcome::StreamEvent { method, symbol, params }) => {
                println!("📊 {} {}: {}", method, symbol, serde_json::Value::Object(params));
            }
            Ok(outcome @ Outcome::ResponseSuccess { .. }) | Ok(outcome @ Outcome::ResponseFailure { .. }) => {
                if let Some(text) = hitbtc_ws::report::render(&outcome) {
                    println!("📝 {}", text);
                }
            }
            Ok(Outcome::Raw(text)) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ {}", e);
                break;
            }
        }
    }

    client.subscribe_ticker(&symbol, true, None).await.ok();
    client.stop().await;
    println!("👋 Disconnected");
    Ok(())
}
