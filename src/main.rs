use std::env;

use anyhow::{Context, Result, bail};
use solar_proxy::token_manager::locate_token;
use solar_proxy::{Envelope, Settings, Token, Upstream, UpstreamClient};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("");
    if !matches!(command, "login" | "fetch") {
        eprintln!("Usage: {} <login|fetch>", args[0]);
        eprintln!("  login: log in once and show where the token was found");
        eprintln!("  fetch: log in, then fetch power data once and print the response");
        std::process::exit(1);
    }

    let settings = Settings::from_env();
    let Some(credentials) = settings.credentials else {
        bail!("Missing credentials: set API_ACCESS_KEY, API_APPKEY, USER_ACCOUNT and USER_PASSWORD");
    };

    let client = UpstreamClient::new(settings.gateway).context("Failed to build HTTP client")?;

    println!("Gateway: {}", client.config().base_url);
    println!("User: {}", credentials.account);

    let response = client
        .login(&credentials)
        .await
        .context("Login request failed")?;
    let envelope = Envelope::from_value(&response);

    println!("result_code: {}", envelope.code());
    println!(
        "result_msg: {}",
        envelope.result_msg.as_deref().unwrap_or("N/A")
    );

    let location = locate_token(&response);
    let Some(raw_token) = location.token() else {
        println!("No token found in response!");
        println!("{}", serde_json::to_string_pretty(&response)?);
        std::process::exit(1);
    };
    let token = Token::new(raw_token);
    println!("Token location: {}", location.describe());
    println!(
        "Token: {}... (truncated, length: {})",
        token.preview(),
        token.as_str().len()
    );

    if command == "fetch" {
        let data = client
            .fetch_power_data(&token, &credentials)
            .await
            .context("Power data request failed")?;
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}
