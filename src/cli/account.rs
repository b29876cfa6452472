// CLI account commands: login, logout, status, start, clear

use std::io::{self, BufRead, Write};

use super::Context;
use crate::api::ApiMessage;
use crate::models::AuthMode;

fn print_ack(ack: &ApiMessage, fallback: &str) {
    if ack.message.is_empty() {
        println!("{}", fallback);
    } else {
        println!("{}", ack.message);
    }
}

/// autoapply login
pub async fn cmd_login(ctx: &Context) -> anyhow::Result<()> {
    let Some(credentials) = &ctx.credentials else {
        anyhow::bail!("Credentials required: pass --email and --password");
    };

    ctx.client.authenticate(credentials).await?;
    match ctx.client.mode() {
        AuthMode::CachedToken => println!("Logged in as {}.", credentials.identity),
        AuthMode::CredentialPerCall => {
            println!(
                "Credentials accepted for {}. In credential-per-call mode they are sent \
                 with every request; pass --email and --password to each command.",
                credentials.identity
            );
        }
    }
    Ok(())
}

/// autoapply logout
pub async fn cmd_logout(ctx: &Context) -> anyhow::Result<()> {
    ctx.client.logout().await?;
    println!("Logged out.");
    Ok(())
}

/// autoapply status
pub async fn cmd_status(ctx: &Context) -> anyhow::Result<()> {
    println!("Backend:  {}", ctx.client.base_url());

    match ctx.client.mode() {
        AuthMode::CredentialPerCall => {
            println!("Mode:     credential-per-call");
            match &ctx.credentials {
                Some(credentials) => println!("Identity: {}", credentials.identity),
                None => println!("Identity: none (pass --email and --password)"),
            }
        }
        AuthMode::CachedToken => {
            println!("Mode:     cached-token");
            if ctx.client.resume().await? {
                println!("Session:  authenticated (cached token)");
            } else {
                println!("Session:  not logged in (try: autoapply login)");
            }
        }
    }
    Ok(())
}

/// autoapply start
pub async fn cmd_start(ctx: &Context) -> anyhow::Result<()> {
    ctx.ensure_authenticated().await?;
    println!("Starting application session...");
    let ack = ctx
        .client
        .start_session(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start session: {}", e))?;
    print_ack(&ack, "Application session started successfully!");
    Ok(())
}

/// autoapply clear
pub async fn cmd_clear(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    if !yes {
        print!("Are you sure you want to delete all stored data for this account? [y/N] ");
        io::stdout().flush()?;
        let stdin = io::stdin();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        let answer = line.trim().to_lowercase();
        if answer != "y" && answer != "yes" {
            println!("Cancelled.");
            return Ok(());
        }
    }

    ctx.ensure_authenticated().await?;
    let ack = ctx.client.clear_data(None).await?;
    print_ack(&ack, "Data cleared.");
    Ok(())
}
