// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use takion_rp_core::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    codec::b64_decode,
    discovery,
    registration,
    session::Session,
    takion::events::NullEvents,
    wake,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = resolve_config_path("config/default.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let _init_logger = init_logger(&cfg.runtime.logger_config_path)?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("discover") => cmd_discover(&cfg).await,
        Some("wake") => cmd_wake(&cfg, args).await,
        Some("register") => cmd_register(&cfg, args).await,
        Some("connect") => cmd_connect(&cfg, args).await,
        _ => {
            eprintln!(
                "usage: takion-rp <discover|wake <address>|register <address> <pin> \
                 <psn-account-b64>|connect <address> [console-version]>"
            );
            Ok(())
        },
    }
}

async fn cmd_discover(cfg: &Config) -> Result<()> {
    let results = discovery::scan(&cfg.discovery, cfg.discovery.long_scan_duration, None, None)
        .await
        .context("discovery scan")?;
    for console in results.snapshot() {
        info!(
            "{} host_id={:?} ready={} request_port={}",
            console.address, console.host_id, console.is_ready, console.request_port
        );
    }
    Ok(())
}

async fn cmd_wake(cfg: &Config, mut args: impl Iterator<Item = String>) -> Result<()> {
    let address: Ipv4Addr = args
        .next()
        .context("usage: wake <address>")?
        .parse()
        .context("parsing address")?;

    let session = Session::new(cfg.clone()).await?;
    let unified = session.credentials().get_unified(&address.to_string()).await?;
    let result = wake::send_wake(
        address,
        cfg.discovery.ps5_port,
        &unified.wake_credential_dec,
        cfg.wake.send_timeout,
    )
    .await;
    info!("wake result for {address}: {result:?}");
    Ok(())
}

async fn cmd_register(cfg: &Config, mut args: impl Iterator<Item = String>) -> Result<()> {
    let address: Ipv4Addr = args
        .next()
        .context("usage: register <address> <pin> <psn-account-b64>")?
        .parse()
        .context("parsing address")?;
    let pin = args.next().context("missing PIN argument")?;
    let psn_account_b64 = args.next().context("missing PSN account id argument")?;

    let decoded = b64_decode(&psn_account_b64).context("decoding PSN account id")?;
    if decoded.len() != 8 {
        bail!("PSN account id must decode to exactly 8 bytes, got {}", decoded.len());
    }
    let mut psn_account_le8 = [0u8; 8];
    psn_account_le8.copy_from_slice(&decoded);

    let record = registration::register(
        address,
        &pin,
        psn_account_le8,
        &cfg.registration,
        &cfg.takion,
        cfg.takion.ps5_version_threshold,
    )
    .await
    .context("registration exchange")?;

    let session = Session::new(cfg.clone()).await?;
    session.credentials().upsert_complete(record).await.context("persisting credential record")?;
    info!("registered {address}");
    Ok(())
}

async fn cmd_connect(cfg: &Config, mut args: impl Iterator<Item = String>) -> Result<()> {
    let address: Ipv4Addr = args
        .next()
        .context("usage: connect <address> [console-version]")?
        .parse()
        .context("parsing address")?;
    let console_version: u8 =
        args.next().map(|v| v.parse()).transpose()?.unwrap_or(cfg.takion.ps5_version_threshold);

    let session = Session::new(cfg.clone()).await?;
    session.start(address, console_version, Arc::new(NullEvents), None).await.context("start_session")?;
    info!("connected to {address}; running for 30s before disconnecting");
    tokio::time::sleep(Duration::from_secs(30)).await;
    session.stop().await.context("stopping session")?;
    Ok(())
}
