// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use anyhow::Result;
use clap::Parser;
use conjure::{EngineConfig, ExecutionEngine};
use conjure_server::{create_routes, AppState, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "conjure-server",
    about = "Serves operations that are generated on first request"
)]
struct Cli {
    /// TOML file overriding engine settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR")]
    addr: Option<SocketAddr>,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = ServerConfig::from_env()?;
    if let Some(path) = &cli.config {
        let model = config.engine.synthesis.model.clone();
        config.engine = EngineConfig::from_file(path)?;
        config.engine.synthesis.model = model;
        info!(path = %path.display(), "loaded engine config");
    }
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }

    let client = conjure_llm::build_client(&config.provider)?;
    info!(
        provider = client.provider_name(),
        model = %config.provider.model,
        categories = ?config.categories,
        "code generation backend ready"
    );
    let engine = ExecutionEngine::with_client(client, config.engine.clone())?;
    let app = create_routes(AppState::new(engine, config.categories.clone()));

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, addr = %config.addr, "bind failed, using ephemeral");
            tokio::net::TcpListener::bind("127.0.0.1:0").await?
        }
    };
    let local = listener.local_addr()?;
    info!(%local, "conjure listening");

    tokio::select! {
        res = axum::serve(listener, app) => res?,
        _ = tokio::signal::ctrl_c() => {}
    }
    info!("conjure-server shutting down");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
