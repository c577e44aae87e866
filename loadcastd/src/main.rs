use std::{net::IpAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use loadcast::{
    ClientConfig, ForecastClient, LastValue, Listener, Scope, ServerConfig, matrix_from_rows,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Serves load forecasts over a small binary TCP protocol.
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Accept forecast requests until Ctrl-C, then wait for connected clients to leave
    Serve(ServeArgs),
    /// Send one load matrix to a running server and print the forecast
    Probe(ProbeArgs),
}

#[derive(Parser, Debug, Clone)]
struct ServeArgs {
    /// Address to bind. Overrides LOADCAST_BIND, defaults to all interfaces.
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on. Overrides LOADCAST_PORT, defaults to 6787.
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Parser, Debug, Clone)]
struct ProbeArgs {
    /// Server to ask.
    #[arg(long, default_value = "127.0.0.1:6787")]
    addr: String,

    /// One comma-separated load history per row, e.g. `1,2 3,4 5,6`.
    #[arg(required = true)]
    rows: Vec<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::new().filter_or("LOADCAST_LOG", "info");
    env_logger::Builder::from_env(env).init();

    let args = Args::parse();
    let scope = Scope::new("loadcastd");
    match args.command {
        Commands::Serve(serve_args) => serve(serve_args, &scope).await,
        Commands::Probe(probe_args) => probe(probe_args, &scope).await,
    }
}

async fn serve(args: ServeArgs, scope: &Scope) -> anyhow::Result<()> {
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_ip = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let listener = Listener::bind(&config, Arc::new(LastValue), scope).await?;
    listener
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C, serving until killed: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("All sessions finished, exiting");
    Ok(())
}

async fn probe(args: ProbeArgs, scope: &Scope) -> anyhow::Result<()> {
    let rows = args
        .rows
        .iter()
        .map(|row| parse_row(row))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let matrix = matrix_from_rows(rows)?;

    let mut client = ForecastClient::connect(&args.addr, ClientConfig::default(), scope)
        .await
        .with_context(|| format!("could not reach {}", args.addr))?;
    let predictions = client.predict(&matrix).await?;

    for (row, value) in predictions.iter().enumerate() {
        println!("{row}: {value}");
    }
    Ok(())
}

fn parse_row(row: &str) -> anyhow::Result<Vec<i32>> {
    row.split(',')
        .map(|cell| {
            cell.trim()
                .parse::<i32>()
                .with_context(|| format!("{cell:?} in row {row:?} is not a 32 bit integer"))
        })
        .collect()
}
