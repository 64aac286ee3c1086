use std::{env, io, num::NonZeroUsize};

use comms::{LocalGroup, TcpGroup};
use futures::future;
use log::info;
use tokio::signal;

use trainer::{TrainReport, TrainerConfig};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1:29500";
const USAGE: &str = "usage: trainer <config.json> [--local <ranks>]";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let (config_path, local) = parse_args(env::args().skip(1))?;
    let config = TrainerConfig::load(&config_path)?;

    tokio::select! {
        ret = launch(config, local) => {
            let report = ret?;
            info!(
                "wrapping up after {} steps, {} checkpoints written",
                report.metrics.steps, report.metrics.checkpoints
            );
        }
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
        }
    }

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> io::Result<(String, Option<NonZeroUsize>)> {
    let mut config_path = None;
    let mut local = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--local" => {
                let ranks = args.next().and_then(|n| n.parse().ok()).ok_or_else(usage)?;
                local = Some(ranks);
            }
            _ if config_path.is_none() => config_path = Some(arg),
            _ => return Err(usage()),
        }
    }

    config_path.map(|path| (path, local)).ok_or_else(usage)
}

fn usage() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, USAGE)
}

fn env_var(name: &str, default: usize) -> io::Result<usize> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{name}={raw}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

/// Trains as one rank of a group described by `RANK`, `WORLD_SIZE` and `MASTER_ADDR`, or as
/// every rank of an in-process group when `local` is given.
async fn launch(config: TrainerConfig, local: Option<NonZeroUsize>) -> io::Result<TrainReport> {
    if let Some(ranks) = local {
        return launch_local(config, ranks).await;
    }

    let world_size = env_var("WORLD_SIZE", 1)?;
    if world_size <= 1 {
        let mut group = LocalGroup::solo();
        return Ok(trainer::run(config, &mut group).await?);
    }

    let rank = env_var("RANK", 0)?;
    let master_addr = env::var("MASTER_ADDR").unwrap_or_else(|_| DEFAULT_MASTER_ADDR.to_string());
    info!("rank {rank} of {world_size} joining the group at {master_addr}");

    let mut group = TcpGroup::connect(rank, world_size, &master_addr).await?;
    let report = trainer::run(config, &mut group).await?;
    group.close().await;

    Ok(report)
}

async fn launch_local(config: TrainerConfig, ranks: NonZeroUsize) -> io::Result<TrainReport> {
    info!("running {ranks} ranks in process");

    let ranks = LocalGroup::new(ranks).into_iter().map(|mut group| {
        let config = config.clone();
        async move {
            tokio::spawn(async move { trainer::run(config, &mut group).await })
                .await
                .map_err(io::Error::other)?
                .map_err(io::Error::from)
        }
    });

    future::try_join_all(ranks)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| io::Error::other("no ranks to run"))
}
