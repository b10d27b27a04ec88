use std::{env, net::SocketAddr, path::Path};

use anyhow::{Context, bail};
use log::info;

use online_reductions::{RunConfig, coordinate, train};

const USAGE: &str = "usage: online-reductions <train <config.json> | coordinator <addr> <nodes>>";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("train") => {
            let path = args.next().context(USAGE)?;
            let config = RunConfig::load(Path::new(&path))?;

            let stats = train(&config)?;
            info!(
                examples = stats.example_number,
                average_loss = stats.average_loss();
                "done"
            );
        }
        Some("coordinator") => {
            let addr = args
                .next()
                .context(USAGE)?
                .parse::<SocketAddr>()
                .context("invalid coordinator address")?;
            let nodes = args
                .next()
                .context(USAGE)?
                .parse::<usize>()
                .context("invalid amount of nodes")?;

            coordinate(addr, nodes)?;
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
