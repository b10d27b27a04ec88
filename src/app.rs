use std::{
    fs::File,
    io::{self, BufWriter, Write},
    net::SocketAddr,
    path::Path,
};

use allreduce::{AllReduceClient, Coordinator};
use anyhow::Context;
use learner::{Gd, Output, Session, Stats};
use log::{info, warn};
use regressor::{ModelWriter, read_model};
use tokio::{net::TcpListener, runtime::Runtime, signal};

use crate::{
    config::{RunConfig, STDIO},
    source::{JsonLinesSource, SourceConfig},
};

/// Trains (or only predicts, when training is off) over the configured data.
///
/// # Returns
/// The statistics of the whole run.
pub fn train(config: &RunConfig) -> anyhow::Result<Stats> {
    config.validate()?;
    let mut gd_config = config.gd.clone();

    let model = match &config.initial_model {
        Some(path) => {
            let model = read_model(path)
                .with_context(|| format!("loading initial model {}", path.display()))?;
            gd_config.num_bits = Some(model.resolve_bits(gd_config.num_bits)?);

            for &(a, b) in &model.header.pairs {
                let pair = String::from_utf8_lossy(&[a, b]).into_owned();
                if !gd_config.pairs.contains(&pair) {
                    gd_config.pairs.push(pair);
                }
            }
            Some(model)
        }
        None => None,
    };

    let num_bits = gd_config.num_bits();
    let training = gd_config.training;
    let save_per_pass = gd_config.save_per_pass;
    let initial_t = gd_config.initial_t;

    let mut gd = Gd::new(gd_config).context("building the optimizer")?;
    if let Some(model) = &model {
        model.apply(gd.weights_mut())?;
        gd.extend_label_range(model.header.min_label, model.header.max_label);
    }

    if let Some(cluster) = &config.cluster {
        let client = AllReduceClient::connect(cluster.coordinator, cluster.node_id, cluster.nodes)
            .with_context(|| format!("joining the averaging group at {}", cluster.coordinator))?;
        gd = gd.with_averager(Box::new(client));
    }

    if config.final_model.is_some() || config.readable_model.is_some() {
        let options = serde_json::to_string(&config.reduction)?;
        let writer = ModelWriter::new(
            config.final_model.clone(),
            config.readable_model.clone(),
            options,
        )
        .per_pass(save_per_pass);
        gd = gd.with_checkpoint(Box::new(writer));
    }

    let reduction = config.reduction.build(gd, num_bits, training)?;

    let mut output = Output::new();
    if let Some(path) = &config.predictions {
        output = output.with_predictions(open_writer(path)?);
    }
    if let Some(path) = &config.raw_predictions {
        output = output.with_raw_predictions(open_writer(path)?);
    }

    let mut source = JsonLinesSource::spawn(source_config(config))?;

    let outcome = Session::new(reduction, output, initial_t).run(&mut source);
    let read = source.finish();

    let stats = outcome.context("training failed")?;
    read.context("reading examples failed")?;
    Ok(stats)
}

/// How the examples of a run are read. Label-dependent features never get the
/// constant feature, since it would be shared by every action of a group.
pub fn source_config(config: &RunConfig) -> SourceConfig {
    let ldf = config.reduction.is_ldf();
    if ldf && config.add_constant {
        warn!("turning off constant for label dependent features");
    }

    SourceConfig {
        data: config.data.clone(),
        passes: config.passes,
        cost_sensitive: config.reduction.is_cost_sensitive(),
        add_constant: config.add_constant && !ldf,
        capacity: config.reduction.ring_size,
    }
}

/// Serves one averaging group of `nodes` nodes on `addr` until every node left.
pub fn coordinate(addr: SocketAddr, nodes: usize) -> anyhow::Result<()> {
    let runtime = Runtime::new()?;

    runtime.block_on(async {
        let coordinator = Coordinator::new(nodes)?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;

        tokio::select! {
            ret = coordinator.serve(listener) => {
                ret?;
                info!("every node left, shutting down");
            }
            _ = signal::ctrl_c() => {
                info!("received SIGTERM");
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn open_writer(path: &Path) -> anyhow::Result<Box<dyn Write + Send>> {
    if path.as_os_str() == STDIO {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}
