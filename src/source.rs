use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader},
    mem,
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use anyhow::{Context, anyhow};
use learner::{
    Cost, CostLabel, Example, ExampleSource, Feature, Fetch, Label, SimpleLabel,
    example::{CONSTANT_HASH, CONSTANT_NAMESPACE},
};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::config::STDIO;

/// How the reader thread turns lines into examples.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// JSON lines file, `-` reads standard input.
    pub data: PathBuf,
    pub passes: usize,
    /// Parse `costs` labels instead of scalar ones.
    pub cost_sensitive: bool,
    pub add_constant: bool,
    /// Bound on the amount of parsed examples waiting for the learner.
    pub capacity: usize,
}

/// One example line.
///
/// `{"label": 1.0, "weight": 1.0, "features": {"a": [[123, 1.0]]}}` for scalar
/// labels, `{"costs": [[1, 0.5], [2, null]], ...}` for cost-sensitive ones.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Line {
    label: Option<f32>,
    weight: Option<f32>,
    initial: Option<f32>,
    costs: Option<Vec<(u32, Option<f32>)>>,
    features: BTreeMap<String, Vec<(u64, f32)>>,
}

/// Parses lines into examples, reusing the ones handed back by the learner.
struct LineParser {
    cost_sensitive: bool,
    add_constant: bool,
    scratch: Vec<Feature>,
}

impl LineParser {
    fn parse(&mut self, raw: &str, mut ec: Example) -> anyhow::Result<Example> {
        let line: Line = if raw.trim().is_empty() {
            Line::default()
        } else {
            serde_json::from_str(raw)?
        };

        ec.clear();
        let previous = mem::take(&mut ec.label);
        ec.label = self.label(&line, previous)?;

        for (name, features) in &line.features {
            // a namespace is named by its first byte, the empty name is the default one
            let id = name.bytes().next().unwrap_or(b' ');
            self.scratch.clear();
            self.scratch
                .extend(features.iter().map(|&(index, value)| Feature::new(index, value)));
            ec.add_namespace(id, &self.scratch);
        }

        if self.add_constant {
            ec.add_namespace(CONSTANT_NAMESPACE, &[Feature::new(CONSTANT_HASH, 1.)]);
        }
        Ok(ec)
    }

    fn label(&self, line: &Line, previous: Label) -> anyhow::Result<Label> {
        if !self.cost_sensitive {
            if line.costs.is_some() {
                return Err(anyhow!("cost label given to a scalar reduction"));
            }

            return Ok(Label::Simple(SimpleLabel {
                label: line.label,
                weight: line.weight.unwrap_or(1.),
                initial: line.initial.unwrap_or(0.),
            }));
        }

        if line.label.is_some() {
            return Err(anyhow!("scalar label given to a cost-sensitive reduction"));
        }

        let mut label = match previous {
            Label::Costs(mut label) => {
                label.clear();
                label
            }
            Label::Simple(_) => CostLabel::default(),
        };
        for &(class, cost) in line.costs.iter().flatten() {
            label.costs.push(match cost {
                Some(cost) => Cost::new(class, cost),
                None => Cost::unknown(class),
            });
        }
        Ok(Label::Costs(label))
    }
}

/// Examples read from JSON lines by a dedicated thread.
///
/// The learner never blocks on the reader: an empty queue is reported as
/// `Fetch::Pending` until the reader either produces or finishes.
pub struct JsonLinesSource {
    rx: mpsc::Receiver<Example>,
    pool: mpsc::UnboundedSender<Example>,
    reader: JoinHandle<anyhow::Result<u64>>,
}

impl JsonLinesSource {
    /// Starts the reader thread.
    pub fn spawn(config: SourceConfig) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let (pool, pool_rx) = mpsc::unbounded_channel();

        let reader = thread::Builder::new()
            .name("example-reader".into())
            .spawn(move || read_passes(config, tx, pool_rx))
            .context("spawning the example reader")?;

        Ok(Self { rx, pool, reader })
    }

    /// Stops the reader and reports how it ended.
    ///
    /// # Returns
    /// The amount of lines read across every pass.
    pub fn finish(self) -> anyhow::Result<u64> {
        let Self { rx, reader, .. } = self;
        // a blocked reader wakes up once the queue is gone
        drop(rx);

        reader
            .join()
            .map_err(|_| anyhow!("the example reader panicked"))?
    }
}

impl ExampleSource for JsonLinesSource {
    fn next_example(&mut self) -> Fetch {
        match self.rx.try_recv() {
            Ok(ec) => Fetch::Ready(ec),
            Err(TryRecvError::Empty) => Fetch::Pending,
            Err(TryRecvError::Disconnected) => Fetch::Done,
        }
    }

    fn recycle(&mut self, ec: Example) {
        // the reader may be gone already, the example is then simply dropped
        let _ = self.pool.send(ec);
    }
}

fn open(data: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if data.as_os_str() == STDIO {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }

    let file =
        File::open(data).with_context(|| format!("opening examples {}", data.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn read_passes(
    config: SourceConfig,
    tx: mpsc::Sender<Example>,
    mut pool: mpsc::UnboundedReceiver<Example>,
) -> anyhow::Result<u64> {
    let mut parser = LineParser {
        cost_sensitive: config.cost_sensitive,
        add_constant: config.add_constant,
        scratch: Vec::new(),
    };
    let mut lines = 0;

    for pass in 0..config.passes {
        debug!(pass = pass; "reading {}", config.data.display());

        for (number, raw) in open(&config.data)?.lines().enumerate() {
            let raw = raw.with_context(|| format!("reading line {}", number + 1))?;
            lines += 1;

            let ec = pool.try_recv().unwrap_or_default();
            let mut ec = match parser.parse(&raw, ec) {
                Ok(ec) => ec,
                Err(e) => {
                    warn!(line = number + 1; "skipping malformed example: {e}");
                    continue;
                }
            };
            ec.pass = pass;

            if tx.blocking_send(ec).is_err() {
                debug!("the learner stopped pulling examples");
                return Ok(lines);
            }
        }
    }

    info!(lines = lines, passes = config.passes; "finished reading examples");
    Ok(lines)
}
