use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use learner::{GdConfig, ReductionConfig};
use serde::{Deserialize, Serialize};

/// Path meaning standard input or output.
pub const STDIO: &str = "-";

/// Where this node's averaging group meets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub coordinator: SocketAddr,
    pub node_id: usize,
    pub nodes: usize,
}

/// Everything a training run needs, loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub gd: GdConfig,
    pub reduction: ReductionConfig,
    /// JSON lines examples, `-` reads standard input.
    pub data: PathBuf,
    /// One prediction per line, `-` writes standard output.
    pub predictions: Option<PathBuf>,
    pub raw_predictions: Option<PathBuf>,
    pub initial_model: Option<PathBuf>,
    pub final_model: Option<PathBuf>,
    pub readable_model: Option<PathBuf>,
    pub passes: usize,
    /// Adds the constant feature to every example.
    pub add_constant: bool,
    pub cluster: Option<ClusterConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            gd: GdConfig::default(),
            reduction: ReductionConfig::default(),
            data: PathBuf::from(STDIO),
            predictions: None,
            raw_predictions: None,
            initial_model: None,
            final_model: None,
            readable_model: None,
            passes: 1,
            add_constant: true,
            cluster: None,
        }
    }
}

impl RunConfig {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing configuration {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the run level settings, the learner validates its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.passes == 0 {
            bail!("passes must be at least 1");
        }
        if self.passes > 1 && self.reads_stdin() {
            bail!("multiple passes need a data file, standard input can only be read once");
        }

        if let Some(cluster) = &self.cluster
            && cluster.node_id >= cluster.nodes
        {
            bail!(
                "node id {} out of a group of {} nodes",
                cluster.node_id,
                cluster.nodes
            );
        }
        Ok(())
    }

    pub fn reads_stdin(&self) -> bool {
        self.data.as_os_str() == STDIO
    }
}

#[cfg(test)]
mod tests {
    use learner::{
        ReductionKind,
        reductions::{LdfAlgorithm, LdfLayout},
    };

    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "gd": {"num_bits": 10, "adaptive": true},
                "reduction": {"strategy": {"kind": "ldf", "layout": "multiline", "algorithm": "wap"}},
                "data": "train.jsonl"
            }"#,
        )
        .unwrap();

        assert_eq!(config.gd.num_bits, Some(10));
        assert!(config.gd.adaptive);
        assert_eq!(config.gd.eta, 0.5);
        assert_eq!(
            config.reduction.strategy,
            ReductionKind::Ldf {
                layout: LdfLayout::Multiline,
                algorithm: LdfAlgorithm::Wap,
            }
        );
        assert_eq!(config.reduction.ring_size, 256);
        assert_eq!(config.passes, 1);
        assert!(config.add_constant);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stdin_is_read_once() {
        let config = RunConfig {
            passes: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_outside_the_group() {
        let config = RunConfig {
            cluster: Some(ClusterConfig {
                coordinator: "127.0.0.1:7000".parse().unwrap(),
                node_id: 3,
                nodes: 3,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
