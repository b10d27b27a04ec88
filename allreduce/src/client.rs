use std::net::SocketAddr;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use learner::{AverageMode, HookErr, WeightAverager};
use log::{debug, info};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::{self, Runtime},
};

use crate::error::{AllReduceErr, Result};

/// A blocking handle on a distributed averaging group.
///
/// Drives its own single threaded runtime so the learner can call it from
/// plain synchronous code.
pub struct AllReduceClient {
    runtime: Runtime,
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
    buf: Vec<f32>,
    node_id: usize,
    nodes: usize,
}

impl AllReduceClient {
    /// Connects to the coordinator at `addr` and joins its group.
    ///
    /// # Arguments
    /// * `addr` - The coordinator's address.
    /// * `node_id` - This node's id within the group.
    /// * `nodes` - The size of the group.
    pub fn connect(addr: SocketAddr, node_id: usize, nodes: usize) -> Result<Self> {
        if node_id >= nodes {
            return Err(AllReduceErr::InvalidConfig(format!(
                "node id {node_id} out of a group of {nodes} nodes"
            )));
        }

        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let stream = runtime.block_on(TcpStream::connect(addr))?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        let (rx, mut tx) = comms::channel(rx, tx);
        runtime.block_on(tx.send(&Msg::Control(Command::Join { node_id, nodes })))?;
        info!(node_id = node_id, nodes = nodes; "joined averaging group at {addr}");

        Ok(Self {
            runtime,
            rx,
            tx,
            buf: Vec::new(),
            node_id,
            nodes,
        })
    }

    pub fn node_id(&self) -> usize {
        self.node_id
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Replaces `values` with their element-wise sum across every node.
    ///
    /// Blocks until every node of the group contributed.
    pub fn all_reduce(&mut self, values: &mut [f32]) -> Result<()> {
        let Self {
            runtime,
            rx,
            tx,
            buf,
            ..
        } = self;

        runtime.block_on(async {
            tx.send(&Msg::Data(Payload::Partial(values))).await?;

            match rx.recv_into(buf).await? {
                Msg::Data(Payload::Reduced(sum)) if sum.len() == values.len() => {
                    values.copy_from_slice(sum);
                    Ok(())
                }
                Msg::Data(Payload::Reduced(sum)) => Err(AllReduceErr::LengthMismatch {
                    expected: values.len(),
                    got: sum.len(),
                }),
                Msg::Err(reason) => Err(AllReduceErr::Rejected(reason.into_owned())),
                msg => Err(AllReduceErr::UnexpectedMessage {
                    got: format!("{msg:?}"),
                }),
            }
        })
    }

    /// Averages a strided weight array across the group.
    ///
    /// # Arguments
    /// * `weights` - The weight array, `stride` slots per logical weight.
    /// * `stride` - The amount of slots per logical weight.
    /// * `mode` - Plain averages every slot. Adaptive weights each node's
    ///   primary weight by its share of the summed accumulators, which live in
    ///   the second slot.
    pub fn average_weights(
        &mut self,
        weights: &mut [f32],
        stride: usize,
        mode: AverageMode,
    ) -> Result<()> {
        debug!(len = weights.len(); "averaging weights in {mode:?} mode");

        match mode {
            AverageMode::Plain => {
                self.all_reduce(weights)?;
                let nodes = self.nodes as f32;
                weights.iter_mut().for_each(|w| *w /= nodes);
            }
            AverageMode::Adaptive => {
                if stride < 2 {
                    return Err(AllReduceErr::InvalidConfig(
                        "adaptive averaging needs an accumulator slot per weight".into(),
                    ));
                }

                let mut totals: Vec<f32> = weights.chunks(stride).map(|slot| slot[1]).collect();
                self.all_reduce(&mut totals)?;

                for (slot, &total) in weights.chunks_mut(stride).zip(&totals) {
                    if total > 0. {
                        let share = slot[1] / total;
                        slot[0] *= share;
                        slot[1] *= share;
                    } else {
                        slot[0] = 0.;
                        slot[1] = 0.;
                    }
                }

                self.all_reduce(weights)?;
            }
        }
        Ok(())
    }
}

impl WeightAverager for AllReduceClient {
    fn average(
        &mut self,
        weights: &mut [f32],
        stride: usize,
        mode: AverageMode,
    ) -> std::result::Result<(), HookErr> {
        Ok(self.average_weights(weights, stride, mode)?)
    }
}

impl Drop for AllReduceClient {
    fn drop(&mut self) {
        let Self { runtime, tx, .. } = self;
        if let Err(e) = runtime.block_on(tx.send(&Msg::Control(Command::Leave))) {
            debug!("failed to leave the averaging group: {e}");
        }
    }
}
