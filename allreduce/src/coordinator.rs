use std::sync::Arc;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::Barrier,
    task::JoinSet,
};

use crate::error::{AllReduceErr, Result};

/// The element-wise sum of the current round, shared by every node task.
struct Round {
    sum: Mutex<Vec<f32>>,
    barrier: Barrier,
}

impl Round {
    fn new(nodes: usize) -> Self {
        Self {
            sum: Mutex::new(Vec::new()),
            barrier: Barrier::new(nodes),
        }
    }

    /// Adds `values` into the round's sum, the first contribution sets its length.
    fn accumulate(&self, values: &[f32]) -> Result<()> {
        let mut sum = self.sum.lock();
        if sum.is_empty() {
            sum.resize(values.len(), 0.);
        }

        if sum.len() != values.len() {
            return Err(AllReduceErr::LengthMismatch {
                expected: sum.len(),
                got: values.len(),
            });
        }

        sum.par_iter_mut()
            .zip(values.par_iter())
            .for_each(|(s, v)| *s += v);
        Ok(())
    }

    /// Contributes `values` and waits until every node did, then writes the sum into `out`.
    async fn reduce(&self, values: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let accumulated = self.accumulate(values);
        self.barrier.wait().await;
        accumulated?;

        out.clear();
        out.extend_from_slice(&self.sum.lock());

        if self.barrier.wait().await.is_leader() {
            self.sum.lock().clear();
        }

        // nobody starts the next round before the sum is reset
        self.barrier.wait().await;
        Ok(())
    }
}

/// The star-topology center of a distributed averaging group.
///
/// Every round waits for a vector from each of the `nodes` nodes and replies
/// to all of them with the element-wise sum.
pub struct Coordinator {
    tasks: JoinSet<Result<()>>,
    nodes: usize,
    round: Arc<Round>,
}

impl Coordinator {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `nodes` - The fixed amount of nodes taking part in every round.
    ///
    /// # Errors
    /// `InvalidConfig` if `nodes` is zero.
    pub fn new(nodes: usize) -> Result<Self> {
        if nodes == 0 {
            return Err(AllReduceErr::InvalidConfig(
                "a group needs at least one node".into(),
            ));
        }

        Ok(Self {
            tasks: JoinSet::new(),
            nodes,
            round: Arc::new(Round::new(nodes)),
        })
    }

    /// Accepts exactly one connection per node and serves them until they leave.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        info!(nodes = self.nodes; "waiting for nodes on {}", listener.local_addr()?);

        for _ in 0..self.nodes {
            let (stream, addr) = listener.accept().await?;
            debug!("node connected from {addr}");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            self.spawn(rx, tx);
        }

        self.run().await.into_iter().collect()
    }

    /// Binds a new node to this coordinator and spawns its own task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, mut rx: FrameReceiver<R>, mut tx: FrameSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let nodes = self.nodes;
        let round = self.round.clone();

        let task = async move {
            let mut buf: Vec<f32> = Vec::new();
            let mut reduced = Vec::new();

            let node_id = match rx.recv_into(&mut buf).await? {
                Msg::Control(Command::Join { node_id, nodes: got }) if got == nodes => node_id,
                Msg::Control(Command::Join { nodes: got, .. }) => {
                    let err = AllReduceErr::GroupMismatch {
                        expected: nodes,
                        got,
                    };
                    tx.send(&Msg::Err(err.to_string().into())).await?;
                    return Err(err);
                }
                msg => return Err(unexpected(&msg)),
            };
            debug!(node_id = node_id; "node joined");

            loop {
                match rx.recv_into(&mut buf).await? {
                    Msg::Data(Payload::Partial(values)) => {
                        round.reduce(values, &mut reduced).await?;
                        tx.send(&Msg::Data(Payload::Reduced(&mut reduced))).await?;
                    }
                    Msg::Control(Command::Leave) => {
                        debug!(node_id = node_id; "node left");
                        return Ok(());
                    }
                    msg => {
                        warn!(node_id = node_id; "unexpected message {msg:?}");
                        return Err(unexpected(&msg));
                    }
                }
            }
        };

        self.tasks.spawn(task);
    }

    /// Runs every node task to completion.
    pub async fn run(self) -> Vec<Result<()>> {
        self.tasks.join_all().await
    }
}

fn unexpected(msg: &Msg) -> AllReduceErr {
    AllReduceErr::UnexpectedMessage {
        got: format!("{msg:?}"),
    }
}
