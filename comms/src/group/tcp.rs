use std::{io, time::Duration};

use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::{Communicator, ROOT, length_mismatch};
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

const CONNECT_ATTEMPTS: usize = 60;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

enum Role {
    /// Channels to every other rank, the i-th entry belongs to rank `i + 1`.
    Root { peers: Vec<(NetRx, NetTx)> },
    Peer { root: (NetRx, NetTx) },
}

/// A process group spanning several processes, connected in a star around the root.
///
/// The root listens on the master address and every other rank dials it. Reductions are
/// computed by the root, always adding contributions in rank order, so every rank receives
/// exactly the same bits.
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    role: Role,
    rx_buf: Vec<f32>,
}

impl TcpGroup {
    /// Joins (or, for rank 0, hosts) a process group.
    ///
    /// # Arguments
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of processes in the group.
    /// * `master_addr` - The address the root listens on.
    ///
    /// # Returns
    /// The connected group, or an io error if the rendezvous fails.
    pub async fn connect(rank: usize, world_size: usize, master_addr: &str) -> io::Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("rank {rank} is out of range for a world of size {world_size}"),
            ));
        }

        let role = if rank == ROOT {
            Self::host(world_size, master_addr).await?
        } else {
            Self::join(rank, master_addr).await?
        };

        info!("rank {rank}/{world_size} joined the process group at {master_addr}");

        Ok(Self {
            rank,
            world_size,
            role,
            rx_buf: Vec::new(),
        })
    }

    /// Accepts a connection from every other rank and sorts them by rank.
    async fn host(world_size: usize, master_addr: &str) -> io::Result<Role> {
        let listener = TcpListener::bind(master_addr).await?;
        info!("waiting for {} rank(s) at {master_addr}", world_size - 1);

        let mut slots: Vec<Option<(NetRx, NetTx)>> = (1..world_size).map(|_| None).collect();
        let mut rx_buf: Vec<u32> = Vec::new();
        let mut missing = world_size - 1;

        while missing > 0 {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            let (mut rx, tx) = crate::channel(rx, tx);

            let rank = match rx.recv_into(&mut rx_buf).await? {
                Msg::Control(Command::Hello { rank }) => rank,
                msg => return unexpected(&msg),
            };

            let slot = rank
                .checked_sub(1)
                .and_then(|i| slots.get_mut(i))
                .filter(|slot| slot.is_none())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid or duplicated rank {rank} from {addr}"),
                    )
                })?;

            debug!("rank {rank} connected from {addr}");
            *slot = Some((rx, tx));
            missing -= 1;
        }

        let peers = slots.into_iter().flatten().collect();
        Ok(Role::Root { peers })
    }

    /// Dials the root until it's up and introduces this rank.
    async fn join(rank: usize, master_addr: &str) -> io::Result<Role> {
        let mut attempt = 0;

        let stream = loop {
            match TcpStream::connect(master_addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    debug!("root not reachable yet ({e}), retrying");
                    attempt += 1;
                    time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, mut tx) = crate::channel(rx, tx);
        tx.send(&Msg::Control(Command::Hello { rank })).await?;

        Ok(Role::Peer { root: (rx, tx) })
    }

    /// Tells the other end(s) this rank is leaving the group.
    ///
    /// Peers that already hung up are skipped.
    pub async fn close(mut self) {
        let msg = Msg::Control(Command::Disconnect);

        let txs: Vec<&mut NetTx> = match &mut self.role {
            Role::Root { peers } => peers.iter_mut().map(|(_, tx)| tx).collect(),
            Role::Peer { root: (_, tx) } => vec![tx],
        };

        for tx in txs {
            if let Err(e) = tx.send(&msg).await {
                debug!("rank {} could not say goodbye: {e}", self.rank);
            }
        }
    }
}

/// Marks relayed errors that were caused by bad data rather than by the transport.
const INVALID_DATA_TAG: &str = "invalid data: ";

/// Encodes `err` for the wire, keeping whether it was caused by bad data.
fn relay(err: &io::Error) -> Msg<'static> {
    let reason = match err.kind() {
        io::ErrorKind::InvalidData => format!("{INVALID_DATA_TAG}{err}"),
        _ => err.to_string(),
    };

    Msg::Err(reason.into())
}

/// Sends the failure reason to every peer so that none of them waits forever.
async fn abort<T>(peers: &mut [(NetRx, NetTx)], err: io::Error) -> io::Result<T> {
    let msg = relay(&err);

    for (_, tx) in peers.iter_mut() {
        let _ = tx.send(&msg).await;
    }

    Err(err)
}

fn remote_error(msg: &Msg) -> io::Error {
    match msg {
        Msg::Err(e) => match e.strip_prefix(INVALID_DATA_TAG) {
            Some(reason) => io::Error::new(
                io::ErrorKind::InvalidData,
                format!("remote rank failed: {reason}"),
            ),
            None => io::Error::other(format!("remote rank failed: {e}")),
        },
        msg => io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received an unexpected message: {msg:?}"),
        ),
    }
}

fn unexpected<T>(msg: &Msg) -> io::Result<T> {
    Err(remote_error(msg))
}

impl Communicator for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> io::Result<()> {
        let Self {
            role,
            rx_buf,
            world_size,
            ..
        } = self;

        match role {
            Role::Root { peers } => {
                for i in 0..peers.len() {
                    let received = match peers[i].0.recv_into(rx_buf).await {
                        Ok(Msg::Data(Payload::Partial(part))) if part.len() == buf.len() => {
                            buf.iter_mut().zip(part).for_each(|(b, p)| *b += p);
                            Ok(())
                        }
                        Ok(Msg::Data(Payload::Partial(part))) => {
                            length_mismatch(part.len(), buf.len())
                        }
                        Ok(msg) => unexpected(&msg),
                        Err(e) => Err(e),
                    };

                    if let Err(e) = received {
                        return abort(peers, e).await;
                    }
                }

                let factor = 1. / *world_size as f32;
                buf.iter_mut().for_each(|b| *b *= factor);

                let msg = Msg::Data(Payload::Full(buf));
                for (_, tx) in peers.iter_mut() {
                    tx.send(&msg).await?;
                }

                Ok(())
            }
            Role::Peer { root: (rx, tx) } => {
                tx.send(&Msg::Data(Payload::Partial(buf))).await?;

                match rx.recv_into(rx_buf).await? {
                    Msg::Data(Payload::Full(full)) if full.len() == buf.len() => {
                        buf.copy_from_slice(full);
                        Ok(())
                    }
                    Msg::Data(Payload::Full(full)) => length_mismatch(full.len(), buf.len()),
                    msg => unexpected(&msg),
                }
            }
        }
    }

    async fn broadcast(&mut self, buf: &mut [f32]) -> io::Result<()> {
        let Self { role, rx_buf, .. } = self;
        let done = Msg::Control(Command::Barrier);

        match role {
            Role::Root { peers } => {
                let msg = Msg::Data(Payload::Full(buf));
                for (_, tx) in peers.iter_mut() {
                    tx.send(&msg).await?;
                }

                // Every peer acknowledges the copy, so a rejected buffer fails the whole group.
                let mut failure = None;
                for i in 0..peers.len() {
                    match peers[i].0.recv_into(rx_buf).await {
                        Ok(Msg::Control(Command::Barrier)) => {}
                        Ok(msg) => {
                            failure.get_or_insert(remote_error(&msg));
                        }
                        Err(e) => return abort(peers, e).await,
                    }
                }

                if let Some(e) = failure {
                    return abort(peers, e).await;
                }

                for (_, tx) in peers.iter_mut() {
                    tx.send(&done).await?;
                }

                Ok(())
            }
            Role::Peer { root: (rx, tx) } => {
                let copied = match rx.recv_into(rx_buf).await? {
                    Msg::Data(Payload::Full(full)) if full.len() == buf.len() => {
                        buf.copy_from_slice(full);
                        Ok(())
                    }
                    Msg::Data(Payload::Full(full)) => length_mismatch(full.len(), buf.len()),
                    msg => return unexpected(&msg),
                };

                if let Err(e) = copied {
                    let _ = tx.send(&relay(&e)).await;
                    return Err(e);
                }

                tx.send(&done).await?;

                match rx.recv_into(rx_buf).await? {
                    Msg::Control(Command::Barrier) => Ok(()),
                    msg => unexpected(&msg),
                }
            }
        }
    }

    async fn barrier(&mut self) -> io::Result<()> {
        let Self { role, rx_buf, .. } = self;
        let msg = Msg::Control(Command::Barrier);

        match role {
            Role::Root { peers } => {
                for (rx, _) in peers.iter_mut() {
                    match rx.recv_into(rx_buf).await? {
                        Msg::Control(Command::Barrier) => {}
                        msg => return unexpected(&msg),
                    }
                }

                for (_, tx) in peers.iter_mut() {
                    tx.send(&msg).await?;
                }

                Ok(())
            }
            Role::Peer { root: (rx, tx) } => {
                tx.send(&msg).await?;

                match rx.recv_into(rx_buf).await? {
                    Msg::Control(Command::Barrier) => Ok(()),
                    msg => unexpected(&msg),
                }
            }
        }
    }
}
