//! Channel-backed communicator for a world of worker threads.
//!
//! Each rank owns one unbounded crossbeam inbox and a sender to every
//! other rank. Collectives are root-centred: contributions flow to the
//! root, results flow back out. Every message carries the sender's
//! collective sequence number and operation kind, so a fast peer that
//! has already moved on to the next collective cannot be confused with
//! a slow one; its message is parked until the receiver gets there.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use middleman_core::{CommError, Column, Communicator, GatherLayout, Rank, Scalar};

/// Default bound on how long a collective waits for one peer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Reduce,
    AllGather,
    Gatherv,
    Broadcast,
    Barrier,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Self::Reduce => "reduce_sum",
            Self::AllGather => "all_gather_count",
            Self::Gatherv => "gatherv",
            Self::Broadcast => "broadcast",
            Self::Barrier => "barrier",
        }
    }
}

struct Envelope {
    seq: u64,
    op: Op,
    source: Rank,
    payload: Column,
}

/// One rank's endpoint in a thread world.
///
/// Created in sets by [`ThreadComm::world`]; each endpoint is moved to
/// its worker thread. Endpoints are `Send` but not `Sync`.
pub struct ThreadComm {
    rank: Rank,
    size: usize,
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    parked: HashMap<(u64, usize), Envelope>,
    seq: u64,
    timeout: Duration,
}

impl ThreadComm {
    /// Create the endpoints of a world of `size` ranks, in rank order.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        Self::world_with_timeout(size, DEFAULT_TIMEOUT)
    }

    /// Like [`world`](ThreadComm::world) with a custom per-peer timeout.
    pub fn world_with_timeout(size: usize, timeout: Duration) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank: Rank(rank),
                size,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                parked: HashMap::new(),
                seq: 0,
                timeout,
            })
            .collect()
    }

    /// Number of collectives this endpoint has entered.
    pub fn collectives_entered(&self) -> u64 {
        self.seq
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn check_root(&self, root: Rank) -> Result<(), CommError> {
        if root.0 >= self.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        Ok(())
    }

    fn send(&self, dest: Rank, seq: u64, op: Op, payload: Column) -> Result<(), CommError> {
        let Some(tx) = self.peers.get(dest.0).and_then(Option::as_ref) else {
            return Err(CommError::Disconnected { peer: dest });
        };
        tx.send(Envelope {
            seq,
            op,
            source: self.rank,
            payload,
        })
        .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv(&mut self, source: Rank, seq: u64, op: Op) -> Result<Column, CommError> {
        if let Some(env) = self.parked.remove(&(seq, source.0)) {
            return Self::accept(env, seq, op);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(remaining) {
                Ok(env) if env.seq == seq && env.source == source => {
                    return Self::accept(env, seq, op);
                }
                Ok(env) => {
                    log::trace!(
                        "rank {} parked collective #{} from rank {}",
                        self.rank,
                        env.seq,
                        env.source
                    );
                    self.parked.insert((env.seq, env.source.0), env);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CommError::Timeout {
                        rank: self.rank,
                        peer: source,
                        seq,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected { peer: source });
                }
            }
        }
    }

    fn accept(env: Envelope, seq: u64, op: Op) -> Result<Column, CommError> {
        if env.op != op {
            return Err(CommError::CollectiveMismatch {
                seq,
                expected: op.name(),
                found: env.op.name(),
            });
        }
        Ok(env.payload)
    }

    fn recv_typed<T: Scalar>(&mut self, source: Rank, seq: u64, op: Op) -> Result<Vec<T>, CommError> {
        self.recv(source, seq, op)?
            .into_vec::<T>()
            .map_err(|col| CommError::TypeMismatch {
                expected: T::DTYPE,
                found: col.dtype(),
            })
    }

    /// Root-centred gather of one column per rank, then fan-out of the
    /// root's result. Shared by `all_gather_count` and `barrier`.
    fn gather_then_fan_out(&mut self, op: Op, contribution: Vec<u64>) -> Result<Vec<u64>, CommError> {
        let seq = self.next_seq();
        let root = Rank::ROOT;
        if self.rank != root {
            self.send(root, seq, op, Column::U64(contribution))?;
            return self.recv_typed::<u64>(root, seq, op);
        }
        let mut all = Vec::with_capacity(self.size * contribution.len());
        for src in 0..self.size {
            if src == root.0 {
                all.extend_from_slice(&contribution);
            } else {
                let part = self.recv_typed::<u64>(Rank(src), seq, op)?;
                all.extend(part);
            }
        }
        for dest in 1..self.size {
            self.send(Rank(dest), seq, op, Column::U64(all.clone()))?;
        }
        Ok(all)
    }
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("seq", &self.seq)
            .field("parked", &self.parked.len())
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reduce_sum(&mut self, data: &mut [f64], root: Rank) -> Result<(), CommError> {
        self.check_root(root)?;
        let seq = self.next_seq();
        if self.rank != root {
            return self.send(root, seq, Op::Reduce, Column::F64(data.to_vec()));
        }
        let mut acc = vec![0.0f64; data.len()];
        for src in 0..self.size {
            if src == root.0 {
                for (a, v) in acc.iter_mut().zip(data.iter()) {
                    *a += *v;
                }
                continue;
            }
            let part = self.recv_typed::<f64>(Rank(src), seq, Op::Reduce)?;
            if part.len() != data.len() {
                return Err(CommError::CountMismatch {
                    source: Rank(src),
                    expected: data.len(),
                    actual: part.len(),
                });
            }
            for (a, v) in acc.iter_mut().zip(part) {
                *a += v;
            }
        }
        data.copy_from_slice(&acc);
        Ok(())
    }

    fn all_gather_count(&mut self, count: usize) -> Result<Vec<usize>, CommError> {
        let all = self.gather_then_fan_out(Op::AllGather, vec![count as u64])?;
        if all.len() != self.size {
            return Err(CommError::LayoutMismatch {
                entries: all.len(),
                size: self.size,
            });
        }
        Ok(all.into_iter().map(|n| n as usize).collect())
    }

    fn gatherv<T: Scalar>(
        &mut self,
        send: &[T],
        layout: &GatherLayout,
        root: Rank,
    ) -> Result<Option<Vec<T>>, CommError> {
        self.check_root(root)?;
        if layout.workers() != self.size {
            return Err(CommError::LayoutMismatch {
                entries: layout.workers(),
                size: self.size,
            });
        }
        let own = layout.counts()[self.rank.0];
        if send.len() != own {
            return Err(CommError::CountMismatch {
                source: self.rank,
                expected: own,
                actual: send.len(),
            });
        }
        let seq = self.next_seq();
        if self.rank != root {
            self.send(root, seq, Op::Gatherv, T::wrap_column(send.to_vec()))?;
            return Ok(None);
        }
        let mut out = Vec::with_capacity(layout.total());
        for src in 0..self.size {
            let rank = Rank(src);
            debug_assert_eq!(out.len(), layout.displs()[src]);
            if rank == root {
                out.extend_from_slice(send);
                continue;
            }
            let part = self.recv_typed::<T>(rank, seq, Op::Gatherv)?;
            if part.len() != layout.counts()[src] {
                return Err(CommError::CountMismatch {
                    source: rank,
                    expected: layout.counts()[src],
                    actual: part.len(),
                });
            }
            out.extend(part);
        }
        Ok(Some(out))
    }

    fn broadcast<T: Scalar>(&mut self, data: Vec<T>, root: Rank) -> Result<Vec<T>, CommError> {
        self.check_root(root)?;
        let seq = self.next_seq();
        if self.rank != root {
            return self.recv_typed::<T>(root, seq, Op::Broadcast);
        }
        for dest in (0..self.size).filter(|&d| d != root.0) {
            self.send(Rank(dest), seq, Op::Broadcast, T::wrap_column(data.clone()))?;
        }
        Ok(data)
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        self.gather_then_fan_out(Op::Barrier, Vec::new())?;
        Ok(())
    }
}

/// Run `f` on `size` scoped worker threads, one per rank.
///
/// Returns the results in rank order. A panic on any worker is
/// propagated to the caller after all workers have been joined.
pub fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    run_world_with(ThreadComm::world(size), f)
}

/// Like [`run_world`] over pre-built endpoints (e.g. with a custom timeout).
pub fn run_world_with<T, F>(comms: Vec<ThreadComm>, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        let mut panic = None;
        for handle in handles {
            match handle.join() {
                Ok(v) => results.push(v),
                Err(payload) => {
                    panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        results
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_endpoints_have_ranks() {
        let world = ThreadComm::world(3);
        let ranks: Vec<_> = world.iter().map(|c| c.rank()).collect();
        assert_eq!(ranks, vec![Rank(0), Rank(1), Rank(2)]);
        assert!(world.iter().all(|c| c.size() == 3));
    }

    #[test]
    fn reduce_sums_to_root_in_rank_order() {
        let results = run_world(4, |mut comm| {
            let r = comm.rank().0 as f64;
            let mut data = vec![r, 10.0 * r];
            comm.reduce_sum(&mut data, Rank::ROOT).unwrap();
            (comm.is_root(), data)
        });
        let (is_root, root_data) = &results[0];
        assert!(is_root);
        assert_eq!(root_data, &vec![6.0, 60.0]);
    }

    #[test]
    fn all_gather_shares_counts_everywhere() {
        let results = run_world(3, |mut comm| {
            let n = comm.rank().0 * 2 + 1;
            comm.all_gather_count(n).unwrap()
        });
        for counts in results {
            assert_eq!(counts, vec![1, 3, 5]);
        }
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let results = run_world(3, |mut comm| {
            let data = if comm.is_root() { vec![7i64, 8] } else { Vec::new() };
            comm.broadcast(data, Rank::ROOT).unwrap()
        });
        assert!(results.iter().all(|v| v == &vec![7, 8]));
    }

    #[test]
    fn gatherv_concatenates_rank_major() {
        let results = run_world(3, |mut comm| {
            let r = comm.rank().0 as i32;
            let send: Vec<i32> = (0..r).map(|k| r * 100 + k).collect();
            let counts = comm.all_gather_count(send.len()).unwrap();
            let layout = GatherLayout::from_counts(counts);
            comm.gatherv(&send, &layout, Rank::ROOT).unwrap()
        });
        assert_eq!(results[0], Some(vec![100, 200, 201]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);
    }

    #[test]
    fn fast_peer_messages_are_parked() {
        // Rank 1 issues two reductions back to back; root must match
        // each to the right collective even though both are queued.
        let results = run_world(2, |mut comm| {
            let mut a = vec![1.0];
            let mut b = vec![10.0];
            if !comm.is_root() {
                a[0] = 2.0;
                b[0] = 20.0;
            }
            comm.reduce_sum(&mut a, Rank::ROOT).unwrap();
            comm.reduce_sum(&mut b, Rank::ROOT).unwrap();
            (a[0], b[0], comm.collectives_entered())
        });
        assert_eq!(results[0], (3.0, 30.0, 2));
        assert_eq!(results[1].2, 2);
    }

    #[test]
    fn mismatched_collectives_are_reported() {
        let comms = ThreadComm::world_with_timeout(2, Duration::from_millis(500));
        let results = run_world_with(comms, |mut comm| {
            if comm.is_root() {
                let mut data = vec![0.0];
                comm.reduce_sum(&mut data, Rank::ROOT).err()
            } else {
                comm.broadcast(Vec::<f64>::new(), Rank(1)).err()
            }
        });
        assert!(matches!(
            results[0],
            Some(CommError::CollectiveMismatch {
                expected: "reduce_sum",
                found: "broadcast",
                ..
            })
        ));
    }

    #[test]
    fn missing_peer_times_out() {
        let mut world = ThreadComm::world_with_timeout(2, Duration::from_millis(20));
        let _peer = world.pop();
        let mut root = world.pop().unwrap();
        let mut data = vec![1.0];
        let err = root.reduce_sum(&mut data, Rank::ROOT).unwrap_err();
        assert_eq!(
            err,
            CommError::Timeout {
                rank: Rank(0),
                peer: Rank(1),
                seq: 0
            }
        );
    }

    #[test]
    fn gatherv_rejects_wrong_own_count() {
        let mut world = ThreadComm::world(1);
        let mut comm = world.remove(0);
        let layout = GatherLayout::from_counts(vec![1]);
        let err = comm.gatherv(&[1.0f32, 2.0], &layout, Rank::ROOT).unwrap_err();
        assert!(matches!(err, CommError::CountMismatch { expected: 1, actual: 2, .. }));
    }
}
