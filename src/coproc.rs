//! Batch co-processors.
//!
//! A co-processor mirrors a tree and classifies whole encoded batches. It is
//! driven through three calls: [`CoProcessor::reset`], one
//! [`CoProcessor::configure`] per node load, and a blocking
//! [`CoProcessor::submit`] that returns one leaf address per input word in
//! submission order.
//!
//! [`PipelinedEvaluator`] is a software model of a staged pipeline: one stage
//! per internal level, each holding a RAM of that level's nodes. A node only
//! reaches the stage RAMs by being packed into a [`RegisterFile`] and decoded
//! back out, the same path a hardware load strobe takes.
//!
//! [`StreamCoProcessor`] moves any co-processor onto a worker thread and puts
//! a timeout on every call.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::address;
use crate::codec::BatchCodec;
use crate::config::{EvaluatorConfig, TreeLayout};
use crate::error::{Error, Result};
use crate::store::{Node, RegisterFile};

/// Pause between attempts to queue a command on a full channel.
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// External evaluator holding its own copy of a tree.
pub trait CoProcessor {
    /// Drop all tree state. Calling it twice is the same as calling it once.
    fn reset(&mut self) -> Result<()>;

    /// Mirror one node load; visible to the next [`CoProcessor::submit`].
    fn configure(&mut self, address: u32, field_index: u32, value: u32) -> Result<()>;

    /// Classify a batch; blocks until every result is available.
    fn submit(&mut self, words: &[u32]) -> Result<Vec<u32>>;
}

impl<C: CoProcessor + ?Sized> CoProcessor for Box<C> {
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn configure(&mut self, address: u32, field_index: u32, value: u32) -> Result<()> {
        (**self).configure(address, field_index, value)
    }

    fn submit(&mut self, words: &[u32]) -> Result<Vec<u32>> {
        (**self).submit(words)
    }
}

// =============================================================================
// Pipelined evaluator
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct InFlight {
    word: u32,
    /// Row within the level of the stage currently holding the record.
    row: u32,
}

/// Software model of a level-staged classification pipeline.
#[derive(Debug, Clone)]
pub struct PipelinedEvaluator {
    layout: TreeLayout,
    codec: BatchCodec,
    registers: RegisterFile,
    /// `stages[k]` holds the `2^k` nodes of internal level `k`.
    stages: Vec<Vec<Node>>,
}

impl PipelinedEvaluator {
    pub fn new(layout: TreeLayout) -> Self {
        let stages = (0..layout.num_levels() - 1)
            .map(|level| vec![Node::default(); 1usize << level])
            .collect();
        Self {
            layout,
            codec: BatchCodec::new(&layout),
            registers: RegisterFile::default(),
            stages,
        }
    }

    /// Pipeline depth in stages (`num_levels - 1`).
    #[inline]
    pub fn depth(&self) -> usize {
        self.stages.len()
    }

    /// Contents of a stage RAM row, if that stage exists.
    pub fn stage_node(&self, level: u32, row: u32) -> Option<Node> {
        self.stages.get(level as usize)?.get(row as usize).copied()
    }

    /// The register image last written by [`CoProcessor::configure`].
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Copy a level's decoded register slot into its stage RAM.
    fn latch(&mut self, level: u32) -> Result<()> {
        let slot = self.registers.slot(&self.layout, level)?;
        if let Some(ram) = self.stages.get_mut(level as usize) {
            ram[slot.ram_row as usize] = Node {
                field_index: slot.field_index,
                value: slot.value,
            };
        }
        Ok(())
    }

    /// One comparison: equal goes left (`2r`), anything else right (`2r + 1`).
    #[inline]
    fn step(&self, stage: usize, rec: InFlight) -> u32 {
        let node = self.stages[stage][rec.row as usize];
        let field = self.codec.field_value(rec.word, node.field_index);
        if field == node.value {
            2 * rec.row
        } else {
            2 * rec.row + 1
        }
    }

    /// Clock the pipeline until every word has left the last stage.
    fn run(&self, words: &[u32]) -> Vec<u32> {
        let depth = self.depth();
        let mut results = Vec::with_capacity(words.len());
        if depth == 0 {
            results.resize(words.len(), 0);
            return results;
        }

        let leaf_level = depth as u32;
        let mut lanes: Vec<Option<InFlight>> = vec![None; depth];
        let mut input = words.iter().copied();
        let mut in_flight = 0usize;
        let mut cycle = 0u64;

        loop {
            // Deepest stage first so every record moves into a freed lane.
            for stage in (0..depth).rev() {
                if let Some(rec) = lanes[stage].take() {
                    let row = self.step(stage, rec);
                    if stage + 1 == depth {
                        results.push(address::address_of(leaf_level, row));
                        in_flight -= 1;
                    } else {
                        lanes[stage + 1] = Some(InFlight { row, ..rec });
                    }
                }
            }

            match input.next() {
                Some(word) => {
                    lanes[0] = Some(InFlight { word, row: 0 });
                    in_flight += 1;
                }
                None if in_flight == 0 => break,
                None => {}
            }

            cycle += 1;
            trace!(cycle, in_flight, "pipeline cycle");
        }

        results
    }
}

impl CoProcessor for PipelinedEvaluator {
    fn reset(&mut self) -> Result<()> {
        self.registers = RegisterFile::default();
        for ram in &mut self.stages {
            ram.fill(Node::default());
        }
        Ok(())
    }

    fn configure(&mut self, address: u32, field_index: u32, value: u32) -> Result<()> {
        self.layout.check_node(address, field_index, value)?;
        self.registers.stage(&self.layout, address, field_index, value);
        self.latch(address::level_of(address))
    }

    fn submit(&mut self, words: &[u32]) -> Result<Vec<u32>> {
        Ok(self.run(words))
    }
}

// =============================================================================
// Streaming co-processor
// =============================================================================

enum Command {
    Reset,
    Configure {
        address: u32,
        field_index: u32,
        value: u32,
    },
    Submit(Vec<u32>),
}

struct Reply {
    seq: u64,
    outcome: Result<Vec<u32>>,
}

/// A co-processor served from a dedicated worker thread.
///
/// Commands and replies travel over bounded channels, in order. Every call,
/// queueing included, takes at most `submit_timeout` and then fails with
/// [`Error::CoProcessorTimeout`]; a reply that arrives after its caller gave
/// up is discarded by the next call. Dropping the handle never waits on a
/// worker that still owes a timed-out reply.
pub struct StreamCoProcessor {
    commands: Option<SyncSender<(u64, Command)>>,
    replies: Option<Receiver<Reply>>,
    worker: Option<JoinHandle<()>>,
    next_seq: u64,
    timeout: Duration,
    /// Set while some call has given up on a reply the worker still owes.
    stalled: bool,
}

impl StreamCoProcessor {
    /// Move `inner` onto a new worker thread.
    pub fn spawn<C>(inner: C, config: &EvaluatorConfig) -> Result<Self>
    where
        C: CoProcessor + Send + 'static,
    {
        let capacity = config.channel_capacity.max(1);
        let (cmd_tx, cmd_rx) = mpsc::sync_channel::<(u64, Command)>(capacity);
        let (reply_tx, reply_rx) = mpsc::sync_channel::<Reply>(capacity);

        let worker = std::thread::Builder::new()
            .name("dtree-coproc".into())
            .spawn(move || serve(inner, cmd_rx, reply_tx))
            .map_err(|_| Error::CoProcessorDisconnected)?;

        Ok(Self {
            commands: Some(cmd_tx),
            replies: Some(reply_rx),
            worker: Some(worker),
            next_seq: 0,
            timeout: config.submit_timeout,
            stalled: false,
        })
    }

    fn call(&mut self, command: Command) -> Result<Vec<u32>> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = Instant::now() + self.timeout;

        let commands = self.commands.as_ref().ok_or(Error::CoProcessorDisconnected)?;
        let mut pending = (seq, command);
        loop {
            match commands.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        return Err(self.timed_out(seq));
                    }
                    pending = back;
                    std::thread::sleep(SEND_RETRY_INTERVAL);
                }
                Err(TrySendError::Disconnected(_)) => return Err(Error::CoProcessorDisconnected),
            }
        }

        let replies = self.replies.as_ref().ok_or(Error::CoProcessorDisconnected)?;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => {
                    self.stalled = false;
                    return reply.outcome;
                }
                Ok(reply) => {
                    debug!(stale = reply.seq, expected = seq, "discarding late reply");
                }
                Err(RecvTimeoutError::Timeout) => return Err(self.timed_out(seq)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::CoProcessorDisconnected);
                }
            }
        }
    }

    fn timed_out(&mut self, seq: u64) -> Error {
        warn!(seq, timeout = ?self.timeout, "co-processor timed out");
        self.stalled = true;
        Error::CoProcessorTimeout {
            timeout: self.timeout,
        }
    }
}

fn serve<C: CoProcessor>(mut inner: C, commands: Receiver<(u64, Command)>, replies: SyncSender<Reply>) {
    while let Ok((seq, command)) = commands.recv() {
        let outcome = match command {
            Command::Reset => inner.reset().map(|()| Vec::new()),
            Command::Configure {
                address,
                field_index,
                value,
            } => inner
                .configure(address, field_index, value)
                .map(|()| Vec::new()),
            Command::Submit(words) => inner.submit(&words),
        };
        if replies.send(Reply { seq, outcome }).is_err() {
            break;
        }
    }
    debug!("co-processor worker exiting");
}

impl CoProcessor for StreamCoProcessor {
    fn reset(&mut self) -> Result<()> {
        info!("resetting co-processor");
        self.call(Command::Reset).map(drop)
    }

    fn configure(&mut self, address: u32, field_index: u32, value: u32) -> Result<()> {
        self.call(Command::Configure {
            address,
            field_index,
            value,
        })
        .map(drop)
    }

    fn submit(&mut self, words: &[u32]) -> Result<Vec<u32>> {
        self.call(Command::Submit(words.to_vec()))
    }
}

impl Drop for StreamCoProcessor {
    fn drop(&mut self) {
        // With both channels closed the worker exits after its current command.
        self.commands.take();
        self.replies.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.stalled && !worker.is_finished() {
            warn!("detaching stalled co-processor worker");
            return;
        }
        let _ = worker.join();
    }
}
