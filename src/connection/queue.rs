//! Command queue with a single in-flight slot.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Result;

/// Callback invoked with the outcome of a command.
///
/// Runs on the connection manager task, so it must not block.
pub type CommandCallback = Box<dyn FnOnce(Result<String>) + Send + 'static>;

/// How a command's outcome is handed back to its submitter.
pub(crate) enum Completion {
    /// Resolve a [`PendingReply`](super::PendingReply) future.
    Reply(oneshot::Sender<Result<String>>),
    /// Invoke a callback.
    Callback(CommandCallback),
}

impl Completion {
    fn resolve(self, outcome: Result<String>) {
        match self {
            Completion::Reply(tx) => {
                let _ = tx.send(outcome);
            }
            Completion::Callback(callback) => callback(outcome),
        }
    }
}

/// A submitted command and the completion waiting on it.
pub(crate) struct PendingCommand {
    pub(crate) text: String,
    pub(crate) enqueued_at: Instant,
    completion: Completion,
}

impl PendingCommand {
    pub(crate) fn new(text: String, completion: Completion) -> Self {
        Self {
            text,
            enqueued_at: Instant::now(),
            completion,
        }
    }

    /// Deliver the outcome. Consumes the command so it resolves exactly once.
    pub(crate) fn resolve(self, outcome: Result<String>) {
        self.completion.resolve(outcome);
    }
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("text", &self.text)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

struct InFlight {
    command: PendingCommand,
    write_id: u64,
    deadline: Option<Instant>,
}

/// FIFO of waiting commands plus the one command awaiting its reply.
#[derive(Default)]
pub(crate) struct CommandQueue {
    in_flight: Option<InFlight>,
    waiting: VecDeque<PendingCommand>,
    last_write_id: u64,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// True when no command is awaiting a reply.
    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Number of commands waiting behind the in-flight one.
    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Text of the in-flight command.
    pub(crate) fn in_flight_text(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.command.text.as_str())
    }

    /// Write id of the in-flight command.
    pub(crate) fn in_flight_write_id(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.write_id)
    }

    /// Allocate the id the transport reports a write outcome under.
    pub(crate) fn next_write_id(&mut self) -> u64 {
        self.last_write_id += 1;
        self.last_write_id
    }

    /// Deadline of the in-flight command, if it has one.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().and_then(|f| f.deadline)
    }

    /// Append a command behind everything already queued.
    pub(crate) fn push(&mut self, command: PendingCommand) {
        self.waiting.push_back(command);
    }

    /// Record a command handed to the transport as the one awaiting a reply.
    pub(crate) fn mark_in_flight(
        &mut self,
        command: PendingCommand,
        write_id: u64,
        deadline: Option<Instant>,
    ) {
        debug_assert!(self.in_flight.is_none(), "second command put in flight");
        self.in_flight = Some(InFlight {
            command,
            write_id,
            deadline,
        });
    }

    /// Clear the in-flight slot, returning its command.
    pub(crate) fn take_in_flight(&mut self) -> Option<PendingCommand> {
        self.in_flight.take().map(|f| f.command)
    }

    /// Dequeue the oldest waiting command.
    pub(crate) fn pop_waiting(&mut self) -> Option<PendingCommand> {
        self.waiting.pop_front()
    }

    /// Remove every command, in-flight first, then waiting in FIFO order.
    pub(crate) fn drain(&mut self) -> Vec<PendingCommand> {
        let mut drained = Vec::with_capacity(self.waiting.len() + 1);
        drained.extend(self.take_in_flight());
        drained.extend(self.waiting.drain(..));
        drained
    }
}
