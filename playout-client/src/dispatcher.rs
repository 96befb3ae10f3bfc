//! Command/response correlation.
//!
//! AMCP responses carry no request id: the server answers in the order it
//! received commands. Each complete response is therefore matched to the
//! oldest outstanding command. A server that replied out of order would be
//! silently mis-correlated; the read loop only warns when the echoed command
//! name does not match.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use playout_protocol::{AssembledResponse, Command, CommandKind};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// Identifier handed out for each submitted command.
pub type CommandId = u64;

/// The outcome of a submitted command, delivered to its caller.
#[derive(Debug)]
pub struct Completion {
    pub id: CommandId,
    /// The command as submitted.
    pub command: Command,
    pub result: Result<AssembledResponse, ClientError>,
}

impl Completion {
    /// Returns the response, or the error the command failed with.
    pub fn into_response(self) -> Result<AssembledResponse, ClientError> {
        self.result
    }
}

/// Where a completion is sent.
pub(crate) enum Responder {
    Handle(oneshot::Sender<Completion>),
    Channel(mpsc::UnboundedSender<Completion>),
    /// Keepalive probe; nobody waits for it.
    Probe,
}

/// A command written to the wire and not yet answered.
pub(crate) struct PendingCommand {
    pub(crate) id: CommandId,
    pub(crate) kind: CommandKind,
    pub(crate) command: Command,
    pub(crate) wire: String,
    pub(crate) enqueued_at: DateTime<Utc>,
    responder: Responder,
}

impl PendingCommand {
    pub(crate) fn new(id: CommandId, command: Command, wire: String, responder: Responder) -> Self {
        Self {
            id,
            kind: command.kind(),
            command,
            wire,
            enqueued_at: Utc::now(),
            responder,
        }
    }

    pub(crate) fn is_probe(&self) -> bool {
        matches!(self.responder, Responder::Probe)
    }

    /// Hands the outcome to the caller. Consumes the entry so it is delivered
    /// exactly once.
    pub(crate) fn complete(self, result: Result<AssembledResponse, ClientError>) {
        let completion = Completion {
            id: self.id,
            command: self.command,
            result,
        };
        let delivered = match self.responder {
            Responder::Handle(tx) => tx.send(completion).is_ok(),
            Responder::Channel(tx) => tx.send(completion).is_ok(),
            Responder::Probe => true,
        };
        if !delivered {
            tracing::trace!(id = self.id, "completion receiver gone");
        }
    }
}

/// Outstanding commands in submission order.
#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingCommand>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, pending: PendingCommand) {
        self.entries.push_back(pending);
    }

    /// Removes the oldest outstanding command.
    pub(crate) fn pop_oldest(&mut self) -> Option<PendingCommand> {
        self.entries.pop_front()
    }

    /// Removes a specific entry; used when its write never reached the wire.
    pub(crate) fn remove(&mut self, id: CommandId) -> Option<PendingCommand> {
        let pos = self.entries.iter().position(|p| p.id == id)?;
        self.entries.remove(pos)
    }

    pub(crate) fn contains(&self, id: CommandId) -> bool {
        self.entries.iter().any(|p| p.id == id)
    }

    /// Empties the queue, handing back the entries in submission order.
    pub(crate) fn drain(&mut self) -> Vec<PendingCommand> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fails every entry with a fresh error from `error`.
pub(crate) fn fail_all(entries: Vec<PendingCommand>, error: impl Fn() -> ClientError) -> usize {
    let count = entries.len();
    for pending in entries {
        tracing::debug!(id = pending.id, wire = %pending.wire, "failing pending command");
        pending.complete(Err(error()));
    }
    count
}
