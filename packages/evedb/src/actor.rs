//! Minimal mailbox runtime.
//!
//! Components run as actors: one OS thread per actor, a single mpsc
//! input channel, and messages processed to completion in FIFO order
//! per sender. State never crosses actor boundaries by reference; it
//! travels as values or shared-immutable handles (slices, chunks).
//!
//! Request/reply is modeled by embedding a reply sender in the message;
//! [`request`] blocks the caller until the reply arrives.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use serde::{Deserialize, Serialize};

use crate::data::{Data, Timestamp};
use crate::error::{Error, Result};

// ── Status verbosity ───────────────────────────────────────────────

/// Verbosity of `status` queries. Higher levels monotonically add
/// fields to the returned record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Terse,
    Info,
    Detailed,
    Debug,
}

// ── Mailbox ────────────────────────────────────────────────────────

/// Cloneable handle for sending messages to an actor.
pub struct Mailbox<M> {
    name: String,
    tx: Sender<M>,
}

// Manual impls: the derives would demand `M: Clone + Debug` even
// though only the sender is cloned and printed.
impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), tx: self.tx.clone() }
    }
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mailbox({})", self.name)
    }
}

impl<M> Mailbox<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message. Fails when the actor has terminated.
    pub fn send(&self, msg: M) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Stalled(format!("actor {} is gone", self.name)))
    }
}

/// Spawn an actor thread that processes messages until every mailbox
/// clone is dropped.
pub fn spawn<M, F>(name: &str, mut handler: F) -> Mailbox<M>
where
    M: Send + 'static,
    F: FnMut(M) + Send + 'static,
{
    let (tx, rx): (Sender<M>, Receiver<M>) = channel();
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                handler(msg);
            }
            tracing::debug!(actor = thread_name.as_str(), "actor mailbox closed");
        })
        .expect("failed to spawn actor thread");
    Mailbox { name: name.to_string(), tx }
}

/// Send a request built around a fresh reply channel and await the
/// reply.
pub fn request<M, R>(mailbox: &Mailbox<M>, build: impl FnOnce(Sender<R>) -> M) -> Result<R> {
    let (reply_tx, reply_rx) = channel();
    mailbox.send(build(reply_tx))?;
    reply_rx
        .recv()
        .map_err(|_| Error::Stalled(format!("actor {} dropped the request", mailbox.name())))
}

// ── Accountant ─────────────────────────────────────────────────────

/// One counter observation delivered to the accountant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub timestamp: Timestamp,
    pub name: String,
    pub value: u64,
}

impl CounterSample {
    pub fn now(name: &str, value: u64) -> Self {
        Self { timestamp: Timestamp::now(), name: name.to_string(), value }
    }

    /// The sample as a status record.
    pub fn to_record(&self) -> Data {
        Data::Record(vec![
            ("timestamp".into(), Data::Time(self.timestamp)),
            ("name".into(), Data::String(self.name.clone())),
            ("value".into(), Data::Count(self.value)),
        ])
    }
}

/// Best-effort handle to an accountant actor. Samples sent after the
/// accountant terminated are silently dropped.
#[derive(Debug, Clone, Default)]
pub struct AccountantHandle {
    mailbox: Option<Mailbox<CounterSample>>,
}

impl AccountantHandle {
    /// A handle that drops every sample.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(mailbox: Mailbox<CounterSample>) -> Self {
        Self { mailbox: Some(mailbox) }
    }

    pub fn tell(&self, name: &str, value: u64) {
        if let Some(mailbox) = &self.mailbox {
            let _ = mailbox.send(CounterSample::now(name, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_fifo_per_sender() {
        let (probe_tx, probe_rx) = channel();
        let mailbox = spawn("test-echo", move |msg: u32| {
            probe_tx.send(msg).unwrap();
        });
        for i in 0..100 {
            mailbox.send(i).unwrap();
        }
        let received: Vec<u32> = (0..100).map(|_| probe_rx.recv().unwrap()).collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_request_reply() {
        struct Add {
            lhs: u64,
            rhs: u64,
            reply: Sender<u64>,
        }
        let mailbox = spawn("test-adder", |msg: Add| {
            let _ = msg.reply.send(msg.lhs + msg.rhs);
        });
        let sum = request(&mailbox, |reply| Add { lhs: 2, rhs: 40, reply }).unwrap();
        assert_eq!(sum, 42);
    }

    #[test]
    fn test_verbosity_ordering() {
        assert!(Verbosity::Terse < Verbosity::Info);
        assert!(Verbosity::Detailed < Verbosity::Debug);
        assert_eq!(Verbosity::default(), Verbosity::Terse);
    }

    #[test]
    fn test_accountant_best_effort() {
        let disabled = AccountantHandle::disabled();
        disabled.tell("ignored", 1);

        let (probe_tx, probe_rx) = channel();
        let mailbox = spawn("test-accountant", move |sample: CounterSample| {
            let _ = probe_tx.send(sample);
        });
        let handle = AccountantHandle::new(mailbox);
        handle.tell("segment.writes", 3);
        let sample = probe_rx.recv().unwrap();
        assert_eq!(sample.name, "segment.writes");
        assert_eq!(sample.value, 3);
        match sample.to_record() {
            Data::Record(fields) => assert_eq!(fields.len(), 3),
            other => panic!("unexpected: {}", other),
        }
    }
}
