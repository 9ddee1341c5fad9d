//! # Call Registry
//!
//! The client's table of in-flight calls, keyed by sequence number.
//!
//! ## Invariants
//! - **Unique Sequences**: numbers start at 1 and are never reused on a connection.
//! - **Single Delivery**: a call leaves the table exactly once, and whoever
//!   removes it owns its completion.
//! - **One-Way Shutdown**: once terminated, nothing registers again.
//!
//! The registry is plain data; the client guards it with one mutex that is
//! never held across an `.await`.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::error::Result;
use minirpc_proto::Body;

/// A registered call waiting for its reply.
#[derive(Debug)]
pub struct PendingCall {
    service_method: String,
    tx: oneshot::Sender<Result<Body>>,
}

impl PendingCall {
    pub fn new(service_method: impl Into<String>, tx: oneshot::Sender<Result<Body>>) -> Self {
        Self { service_method: service_method.into(), tx }
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// True once the caller has dropped its end.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hands the outcome to the caller. A caller that gave up is ignored.
    pub fn complete(self, result: Result<Body>) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug)]
pub struct CallRegistry {
    next_seq: u64,
    pending: HashMap<u64, PendingCall>,
    closing: bool,
    shutdown: bool,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self { next_seq: 1, pending: HashMap::new(), closing: false, shutdown: false }
    }

    /// Assigns the next sequence number and stores the call under it.
    pub fn register(&mut self, call: PendingCall) -> Result<u64> {
        if self.closing || self.shutdown {
            return Err(Error::Shutdown);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq, call);
        Ok(seq)
    }

    pub fn remove(&mut self, seq: u64) -> Option<PendingCall> {
        self.pending.remove(&seq)
    }

    /// Removes `seq` only if its caller has already gone away.
    pub fn remove_abandoned(&mut self, seq: u64) -> Option<PendingCall> {
        match self.pending.get(&seq) {
            Some(call) if call.is_abandoned() => self.pending.remove(&seq),
            _ => None,
        }
    }

    /// Marks the registry shut down and hands back every call still waiting.
    pub fn terminate(&mut self) -> Vec<PendingCall> {
        self.shutdown = true;
        self.pending.drain().map(|(_, call)| call).collect()
    }

    /// Fails if the client is already closing or its connection is gone.
    pub fn mark_closing(&mut self) -> Result<()> {
        if self.closing || self.shutdown {
            return Err(Error::Shutdown);
        }
        self.closing = true;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        !self.closing && !self.shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(name: &str) -> (PendingCall, oneshot::Receiver<Result<Body>>) {
        let (tx, rx) = oneshot::channel();
        (PendingCall::new(name, tx), rx)
    }

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let mut registry = CallRegistry::new();
        let seqs: Vec<u64> = (0..3).map(|_| registry.register(pending("Foo.Sum").0).unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_sequences_not_reused_after_remove() {
        let mut registry = CallRegistry::new();
        let first = registry.register(pending("Foo.Sum").0).unwrap();
        assert!(registry.remove(first).is_some());
        assert!(registry.remove(first).is_none());
        assert_eq!(registry.register(pending("Foo.Sum").0).unwrap(), 2);
    }

    #[test]
    fn test_terminate_drains_and_blocks_registration() {
        let mut registry = CallRegistry::new();
        let (call, mut rx) = pending("Foo.Sum");
        registry.register(call).unwrap();

        let drained = registry.terminate();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.is_shutdown());
        assert!(!registry.is_available());

        for call in drained {
            call.complete(Err(Error::Shutdown));
        }
        assert!(matches!(rx.try_recv(), Ok(Err(Error::Shutdown))));
        assert!(matches!(registry.register(pending("Foo.Sum").0), Err(Error::Shutdown)));
    }

    #[test]
    fn test_closing_is_one_shot() {
        let mut registry = CallRegistry::new();
        assert!(registry.is_available());
        registry.mark_closing().unwrap();
        assert!(!registry.is_available());
        assert!(matches!(registry.mark_closing(), Err(Error::Shutdown)));
        assert!(matches!(registry.register(pending("Foo.Sum").0), Err(Error::Shutdown)));
    }

    #[test]
    fn test_closing_after_shutdown_fails() {
        let mut registry = CallRegistry::new();
        registry.terminate();
        assert!(matches!(registry.mark_closing(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_remove_abandoned_keeps_live_calls() {
        let mut registry = CallRegistry::new();
        let (live, _rx) = pending("Foo.Sum");
        let live = registry.register(live).unwrap();
        let (gone, rx) = pending("Foo.Sum");
        let gone = registry.register(gone).unwrap();
        drop(rx);

        assert!(registry.remove_abandoned(live).is_none());
        assert!(registry.remove_abandoned(gone).is_some());
        assert_eq!(registry.len(), 1);
    }
}
