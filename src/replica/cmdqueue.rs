//! The command queue orders overlapping commands by key span. Before
//! executing, a command collects completion handles for every already-live
//! command it conflicts with (reader vs. writer, or writer vs. anything),
//! then adds itself and waits on the handles outside the lock. The queue does
//! not itself serialize execution; it only produces the happens-before edges
//! that the replica uses to gate work.

use crate::types::Span;

use crossbeam::channel::{Receiver, Sender};
use std::collections::HashMap;

/// An opaque handle for a queued command, used to remove it.
pub type CmdKey = u64;

struct Cmd {
    spans: Vec<Span>,
    read_only: bool,
    /// Completion subscribers. Dropping the senders on removal unblocks
    /// everyone waiting on the corresponding receivers.
    subscribers: Vec<Sender<()>>,
}

/// An ordered set of live commands, keyed by their affected key spans.
#[derive(Default)]
pub struct CommandQueue {
    next_key: CmdKey,
    cmds: HashMap<CmdKey, Cmd>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns completion handles for all pre-existing commands that
    /// conflict with the given spans. Readers do not wait on other readers.
    /// The caller must wait on every handle (a receive error signals
    /// completion) before executing, outside of any replica lock.
    pub fn get_wait(&mut self, read_only: bool, spans: &[Span]) -> Vec<Receiver<()>> {
        let mut waits = Vec::new();
        for cmd in self.cmds.values_mut() {
            if read_only && cmd.read_only {
                continue;
            }
            if spans.iter().any(|s| cmd.spans.iter().any(|c| c.overlaps(s))) {
                let (tx, rx) = crossbeam::channel::bounded(0);
                cmd.subscribers.push(tx);
                waits.push(rx);
            }
        }
        waits
    }

    /// Adds a command covering the given spans, returning its removal key.
    pub fn add(&mut self, read_only: bool, spans: Vec<Span>) -> CmdKey {
        let key = self.next_key;
        self.next_key += 1;
        self.cmds.insert(key, Cmd { spans, read_only, subscribers: Vec::new() });
        key
    }

    /// Removes a command, unblocking all waiters on it.
    pub fn remove(&mut self, key: CmdKey) {
        self.cmds.remove(&key);
    }

    /// The number of live commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}

/// Blocks until all of the given completion handles have fired.
pub fn wait_for(waits: Vec<Receiver<()>>) {
    for wait in waits {
        // The sender never sends; it is dropped when the command is removed.
        let _ = wait.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: &[u8], end: &[u8]) -> Span {
        Span::new(start.to_vec(), end.to_vec())
    }

    #[test]
    fn readers_do_not_wait_on_readers() {
        let mut queue = CommandQueue::new();
        queue.add(true, vec![span(b"a", b"c")]);

        assert!(queue.get_wait(true, &[span(b"a", b"c")]).is_empty());
        assert_eq!(queue.get_wait(false, &[span(b"a", b"c")]).len(), 1);
    }

    #[test]
    fn writers_gate_overlapping_commands() {
        let mut queue = CommandQueue::new();
        let writer = queue.add(false, vec![span(b"b", b"d")]);

        // Both readers and writers wait on an overlapping writer.
        assert_eq!(queue.get_wait(true, &[span(b"c", b"e")]).len(), 1);
        assert_eq!(queue.get_wait(false, &[Span::point(b"b".to_vec())]).len(), 1);
        // Non-overlapping commands don't wait.
        assert!(queue.get_wait(false, &[span(b"d", b"e")]).is_empty());

        // Removal unblocks waiters.
        let waits = queue.get_wait(false, &[span(b"a", b"z")]);
        queue.remove(writer);
        wait_for(waits); // must not block
        assert!(queue.is_empty());
    }

    #[test]
    fn waiters_block_until_removal() {
        let mut queue = CommandQueue::new();
        let writer = queue.add(false, vec![span(b"a", b"c")]);
        let waits = queue.get_wait(false, &[span(b"b", b"d")]);

        let handle = std::thread::spawn(move || wait_for(waits));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!handle.is_finished());

        queue.remove(writer);
        handle.join().unwrap();
    }

    #[test]
    fn multiple_spans_conflict_as_a_unit() {
        let mut queue = CommandQueue::new();
        queue.add(false, vec![span(b"a", b"b"), span(b"x", b"z")]);

        assert_eq!(queue.get_wait(true, &[span(b"y", b"z")]).len(), 1);
        assert!(queue.get_wait(true, &[span(b"c", b"d")]).is_empty());
    }
}
