//! Global process table and cooperative ready queue (spec §4.7, §5).
//!
//! Scheduling in this core is cooperative: the ready queue holds `(pid,
//! tid)` pairs and [`assign_thread_to_cpu`] loads a thread's saved
//! [`RegisterFrame`](super::thread::RegisterFrame) and returns to it via
//! `iretq`. There is one BSP-resident "current thread" slot per spec §5's
//! default single-core operating mode; [`current`]/[`set_current`] are the
//! only places that change if AP cores start pulling from the same queue.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::errno::{Errno, KernelResult};
use crate::mm::vas::AddressSpace;
use crate::sync::SpinMutex;

use super::pcb::{Pid, Process, ProcessState};
use super::thread::{Thread, Tid};

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

static PROCESSES: SpinMutex<BTreeMap<Pid, Box<Process>>> = SpinMutex::new(BTreeMap::new());

/// Cooperative ready queue: a FIFO of runnable `(pid, tid)` pairs, modeling
/// the singly linked list spec §4.7 describes.
static READY_QUEUE: SpinMutex<VecDeque<(Pid, Tid)>> = SpinMutex::new(VecDeque::new());

/// The thread currently bound to the (sole, BSP) CPU.
static CURRENT: SpinMutex<Option<(Pid, Tid)>> = SpinMutex::new(None);

fn alloc_pid() -> Pid {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// `create_proc(name, parent)` (spec §4.7): allocates a process, attaches an
/// address space that initially aliases the kernel root's upper half
/// ([`AddressSpace::new`]), gives it an empty fd table, and links it into
/// the global process table.
pub fn create_proc(name: &str, parent: Option<Pid>, uid: u32) -> KernelResult<Pid> {
    let space = AddressSpace::new()?;
    let pid = alloc_pid();
    let process = Process::new(pid, String::from(name), parent, uid, space);

    PROCESSES.lock().insert(pid, Box::new(process));

    if let Some(parent_pid) = parent {
        if let Some(p) = PROCESSES.lock().get_mut(&parent_pid) {
            p.children.push(pid);
        }
    }

    Ok(pid)
}

/// `create_thread(proc, name, entry, arg)` (spec §4.7): allocates a stack,
/// builds the initial register frame, attaches the thread to the process,
/// and enqueues it on the ready queue.
pub fn create_thread(pid: Pid, name: &str, entry: u64, arg: u64) -> KernelResult<Tid> {
    let mut processes = PROCESSES.lock();
    let process = processes.get_mut(&pid).ok_or(Errno::EINVAL)?;
    let index = process.threads.len();
    let thread = Thread::new(
        0, // assigned by `Process::add_thread`
        index,
        pid,
        String::from(name),
        entry,
        arg,
        super::thread::DEFAULT_USER_STACK_TOP,
        &process.space,
        super::USER_CS,
        super::USER_SS,
    )?;
    let tid = process.add_thread(thread);
    process.thread_mut(tid).unwrap().tid = tid;
    drop(processes);

    READY_QUEUE.lock().push_back((pid, tid));
    Ok(tid)
}

/// `exit(proc)` (spec §4.7): closes every fd, tears down every thread, and
/// unlinks the process from its parent's child list; the address space is
/// dropped last, when `Box<Process>` itself is removed from the table.
pub fn exit(pid: Pid) {
    READY_QUEUE.lock().retain(|&(p, _)| p != pid);
    let mut current = CURRENT.lock();
    if matches!(*current, Some((p, _)) if p == pid) {
        *current = None;
    }
    drop(current);

    let mut processes = PROCESSES.lock();
    let parent = processes.get(&pid).and_then(|p| p.parent);
    if let Some(process) = processes.get_mut(&pid) {
        process.exit();
    }
    if let Some(parent_pid) = parent {
        if let Some(parent_proc) = processes.get_mut(&parent_pid) {
            parent_proc.children.retain(|&c| c != pid);
        }
    }
    processes.remove(&pid);
}

/// Run `f` with exclusive access to the process identified by `pid`.
pub fn with_process<R>(pid: Pid, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    PROCESSES.lock().get_mut(&pid).map(|p| f(p))
}

pub fn exists(pid: Pid) -> bool {
    PROCESSES.lock().contains_key(&pid)
}

pub fn current() -> Option<(Pid, Tid)> {
    *CURRENT.lock()
}

/// Pop the next ready thread, mark it `Running`, and return the register
/// frame the caller should `iretq` into along with its `cr3`. This is the
/// cooperative scheduling point; callers invoke it from the syscall return
/// path or an explicit yield.
pub fn assign_thread_to_cpu() -> Option<(Pid, Tid, super::thread::RegisterFrame)> {
    let (pid, tid) = loop {
        let next = READY_QUEUE.lock().pop_front()?;
        if exists(next.0) {
            break next;
        }
        // Process exited between being enqueued and being scheduled; skip.
    };

    let frame = with_process(pid, |p| {
        p.state = ProcessState::Running;
        if let Some(t) = p.thread_mut(tid) {
            t.state = super::thread::ThreadState::Running;
            Some(t.frame)
        } else {
            None
        }
    })??;

    *CURRENT.lock() = Some((pid, tid));
    Some((pid, tid, frame))
}

/// Return the currently running thread to the back of the ready queue
/// (cooperative yield / preemption-tick save point, spec §4.7/§5).
pub fn requeue_current(saved_frame: super::thread::RegisterFrame) {
    if let Some((pid, tid)) = *CURRENT.lock() {
        with_process(pid, |p| {
            if let Some(t) = p.thread_mut(tid) {
                t.frame = saved_frame;
                t.state = super::thread::ThreadState::Ready;
            }
            p.state = ProcessState::Ready;
        });
        READY_QUEUE.lock().push_back((pid, tid));
    }
}

/// Snapshot of process table population, used by diagnostics/tests.
pub fn all_pids() -> Vec<Pid> {
    PROCESSES.lock().keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_removes_from_table_and_parent_children() {
        // Exercises the bookkeeping directly; full `create_proc` needs a
        // booted paging engine so is covered by the integration tests.
        let mut map: BTreeMap<Pid, Vec<Pid>> = BTreeMap::new();
        map.insert(1, alloc::vec![2, 3]);
        map.get_mut(&1).unwrap().retain(|&c| c != 2);
        assert_eq!(map.get(&1).unwrap(), &alloc::vec![3]);
    }
}
