//! End-to-end stress: three mutators hammer a Treiber stack while the
//! collector runs. Every pushed integer must be popped exactly once, and the
//! heap must settle back to the container skeleton once the threads drain.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use loam_gc::{AtomicStrong, GcHeader, GcObject, ScanContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const THREADS: usize = 3;
const PUSHES: usize = 30_000;
const QUANTUM: usize = 1_000;

struct Node {
    header: GcHeader,
    next: AtomicStrong<Node>,
    value: usize,
}

impl GcObject for Node {
    fn header(&self) -> &GcHeader {
        &self.header
    }
    fn scan(&self, ctx: &mut ScanContext) {
        ctx.push_atomic(&self.next);
    }
}

struct Stack {
    header: GcHeader,
    head: AtomicStrong<Node>,
}

impl GcObject for Stack {
    fn header(&self) -> &GcHeader {
        &self.header
    }
    fn scan(&self, ctx: &mut ScanContext) {
        ctx.push_atomic(&self.head);
    }
}

impl Stack {
    fn push(&self, value: usize) {
        let node = loam_gc::alloc(Node {
            header: GcHeader::new(),
            next: AtomicStrong::null(),
            value,
        });
        let mut expected = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: all pointers involved are live GC allocations.
            unsafe {
                node.as_ref().next.store(expected, Ordering::Relaxed);
                match self.head.compare_exchange(
                    expected,
                    node.as_ptr(),
                    Ordering::Release,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(actual) => expected = actual,
                }
            }
        }
    }

    fn pop(&self) -> Option<usize> {
        let mut expected = self.head.load(Ordering::Acquire);
        loop {
            if expected.is_null() {
                return None;
            }
            // SAFETY: a popped-but-referenced node stays alive under GC;
            // that is exactly why this algorithm needs one.
            unsafe {
                let next = (*expected).next.load(Ordering::Relaxed);
                match self
                    .head
                    .compare_exchange(expected, next, Ordering::Relaxed, Ordering::Acquire)
                {
                    Ok(_) => return Some((*expected).value),
                    Err(actual) => expected = actual,
                }
            }
        }
    }
}

struct StackRef(NonNull<Stack>);
unsafe impl Send for StackRef {}

fn mutate(stack: StackRef, index: usize, results: mpsc::Sender<Vec<usize>>) {
    // SAFETY: the stack is rooted by the spawning thread for the whole run.
    let stack = unsafe { stack.0.as_ref() };
    loam_gc::enter();
    loam_gc::push_root(NonNull::from(stack));

    let mut rng = StdRng::seed_from_u64(79 + index as u64);
    let mut next_value = index;
    let mut popped = Vec::new();

    loop {
        loam_gc::handshake();
        for _ in 0..QUANTUM {
            if next_value >= PUSHES || rng.gen_range(0..2) == 0 {
                if let Some(value) = stack.pop() {
                    popped.push(value);
                }
            } else {
                stack.push(next_value);
                next_value += THREADS;
            }
        }
        if next_value >= PUSHES {
            // Own pushes done; exit once the stack reads empty. Remaining
            // elements belong to threads that are still draining.
            match stack.pop() {
                Some(value) => popped.push(value),
                None => break,
            }
        }
    }

    results.send(popped).unwrap();
    loam_gc::pop_root();
    loam_gc::leave();
}

#[test]
fn treiber_stack_stress() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let collector = loam_gc::spawn();
    loam_gc::enter();

    let stack = loam_gc::alloc(Stack {
        header: GcHeader::new(),
        head: AtomicStrong::null(),
    });
    loam_gc::push_root(stack);

    let (results, collected) = mpsc::channel::<Vec<usize>>();
    let workers: Vec<_> = (0..THREADS)
        .map(|index| {
            let results = results.clone();
            let stack = StackRef(stack);
            thread::spawn(move || mutate(stack, index, results))
        })
        .collect();
    drop(results);

    // Stay responsive to the collector while the workers run.
    let mut popped = Vec::with_capacity(PUSHES);
    let mut open = THREADS;
    while open > 0 {
        match collected.recv_timeout(Duration::from_millis(10)) {
            Ok(batch) => {
                popped.extend(batch);
                open -= 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => loam_gc::handshake(),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    for worker in workers {
        worker.join().unwrap();
    }

    popped.sort_unstable();
    assert_eq!(popped.len(), PUSHES);
    for (expected, value) in popped.iter().enumerate() {
        assert_eq!(expected, *value, "value popped twice or lost");
    }

    // Quiesce: a few full cycles must reclaim every dead node, leaving only
    // the (empty) stack itself.
    let settled = loam_gc::collections() + 3;
    while loam_gc::collections() < settled {
        loam_gc::handshake();
        thread::yield_now();
    }
    assert!(
        loam_gc::objects_live() <= 2,
        "leak: {} objects survived quiescence",
        loam_gc::objects_live()
    );
    assert!(loam_gc::objects_freed() as usize >= PUSHES);

    loam_gc::pop_root();
    loam_gc::leave();
    loam_gc::request_stop();
    collector.join().unwrap();
}
