//! The single-threaded cooperative scheduler.
//!
//! A [`Runloop`] is a FIFO queue of closures on one thread. `post` is the
//! sole "yield to the next turn" primitive in this crate: flows use it to
//! defer user-handler delivery so that a handler is never invoked inline
//! with the call that armed it, even when its result is already
//! available.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::trace;

type Task = Box<dyn FnOnce()>;

/// A single-threaded FIFO task queue.
///
/// Not `Send`; every flow, tunnel and handler scheduled on a runloop
/// lives on the thread that drains it.
#[derive(Default)]
pub struct Runloop {
    queue: RefCell<VecDeque<Task>>,
}

impl Runloop {
    /// Creates an empty runloop behind an `Rc`, the form every flow
    /// holds it in.
    pub fn new() -> Rc<Runloop> {
        Rc::new(Runloop::default())
    }

    /// Enqueues a closure to run on a later turn. FIFO with respect to
    /// every other posted closure.
    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Runs the oldest queued task, if any. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        // The borrow must end before the task runs: tasks post further
        // tasks.
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drains the queue until no task is left, including tasks posted
    /// while draining. Returns how many tasks ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        trace!("runloop idle after {} tasks", ran);
        ran
    }

    /// Whether no task is currently queued.
    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
