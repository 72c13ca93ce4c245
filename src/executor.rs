//! Fixed-size worker pool for read execution.
//!
//! Readers block on disk, so parallelism is capped at a configured worker
//! count while an unbounded FIFO queue absorbs bursts; backpressure belongs
//! to the RPC transport in front of the handler. Each worker owns one
//! [`ReadBuffer`] for its whole life, so the hot path allocates nothing for
//! value bytes.
//!
//! Waiting and execution are deliberately decoupled: a caller that stops
//! waiting simply drops its [`Submission`], the worker still runs the task,
//! and the worker's send of the result fails silently. Tasks are never
//! cancelled; workers are only stopped by shutdown, which closes intake,
//! drains the queue, and joins every thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::storage::ReadBuffer;

type Task = Box<dyn FnOnce(&mut ReadBuffer) + Send>;

/// The worker pool behind `get` and `get_bulk`.
pub struct GetExecutor {
    queue: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl GetExecutor {
    /// Spawns `num_workers` worker threads, each with its own scratch
    /// buffer.
    pub fn new(num_workers: usize) -> Result<Self> {
        let (sender, receiver) = channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("get-worker-{id}"))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(handle);
        }

        Ok(Self {
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues a task and returns a handle to await its result. Panics in
    /// the task are caught and surface from [`Submission::wait`]; they never
    /// take the worker down.
    pub fn submit<R, F>(&self, task: F) -> Result<Submission<R>>
    where
        F: FnOnce(&mut ReadBuffer) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = channel();
        let boxed: Task = Box::new(move |scratch| {
            let outcome = catch_unwind(AssertUnwindSafe(|| task(scratch)));
            // The waiter may have given up; its result is discarded.
            let _ = sender.send(outcome);
        });

        match self.queue.lock().unwrap().as_ref() {
            Some(queue) => queue.send(boxed).map_err(|_| Error::Terminated)?,
            None => return Err(Error::Terminated),
        }
        Ok(Submission { receiver })
    }

    /// Stops intake, lets the workers drain the queue, then joins them.
    pub fn shut_down(&self) -> Result<()> {
        // Dropping the sender closes the queue; workers keep receiving
        // already-queued tasks until it reports disconnected.
        drop(self.queue.lock().unwrap().take());

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            worker
                .join()
                .map_err(|_| Error::Internal("get worker panicked".to_string()))?;
        }
        Ok(())
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Task>>) {
    let mut scratch = ReadBuffer::new();
    loop {
        // Holding the lock across recv parks exactly one idle worker in
        // the channel; the rest queue on the mutex. Execution happens
        // after the guard is released.
        let task = match receiver.lock().unwrap().recv() {
            Ok(task) => task,
            Err(_) => break,
        };
        task(&mut scratch);
        scratch.clear();
    }
}

/// A one-shot handle to a submitted task's result.
#[derive(Debug)]
pub struct Submission<R> {
    receiver: Receiver<thread::Result<R>>,
}

impl<R> Submission<R> {
    /// Blocks until the task completes. Returns `Error::Interrupted` if the
    /// channel to the worker is severed before a result arrives, and
    /// `Error::Internal` if the task panicked.
    pub fn wait(self) -> Result<R> {
        match self.receiver.recv() {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(panic)) => Err(Error::Internal(panic_message(&panic))),
            Err(_) => Err(Error::Interrupted),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
