use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
  Quit(i32),
  CloseRequested,
  Input(String),
}

#[derive(Debug, Clone)]
pub struct LoopHandle {
  tx: mpsc::Sender<Signal>,
  quit_requested: Arc<AtomicBool>,
}

impl LoopHandle {
  /// Asks the loop to stop with `exit_code`. Only the first request counts;
  /// later ones return `false` and are dropped.
  pub fn quit(&self, exit_code: i32) -> bool {
    if self.quit_requested.swap(true, Ordering::SeqCst) {
      tracing::debug!(exit_code, "quit already requested; ignoring");
      return false;
    }
    let _ = self.tx.send(Signal::Quit(exit_code));
    true
  }

  pub fn quit_requested(&self) -> bool {
    self.quit_requested.load(Ordering::SeqCst)
  }

  pub fn request_close(&self) {
    let _ = self.tx.send(Signal::CloseRequested);
  }

  pub fn post_input(&self, line: impl Into<String>) {
    let _ = self.tx.send(Signal::Input(line.into()));
  }
}

pub trait LoopClient {
  fn handle_signal(&mut self, signal: Signal, handle: &LoopHandle);

  fn tick(&mut self, _now: Instant) {}
}

pub type Task<S> = Box<dyn FnOnce(&mut S, &LoopHandle)>;

pub struct EventLoop<S> {
  tasks: VecDeque<Task<S>>,
  rx: mpsc::Receiver<Signal>,
  handle: LoopHandle,
  tick: Duration,
}

impl<S: LoopClient> EventLoop<S> {
  pub fn new(tick: Duration) -> Self {
    let (tx, rx) = mpsc::channel();
    Self {
      tasks: VecDeque::new(),
      rx,
      handle: LoopHandle {
        tx,
        quit_requested: Arc::new(AtomicBool::new(false)),
      },
      tick,
    }
  }

  pub fn handle(&self) -> LoopHandle {
    self.handle.clone()
  }

  pub fn post(&mut self, task: impl FnOnce(&mut S, &LoopHandle) + 'static) {
    self.tasks.push_back(Box::new(task));
  }

  pub fn pending_tasks(&self) -> usize {
    self.tasks.len()
  }

  pub fn run(&mut self, client: &mut S) -> i32 {
    tracing::debug!(queued = self.pending_tasks(), "event loop started");

    let exit_code = loop {
      // Tasks queued during this turn wait for the next one.
      let batch = self.tasks.len();
      for _ in 0..batch {
        if let Some(task) = self.tasks.pop_front() {
          task(client, &self.handle);
        }
      }

      let wait = if self.tasks.is_empty() {
        self.tick
      } else {
        Duration::ZERO
      };

      match self.rx.recv_timeout(wait) {
        Ok(Signal::Quit(code)) => break code,
        Ok(signal) => client.handle_signal(signal, &self.handle),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
      }

      client.tick(Instant::now());
    };

    tracing::debug!(exit_code, "event loop stopped");
    exit_code
  }
}
