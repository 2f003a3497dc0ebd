//! Callbacks the run loop reports through: cooperative interruption and
//! leveled log messages.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Polled before every transition. Returning `true` ends the run early,
/// which is not an error.
pub trait Interrupt: Send {
    fn stop_requested(&mut self) -> bool;
}

/// Never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn stop_requested(&mut self) -> bool {
        false
    }
}

impl Interrupt for Arc<AtomicBool> {
    fn stop_requested(&mut self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Adapter for closures, e.g. `InterruptFn(|| ctrlc_flag.get())`.
pub struct InterruptFn<F>(pub F);

impl<F: FnMut() -> bool + Send> Interrupt for InterruptFn<F> {
    fn stop_requested(&mut self) -> bool {
        (self.0)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warn,
    Error,
}

pub trait Logger: Send {
    fn log(&mut self, level: Level, message: &str);

    fn info(&mut self, message: &str) {
        self.log(Level::Info, message)
    }

    fn warn(&mut self, message: &str) {
        self.log(Level::Warn, message)
    }

    fn error(&mut self, message: &str) {
        self.log(Level::Error, message)
    }
}

/// Forwards messages to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    chain: Option<u64>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self { chain: None }
    }

    pub fn for_chain(chain: u64) -> Self {
        Self { chain: Some(chain) }
    }
}

impl Logger for TracingLogger {
    fn log(&mut self, level: Level, message: &str) {
        match (level, self.chain) {
            (Level::Info, Some(chain)) => tracing::info!(chain, "{}", message),
            (Level::Info, None) => tracing::info!("{}", message),
            (Level::Warn, Some(chain)) => tracing::warn!(chain, "{}", message),
            (Level::Warn, None) => tracing::warn!("{}", message),
            (Level::Error, Some(chain)) => tracing::error!(chain, "{}", message),
            (Level::Error, None) => tracing::error!("{}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&mut self, _level: Level, _message: &str) {}
}

/// Keeps every message in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    pub messages: Vec<(Level, String)>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages
            .iter()
            .any(|(lvl, msg)| *lvl == level && msg.contains(needle))
    }

    pub fn count(&self, level: Level) -> usize {
        self.messages.iter().filter(|(lvl, _)| *lvl == level).count()
    }
}

impl Logger for MemoryLogger {
    fn log(&mut self, level: Level, message: &str) {
        self.messages.push((level, message.to_string()));
    }
}

/// A logger shared between chains. Each message is written under the lock.
impl<L: Logger> Logger for Arc<Mutex<L>> {
    fn log(&mut self, level: Level, message: &str) {
        self.lock().expect("Poisoned lock").log(level, message)
    }
}
