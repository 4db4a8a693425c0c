// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The dispatcher: one core thread owning handle polling, the timer wheel
//! and every listener callback.
//!
//! `handle_attach(source, interests, callback)` registers an OS handle
//! with the mio poll; readiness invokes the callback on the core thread.
//! The same thread services the timer wheel and any closures scheduled
//! with `schedule`, which is how listener re-entry is serialized instead
//! of recursed. The handle abstraction is the only syscall dependency the
//! upper layers have.

use crate::core::timer::TimerWheel;
use crossbeam::channel::{unbounded, Receiver, Sender};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Callback invoked on handle readiness (core thread).
pub type ReadyFn = Box<dyn FnMut() + Send>;
/// One-shot closure scheduled onto the core thread.
pub type ScheduledFn = Box<dyn FnOnce() + Send>;

const WAKER_TOKEN: Token = Token(usize::MAX - 1);

enum Command {
    Attach {
        token: Token,
        callback: ReadyFn,
    },
    Detach {
        token: Token,
    },
    Schedule(ScheduledFn),
    Shutdown,
}

/// Handle returned by `attach`; pass it back to `detach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub usize);

/// The dispatcher front-end. Cheap to clone; owns the core thread.
pub struct Dispatcher {
    poll_registry: mio::Registry,
    commands: Sender<Command>,
    waker: Arc<Waker>,
    timers: TimerWheel,
    next_token: AtomicUsize,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the core thread.
    pub fn spawn() -> std::io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = unbounded();
        let timers = TimerWheel::new();
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let timers = timers.clone();
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("tdds-core".to_string())
                .spawn(move || core_loop(poll, rx, timers, running))?
        };

        Ok(Arc::new(Dispatcher {
            poll_registry: registry,
            commands: tx,
            waker,
            timers,
            next_token: AtomicUsize::new(1),
            running,
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// The timer service the core thread drives.
    #[must_use]
    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    /// Register an event source; `callback` runs on the core thread each
    /// time the handle becomes readable.
    pub fn handle_attach<S: mio::event::Source>(
        &self,
        source: &mut S,
        interests: Interest,
        callback: ReadyFn,
    ) -> std::io::Result<HandleId> {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.poll_registry.register(source, token, interests)?;
        self.commands
            .send(Command::Attach { token, callback })
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "core thread gone"))?;
        self.waker.wake()?;
        Ok(HandleId(token.0))
    }

    /// Deregister a source.
    pub fn handle_detach<S: mio::event::Source>(
        &self,
        source: &mut S,
        handle: HandleId,
    ) -> std::io::Result<()> {
        self.poll_registry.deregister(source)?;
        let _ = self.commands.send(Command::Detach {
            token: Token(handle.0),
        });
        let _ = self.waker.wake();
        Ok(())
    }

    /// Run a closure on the core thread (listener-safe re-entry).
    pub fn schedule(&self, f: ScheduledFn) {
        if self.commands.send(Command::Schedule(f)).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// True while the core thread runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the core thread and join it.
    pub fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).is_ok() {
            let _ = self.waker.wake();
        }
        let handle = {
            let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn core_loop(mut poll: Poll, rx: Receiver<Command>, timers: TimerWheel, running: Arc<AtomicBool>) {
    let mut events = Events::with_capacity(128);
    let mut handlers: HashMap<Token, ReadyFn> = HashMap::new();

    'outer: loop {
        // sleep until the next timer or an event, capped so commands drain
        let timeout = timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(100))
            .min(Duration::from_millis(250));

        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("[Dispatcher] poll failed: {}", e);
            break;
        }

        // commands first so fresh attachments see their first readiness
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Attach { token, callback } => {
                    handlers.insert(token, callback);
                }
                Command::Detach { token } => {
                    handlers.remove(&token);
                }
                Command::Schedule(f) => f(),
                Command::Shutdown => break 'outer,
            }
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            if let Some(handler) = handlers.get_mut(&event.token()) {
                handler();
            }
        }

        timers.poll_due(Instant::now());
    }

    running.store(false, Ordering::Release);
    log::debug!("[Dispatcher] core thread exiting");
}
