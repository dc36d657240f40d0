// Simulated device transport shared by the integration tests
//
// Incoming bytes are scheduled with an arrival time; each read returns one
// arrived chunk, so chunk boundaries are under test control.

#![allow(dead_code)]

use devlink::config::ConnectionConfig;
use devlink::transport::Transport;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Rule {
    needle: String,
    replies: Vec<(Duration, Vec<u8>)>,
}

#[derive(Default)]
struct SimState {
    pending: VecDeque<(Instant, Vec<u8>)>,
    written: Vec<String>,
    rules: Vec<Rule>,
    broken: bool,
    closed: bool,
    fail_writes: bool,
    write_delay: Option<Duration>,
    stall_polls: bool,
    active_polls: usize,
    max_active_polls: usize,
    handles: usize,
}

/// The device end of a simulated link. Clones share state.
#[derive(Clone, Default)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
    cond: Arc<Condvar>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport handle connected to this device
    pub fn transport(&self) -> Box<dyn Transport> {
        self.state.lock().handles += 1;
        Box::new(SimTransport {
            device: self.clone(),
        })
    }

    /// Make `bytes` readable right away
    pub fn push(&self, bytes: &str) {
        self.push_after(Duration::ZERO, bytes);
    }

    /// Make `bytes` readable after `delay`
    pub fn push_after(&self, delay: Duration, bytes: &str) {
        let mut state = self.state.lock();
        schedule(&mut state, Instant::now() + delay, bytes.as_bytes().to_vec());
        self.cond.notify_all();
    }

    /// Make raw, possibly non-UTF-8, bytes readable right away
    pub fn push_raw(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        schedule(&mut state, Instant::now(), bytes.to_vec());
        self.cond.notify_all();
    }

    /// Whenever a written command contains `needle`, schedule `replies`
    /// relative to the write
    pub fn on_command(&self, needle: &str, replies: &[(u64, &str)]) {
        self.state.lock().rules.push(Rule {
            needle: needle.to_string(),
            replies: replies
                .iter()
                .map(|(ms, text)| (Duration::from_millis(*ms), text.as_bytes().to_vec()))
                .collect(),
        });
    }

    /// Every later poll, read and write fails permanently
    pub fn break_link(&self) {
        self.state.lock().broken = true;
        self.cond.notify_all();
    }

    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }

    /// Every later write blocks for `delay`, or until the device is closed
    pub fn slow_writes(&self, delay: Duration) {
        self.state.lock().write_delay = Some(delay);
    }

    /// Every later poll sleeps its full timeout, ignoring data and close
    pub fn stall_polls(&self) {
        self.state.lock().stall_polls = true;
    }

    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Highest number of handles that were polling at the same instant
    pub fn max_concurrent_polls(&self) -> usize {
        self.state.lock().max_active_polls
    }

    pub fn handle_count(&self) -> usize {
        self.state.lock().handles
    }
}

/// Short timings so the suite runs quickly
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig::new()
        .with_welcome_timeout_ms(100)
        .with_settle_delay_ms(50)
        .with_reply_timeout_ms(200)
        .with_stream_poll_timeout_ms(50)
        .with_stop_join_timeout_ms(2000)
}

fn schedule(state: &mut SimState, at: Instant, bytes: Vec<u8>) {
    let index = state
        .pending
        .iter()
        .position(|(t, _)| *t > at)
        .unwrap_or(state.pending.len());
    state.pending.insert(index, (at, bytes));
}

fn check(state: &SimState) -> io::Result<()> {
    if state.closed {
        return Err(io::Error::new(io::ErrorKind::NotConnected, "sim closed"));
    }
    if state.broken {
        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sim link broken"));
    }
    Ok(())
}

pub struct SimTransport {
    device: SimDevice,
}

impl Transport for SimTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.device.state.lock();
        check(&state)?;
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sim write failed"));
        }
        if let Some(delay) = state.write_delay {
            let deadline = Instant::now() + delay;
            while !state.closed && Instant::now() < deadline {
                self.device.cond.wait_until(&mut state, deadline);
            }
            check(&state)?;
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        let now = Instant::now();
        let scheduled: Vec<(Instant, Vec<u8>)> = state
            .rules
            .iter()
            .filter(|rule| text.contains(&rule.needle))
            .flat_map(|rule| rule.replies.iter().map(|(d, b)| (now + *d, b.clone())))
            .collect();
        for (at, reply) in scheduled {
            schedule(&mut state, at, reply);
        }
        state.written.push(text);
        self.device.cond.notify_all();
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.device.state.lock();
        state.active_polls += 1;
        state.max_active_polls = state.max_active_polls.max(state.active_polls);

        if state.stall_polls {
            drop(state);
            std::thread::sleep(timeout);
            self.device.state.lock().active_polls -= 1;
            return Ok(false);
        }

        let result = loop {
            if let Err(e) = check(&state) {
                break Err(e);
            }
            let now = Instant::now();
            let next = state.pending.front().map(|(at, _)| *at);
            if next.is_some_and(|at| at <= now) {
                break Ok(true);
            }
            if now >= deadline {
                break Ok(false);
            }
            let wake = next.map_or(deadline, |at| at.min(deadline));
            self.device.cond.wait_for(&mut state, wake - now);
        };

        state.active_polls -= 1;
        result
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut state = self.device.state.lock();
        check(&state)?;
        let now = Instant::now();
        match state.pending.front() {
            Some((at, _)) if *at <= now => Ok(state.pending.pop_front().map(|(_, b)| b).unwrap_or_default()),
            _ => Ok(Vec::new()),
        }
    }

    fn close(&mut self) {
        self.device.state.lock().closed = true;
        self.device.cond.notify_all();
    }

    fn is_open(&self) -> bool {
        !self.device.state.lock().closed
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        check(&self.device.state.lock())?;
        Ok(self.device.transport())
    }
}
