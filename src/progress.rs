//! Progress indicator
//!
//! Cosmetic only: it never gates execution. The indicator redraws one line
//! per frame interval until the worker sets the shared `finished` flag, then
//! draws a final frame and returns.
//!
//! When a `StepEvent` receiver is attached the bar shows the real share of
//! finished steps and the name of the running step. Without one it falls back
//! to a spinner.

use crate::orchestrator::StepEvent;
use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

/// Default delay between frames
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(50);

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
const BAR_WIDTH: usize = 30;

/// What the indicator knows about the run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub total: usize,
    pub finished_steps: usize,
    pub failures: usize,
    pub current: Option<String>,
}

impl ProgressState {
    pub fn apply(&mut self, event: &StepEvent) {
        match event {
            StepEvent::Started { total, name, .. } => {
                self.total = *total;
                self.current = Some(name.clone());
            }
            StepEvent::Finished {
                total, status, ..
            } => {
                self.total = *total;
                self.finished_steps += 1;
                if status.is_failure() {
                    self.failures += 1;
                }
                self.current = None;
            }
        }
    }

    /// Share of finished steps, 0..=100. `None` until a step reports in.
    pub fn percent(&self) -> Option<u16> {
        if self.total == 0 {
            return None;
        }
        let done = self.finished_steps.min(self.total);
        Some((done * 100 / self.total) as u16)
    }
}

/// Renders progress until the run is finished
pub struct ProgressIndicator<W: Write> {
    out: W,
    finished: Arc<AtomicBool>,
    events: Option<Receiver<StepEvent>>,
    interval: Duration,
    state: ProgressState,
    frame: usize,
    /// The sender is gone: the worker has returned or unwound
    disconnected: bool,
}

impl<W: Write> ProgressIndicator<W> {
    pub fn new(out: W, finished: Arc<AtomicBool>) -> Self {
        Self {
            out,
            finished,
            events: None,
            interval: DEFAULT_FRAME_INTERVAL,
            state: ProgressState::default(),
            frame: 0,
            disconnected: false,
        }
    }

    pub fn with_events(mut self, events: Receiver<StepEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Animate until `finished` is observed (or the event sender is
    /// dropped), then draw the final frame.
    ///
    /// Returns the writer so callers can inspect what was drawn.
    pub fn run(mut self) -> io::Result<W> {
        loop {
            self.drain_events();
            if self.finished.load(Ordering::SeqCst) || self.disconnected {
                // Events sent before the flag was set are already queued
                self.drain_events();
                self.draw(true)?;
                break;
            }
            self.draw(false)?;
            self.frame = self.frame.wrapping_add(1);
            thread::sleep(self.interval);
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn drain_events(&mut self) {
        let Some(events) = &self.events else {
            return;
        };
        loop {
            match events.try_recv() {
                Ok(event) => self.state.apply(&event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn draw(&mut self, last: bool) -> io::Result<()> {
        let line = render_line(&self.state, self.frame, last);
        queue!(
            self.out,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
        self.out.flush()
    }
}

/// One frame of the indicator as plain text
pub fn render_line(state: &ProgressState, frame: usize, last: bool) -> String {
    let spinner = if last { ' ' } else { SPINNER[frame % SPINNER.len()] };

    let Some(percent) = state.percent() else {
        return if last {
            "Done".to_string()
        } else {
            format!("{} Working...", spinner)
        };
    };

    let filled = BAR_WIDTH * percent as usize / 100;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));

    let detail = match (&state.current, last) {
        (_, true) if state.finished_steps < state.total => "stopped".to_string(),
        (_, true) => "done".to_string(),
        (Some(name), false) => name.clone(),
        (None, false) => String::new(),
    };

    let mut line = format!(
        "{} [{}] {:>3}% ({}/{}) {}",
        spinner, bar, percent, state.finished_steps, state.total, detail
    );
    if state.failures > 0 {
        line.push_str(&format!(" [{} failed]", state.failures));
    }
    line.trim_end().to_string()
}
