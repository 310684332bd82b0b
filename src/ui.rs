//! Terminal interaction
//!
//! `TerminalUI` is the seam between the update flow and the terminal. The
//! crossterm implementation draws inline (no alternate screen) so the
//! transcript stays in the scrollback after the updater exits.
//!
//! Raw mode is enabled only while keys are being read and is restored by
//! `RawModeGuard` on every exit path, including errors.

use crate::credential::Credential;
use crate::error::{Result, UpdaterError};
use crate::report::InstallReport;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{PrintStyledContent, Stylize};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{cursor, queue};
use std::io::{self, Write};
use std::time::Duration;

const KEY_POLL: Duration = Duration::from_millis(50);

/// Everything the update flow asks of the terminal
pub trait TerminalUI {
    fn banner(&mut self, title: &str) -> Result<()>;

    /// Print one line of plain text
    fn message(&mut self, text: &str) -> Result<()>;

    /// Arrow-key menu. `None` when the user backs out with Esc or q.
    fn select(&mut self, title: &str, options: &[&str]) -> Result<Option<usize>>;

    /// `[y/N]` question; anything but y/Y is no
    fn confirm(&mut self, prompt: &str) -> Result<bool>;

    /// Read a line without echo
    fn read_secret(&mut self, prompt: &str) -> Result<Credential>;

    fn show_report(&mut self, report: &InstallReport) -> Result<()>;
}

/// Restores cooked mode when dropped
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode()
            .map_err(|e| UpdaterError::terminal(format!("Failed to enable raw mode: {}", e)))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// What a key press does to a menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Move(usize),
    Choose(usize),
    Cancel,
    Ignore,
}

/// Menu navigation, wrapping at both ends
pub fn menu_action(selected: usize, len: usize, key: &KeyEvent) -> MenuAction {
    if len == 0 {
        return MenuAction::Cancel;
    }
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => MenuAction::Move((selected + len - 1) % len),
        KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => MenuAction::Move((selected + 1) % len),
        KeyCode::Home => MenuAction::Move(0),
        KeyCode::End => MenuAction::Move(len - 1),
        KeyCode::Enter => MenuAction::Choose(selected),
        KeyCode::Esc | KeyCode::Char('q') => MenuAction::Cancel,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => MenuAction::Cancel,
        KeyCode::Char(c) => match c.to_digit(10) {
            Some(d) if d >= 1 && (d as usize) <= len => MenuAction::Choose(d as usize - 1),
            _ => MenuAction::Ignore,
        },
        _ => MenuAction::Ignore,
    }
}

/// Line editor state for hidden input.
///
/// Every buffer the typed secret leaves behind (on erase, growth, cancel or
/// drop) is handed to a [`Credential`] and wiped with it.
#[derive(Default)]
pub struct SecretInput {
    buffer: String,
}

/// Outcome of feeding one key to `SecretInput`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretAction {
    Continue,
    Submit,
    Cancel,
}

const SECRET_CAPACITY: usize = 128;

impl SecretInput {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(SECRET_CAPACITY),
        }
    }

    pub fn apply(&mut self, key: &KeyEvent) -> SecretAction {
        match key.code {
            KeyCode::Enter => SecretAction::Submit,
            KeyCode::Esc => self.cancel(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.cancel(),
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.replace_with("", SECRET_CAPACITY);
                SecretAction::Continue
            }
            KeyCode::Backspace => {
                let end = self.buffer.char_indices().last().map_or(0, |(i, _)| i);
                let kept = self.buffer[..end].to_string();
                let capacity = self.buffer.capacity();
                self.replace_with(&kept, capacity);
                wipe(kept);
                SecretAction::Continue
            }
            KeyCode::Char(c) => {
                if self.buffer.len() + c.len_utf8() > self.buffer.capacity() {
                    // Growing in place would free the old allocation unwiped
                    let current = std::mem::take(&mut self.buffer);
                    self.buffer = String::with_capacity(current.capacity().max(SECRET_CAPACITY) * 2);
                    self.buffer.push_str(&current);
                    wipe(current);
                }
                self.buffer.push(c);
                SecretAction::Continue
            }
            _ => SecretAction::Continue,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_credential(mut self) -> Credential {
        Credential::new(std::mem::take(&mut self.buffer))
    }

    fn cancel(&mut self) -> SecretAction {
        self.replace_with("", 0);
        SecretAction::Cancel
    }

    /// Swap in a fresh buffer holding `text` and wipe the old one
    fn replace_with(&mut self, text: &str, capacity: usize) {
        let mut fresh = String::with_capacity(capacity.max(text.len()));
        fresh.push_str(text);
        wipe(std::mem::replace(&mut self.buffer, fresh));
    }
}

impl Drop for SecretInput {
    fn drop(&mut self) {
        wipe(std::mem::take(&mut self.buffer));
    }
}

/// Zero the bytes of `buffer` before freeing it
fn wipe(mut buffer: String) {
    // The credential only wipes up to its length
    let capacity = buffer.capacity();
    while buffer.len() < capacity {
        buffer.push('\0');
    }
    drop(Credential::new(buffer));
}

/// crossterm-backed `TerminalUI`
pub struct CrosstermUi<W: Write> {
    out: W,
}

impl CrosstermUi<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> CrosstermUi<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn next_key(&self) -> Result<KeyEvent> {
        loop {
            if event::poll(KEY_POLL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        return Ok(key);
                    }
                }
            }
        }
    }

    fn draw_menu(&mut self, options: &[&str], selected: usize, redraw: bool) -> Result<()> {
        if redraw {
            queue!(self.out, cursor::MoveUp(options.len() as u16))?;
        }
        for (i, option) in options.iter().enumerate() {
            queue!(self.out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            let label = format!("{}. {}", i + 1, option);
            if i == selected {
                queue!(self.out, PrintStyledContent(format!("> {}", label).reverse()))?;
            } else {
                write!(self.out, "  {}", label)?;
            }
            // Raw mode: no implicit carriage return
            write!(self.out, "\r\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> TerminalUI for CrosstermUi<W> {
    fn banner(&mut self, title: &str) -> Result<()> {
        let rule = "=".repeat(title.chars().count().max(20));
        queue!(
            self.out,
            PrintStyledContent(rule.clone().cyan()),
            cursor::MoveToNextLine(1),
            PrintStyledContent(title.cyan().bold()),
            cursor::MoveToNextLine(1),
            PrintStyledContent(rule.cyan()),
        )?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    fn message(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()?;
        Ok(())
    }

    fn select(&mut self, title: &str, options: &[&str]) -> Result<Option<usize>> {
        writeln!(self.out, "{}", title.bold())?;
        writeln!(self.out, "{}", "(arrows to move, Enter to choose, Esc to quit)".dim())?;

        let _raw = RawModeGuard::new()?;
        let mut selected = 0;
        self.draw_menu(options, selected, false)?;

        loop {
            let key = self.next_key()?;
            match menu_action(selected, options.len(), &key) {
                MenuAction::Move(next) => {
                    selected = next;
                    self.draw_menu(options, selected, true)?;
                }
                MenuAction::Choose(index) => return Ok(Some(index)),
                MenuAction::Cancel => return Ok(None),
                MenuAction::Ignore => {}
            }
        }
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        write!(self.out, "{} [y/N] ", prompt)?;
        self.out.flush()?;

        let answer = {
            let _raw = RawModeGuard::new()?;
            let key = self.next_key()?;
            matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y'))
        };

        writeln!(self.out, "{}", if answer { "y" } else { "n" })?;
        Ok(answer)
    }

    fn read_secret(&mut self, prompt: &str) -> Result<Credential> {
        write!(self.out, "{}", prompt)?;
        self.out.flush()?;

        let mut input = SecretInput::new();
        let outcome = {
            let _raw = RawModeGuard::new()?;
            loop {
                let key = self.next_key()?;
                match input.apply(&key) {
                    SecretAction::Continue => {}
                    done => break done,
                }
            }
        };
        writeln!(self.out)?;

        match outcome {
            SecretAction::Submit => Ok(input.into_credential()),
            _ => Err(UpdaterError::terminal("password entry cancelled")),
        }
    }

    fn show_report(&mut self, report: &InstallReport) -> Result<()> {
        writeln!(self.out)?;
        write!(self.out, "{}", report)?;
        self.out.flush()?;
        Ok(())
    }
}
