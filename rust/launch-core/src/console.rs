// rust/launch-core/src/console.rs

//! User-facing console output.
//!
//! Four severity-tagged operations write `[tag] message` lines: `info` and
//! `success` go to stdout and are dropped when the console is quiet, `warn`
//! and `error` go to stderr and are never dropped. Colors come from a
//! [`ConsoleStyle`] that is resolved once per stream when the console is
//! built and never changes afterwards.
//!
//! In a distributed run only rank 0 talks: build the console with
//! [`Console::for_rank`] and the other ranks become quiet.

use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

use crate::config::ConsoleConfig;

const ANSI_TAG: &str = "\x1b[38;5;244m";
const ANSI_INFO: &str = "\x1b[1;36m";
const ANSI_SUCCESS: &str = "\x1b[1;32m";
const ANSI_WARN: &str = "\x1b[1;33m";
const ANSI_ERROR: &str = "\x1b[1;31m";
const ANSI_RESET: &str = "\x1b[0m";

const BANNER: &str = r"
  ____ _____ ____       _                           _
 |  _ \_   _|  _ \     | |    __ _ _   _ _ __   ___| |__
 | | | || | | |_) |____| |   / _` | | | | '_ \ / __| '_ \
 | |_| || | |  _ <_____| |__| (_| | |_| | | | | (__| | | |
 |____/ |_| |_| \_\    |_____\__,_|\__,_|_| |_|\___|_| |_|
";

/// Escape sequences for each console role. Empty strings mean no color.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleStyle {
    tag: String,
    info: String,
    success: String,
    warn: String,
    error: String,
    reset: String,
}

impl ConsoleStyle {
    /// No escape sequences at all.
    pub fn plain() -> Self {
        Self::default()
    }

    /// The built-in ANSI palette.
    pub fn ansi() -> Self {
        Self {
            tag: ANSI_TAG.to_string(),
            info: ANSI_INFO.to_string(),
            success: ANSI_SUCCESS.to_string(),
            warn: ANSI_WARN.to_string(),
            error: ANSI_ERROR.to_string(),
            reset: ANSI_RESET.to_string(),
        }
    }

    /// Resolves the style for one output stream.
    ///
    /// `no_color` beats everything. Explicit overrides are used as given
    /// (reset falls back to the ANSI reset). Otherwise the built-in palette
    /// is used only when the stream is a terminal.
    pub fn resolve(config: &ConsoleConfig, is_terminal: bool) -> Self {
        if config.no_color {
            return Self::plain();
        }

        let colors = &config.colors;
        if !colors.is_empty() {
            let pick = |c: &Option<String>| c.clone().unwrap_or_default();
            return Self {
                tag: pick(&colors.tag),
                info: pick(&colors.info),
                success: pick(&colors.success),
                warn: pick(&colors.warn),
                error: pick(&colors.error),
                reset: colors
                    .reset
                    .clone()
                    .unwrap_or_else(|| ANSI_RESET.to_string()),
            };
        }

        if is_terminal {
            Self::ansi()
        } else {
            Self::plain()
        }
    }

    pub fn has_color(&self) -> bool {
        !self.reset.is_empty()
            && [&self.tag, &self.info, &self.success, &self.warn, &self.error]
                .iter()
                .any(|c| !c.is_empty())
    }

    fn colorize(&self, color: &str, message: &str) -> String {
        if color.is_empty() || self.reset.is_empty() {
            message.to_string()
        } else {
            format!("{color}{message}{}", self.reset)
        }
    }

    fn prefix(&self, tag: &str) -> String {
        if self.tag.is_empty() || self.reset.is_empty() {
            format!("[{tag}] ")
        } else {
            format!("{}[{tag}]{} ", self.tag, self.reset)
        }
    }

    /// Formats one output line, without the trailing newline.
    pub fn format(&self, color: Role, tag: &str, message: &str) -> String {
        let color = match color {
            Role::Info => &self.info,
            Role::Success => &self.success,
            Role::Warn => &self.warn,
            Role::Error if self.error.is_empty() => &self.warn,
            Role::Error => &self.error,
        };
        format!("{}{}", self.prefix(tag), self.colorize(color, message))
    }
}

/// Semantic role of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Info,
    Success,
    Warn,
    Error,
}

type Sink = Mutex<Box<dyn Write + Send>>;

/// Severity-tagged writer over stdout/stderr (or injected writers).
pub struct Console {
    out: Sink,
    err: Sink,
    out_style: ConsoleStyle,
    err_style: ConsoleStyle,
    quiet: bool,
}

impl Console {
    /// Console over the process stdout and stderr, with each stream's style
    /// resolved from `config` and its own terminal detection.
    pub fn stdio(config: &ConsoleConfig) -> Self {
        let out_style = ConsoleStyle::resolve(config, io::stdout().is_terminal());
        let err_style = ConsoleStyle::resolve(config, io::stderr().is_terminal());
        Self::with_writers(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            out_style,
            err_style,
        )
    }

    /// Console over arbitrary writers.
    pub fn with_writers(
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
        out_style: ConsoleStyle,
        err_style: ConsoleStyle,
    ) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            out_style,
            err_style,
            quiet: false,
        }
    }

    /// Suppresses (or re-enables) stdout output.
    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Quiet on every rank but 0.
    #[must_use]
    pub fn for_rank(self, rank: usize) -> Self {
        self.quiet(rank != 0)
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn stderr_style(&self) -> &ConsoleStyle {
        &self.err_style
    }

    pub fn info(&self, tag: &str, message: &str) {
        self.emit_out(Role::Info, tag, message);
    }

    pub fn success(&self, tag: &str, message: &str) {
        self.emit_out(Role::Success, tag, message);
    }

    pub fn warn(&self, tag: &str, message: &str) {
        self.emit_err(Role::Warn, tag, message);
    }

    pub fn error(&self, tag: &str, message: &str) {
        self.emit_err(Role::Error, tag, message);
    }

    /// Prints the launch banner on stdout, unless quiet.
    pub fn banner(&self) {
        if self.quiet {
            return;
        }
        let style = &self.out_style;
        write_line(&self.out, &style.colorize(&style.info, BANNER));
    }

    fn emit_out(&self, role: Role, tag: &str, message: &str) {
        if self.quiet {
            return;
        }
        write_line(&self.out, &self.out_style.format(role, tag, message));
    }

    fn emit_err(&self, role: Role, tag: &str, message: &str) {
        write_line(&self.err, &self.err_style.format(role, tag, message));
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("out_style", &self.out_style)
            .field("err_style", &self.err_style)
            .field("quiet", &self.quiet)
            .finish()
    }
}

// Console output is best effort; a closed pipe must not fail the caller.
fn write_line(sink: &Sink, line: &str) {
    let mut writer = match sink.lock() {
        Ok(w) => w,
        Err(poisoned) => poisoned.into_inner(),
    };
    let _ = writeln!(writer, "{line}");
    let _ = writer.flush();
}

/// In-memory writer for capturing console output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = match self.0.lock() {
            Ok(b) => b.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Console {
    /// Plain console writing into two in-memory buffers.
    pub fn captured() -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let console = Self::with_writers(
            Box::new(out.clone()),
            Box::new(err.clone()),
            ConsoleStyle::plain(),
            ConsoleStyle::plain(),
        );
        (console, out, err)
    }
}
