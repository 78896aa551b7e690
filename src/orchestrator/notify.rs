//! User-facing notices.
//!
//! Logs go to stderr through `tracing`; the handful of values an operator
//! must copy (session ids, the Windows password, the tunnel port) are
//! written to stdout so they can be captured. The password also goes to the
//! clipboard, ready for the desktop client's credential prompt.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

/// Something the operator needs to see.
#[derive(Clone, Eq, PartialEq)]
pub enum Notice {
    /// A bastion was created for a session.
    SessionCreated {
        /// Session id, usable with `--session-id`.
        session_id: String,
        /// Instance id.
        instance_id: String,
    },
    /// The bastion was kept running after the command finished.
    Retained {
        /// Session id, usable with `--session-id`.
        session_id: String,
    },
    /// The decrypted administrator password.
    Password {
        /// Instance the password belongs to.
        instance_id: String,
        /// Password in clear text.
        password: String,
    },
    /// A local tunnel is listening.
    Tunnel {
        /// Local port.
        local_port: u16,
    },
}

impl fmt::Debug for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { instance_id, .. } => f
                .debug_struct("Password")
                .field("instance_id", instance_id)
                .field("password", &"<redacted>")
                .finish(),
            Self::SessionCreated {
                session_id,
                instance_id,
            } => f
                .debug_struct("SessionCreated")
                .field("session_id", session_id)
                .field("instance_id", instance_id)
                .finish(),
            Self::Retained { session_id } => f
                .debug_struct("Retained")
                .field("session_id", session_id)
                .finish(),
            Self::Tunnel { local_port } => f
                .debug_struct("Tunnel")
                .field("local_port", local_port)
                .finish(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionCreated {
                session_id,
                instance_id,
            } => write!(f, "Session {session_id} started on instance {instance_id}"),
            Self::Retained { session_id } => write!(
                f,
                "Instance kept running; clean up with `bastion terminate --session-id {session_id}`"
            ),
            Self::Password {
                instance_id,
                password,
            } => write!(f, "Administrator password for {instance_id}: {password}"),
            Self::Tunnel { local_port } => write!(f, "Forwarding localhost:{local_port}"),
        }
    }
}

/// Delivers notices to the operator.
pub trait Notifier: Send + Sync {
    /// Shows `notice`.
    fn notify(&self, notice: &Notice);
}

/// Holds text for the operator to paste elsewhere.
pub trait Clipboard: Send + Sync {
    /// Replaces the clipboard contents with `text`.
    ///
    /// # Errors
    ///
    /// Returns [`ClipboardError`] when no clipboard is reachable.
    fn copy(&self, text: &str) -> Result<(), ClipboardError>;
}

/// The clipboard could not be written.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("clipboard unavailable: {message}")]
pub struct ClipboardError {
    /// Platform error text.
    pub message: String,
}

/// The desktop session's clipboard.
///
/// The handle is opened on first use and kept for the life of the process;
/// on X11 the contents vanish once their owner is dropped.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Mutex<Option<arboard::Clipboard>>,
}

impl fmt::Debug for SystemClipboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClipboard").finish_non_exhaustive()
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let unavailable = |err: arboard::Error| ClipboardError {
            message: err.to_string(),
        };
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let opened = handle
            .take()
            .map_or_else(arboard::Clipboard::new, Ok)
            .map_err(unavailable)?;
        handle.insert(opened).set_text(text).map_err(unavailable)
    }
}

/// Writes notices to stdout, one per line, and puts the administrator
/// password on the clipboard.
pub struct ConsoleNotifier {
    clipboard: Box<dyn Clipboard>,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::with_clipboard(Box::new(SystemClipboard::default()))
    }
}

impl ConsoleNotifier {
    /// Creates a notifier using `clipboard` for passwords.
    #[must_use]
    pub fn with_clipboard(clipboard: Box<dyn Clipboard>) -> Self {
        Self { clipboard }
    }

    fn deliver(&self, target: impl Write, notice: &Notice) {
        write_notice(target, notice);
        if let Notice::Password { password, .. } = notice {
            match self.clipboard.copy(password) {
                Ok(()) => info!("administrator password copied to the clipboard"),
                Err(err) => warn!(error = %err, "password not copied; paste it from the output above"),
            }
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) {
        self.deliver(io::stdout().lock(), notice);
    }
}

fn write_notice(mut target: impl Write, notice: &Notice) {
    writeln!(target, "{notice}").ok();
}
