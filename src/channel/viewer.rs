//! Local remote-desktop viewer.
//!
//! The viewer runs detached from the foreground tunnel: it waits for the
//! forwarded port to accept connections, hands a connection URL to the
//! desktop, and logs (never propagates) anything that goes wrong.

use std::future::Future;
use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::wait::{PollError, PollPolicy, PollStatus, poll_until};

/// Lowest port picked for a local desktop tunnel.
pub const LOCAL_PORT_MIN: u16 = 50_000;

const LOCAL_PORT_SPAN: u16 = 10_000;
const PORT_PICK_ATTEMPTS: usize = 20;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Viewer launch failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ViewerError {
    /// The forwarded port never accepted a connection.
    #[error("local port {port} did not open")]
    PortNotOpen {
        /// Local port.
        port: u16,
    },
    /// The desktop viewer could not be started.
    #[error("failed to start {program}: {message}")]
    Launch {
        /// Program invoked.
        program: String,
        /// OS error text.
        message: String,
    },
    /// The connection file could not be written.
    #[error("failed to write remote desktop connection file: {message}")]
    ConnectionFile {
        /// OS error text.
        message: String,
    },
    /// The desktop viewer exited with a failure.
    #[error("{program} exited with status {status}")]
    Exited {
        /// Program invoked.
        program: String,
        /// Exit status.
        status: i32,
    },
}

/// Boxed future returned by [`Viewer::open`].
pub type ViewerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ViewerError>> + Send + 'a>>;

/// Opens a remote desktop client against a local port.
pub trait Viewer: Send + Sync {
    /// Launches the client for `localhost:port`.
    fn open(&self, local_port: u16) -> ViewerFuture<'_>;
}

/// Uses the platform's default handler for remote desktop connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopViewer;

impl DesktopViewer {
    /// Program and arguments for the current platform. macOS clients take
    /// the `rdp://` URL; elsewhere the connection file is opened.
    #[must_use]
    pub fn command(local_port: u16, connection_file: &Path) -> (String, Vec<String>) {
        let file = connection_file.display().to_string();
        if cfg!(target_os = "windows") {
            (String::from("mstsc"), vec![file, String::from("/admin")])
        } else if cfg!(target_os = "macos") {
            (String::from("open"), vec![rdp_url(local_port)])
        } else {
            (String::from("xdg-open"), vec![file])
        }
    }
}

impl Viewer for DesktopViewer {
    fn open(&self, local_port: u16) -> ViewerFuture<'_> {
        Box::pin(async move {
            let connection_file = write_rdp_file(local_port)?;
            info!(path = %connection_file.display(), "remote desktop connection file written");
            let (program, args) = Self::command(local_port, &connection_file);
            let status = Command::new(&program)
                .args(&args)
                .status()
                .await
                .map_err(|err| ViewerError::Launch {
                    program: program.clone(),
                    message: err.to_string(),
                })?;
            if status.success() {
                Ok(())
            } else {
                Err(ViewerError::Exited {
                    program,
                    status: status.code().unwrap_or(-1),
                })
            }
        })
    }
}

/// `rdp://` URL that connects straight away as the administrator and
/// prompts for the password.
#[must_use]
pub fn rdp_url(local_port: u16) -> String {
    format!(
        "rdp://auto%20connect:i:1&full%20address=s:localhost:{local_port}&audiomode=i:2\
         &disable%20themes=i:1&username=s:Administrator\
         &prompt%20for%20credentials%20on%20client=i:1"
    )
}

/// Settings of an `.rdp` connection file equivalent to [`rdp_url`].
#[must_use]
pub fn rdp_file_contents(local_port: u16) -> String {
    [
        String::from("auto connect:i:1"),
        format!("full address:s:localhost:{local_port}"),
        String::from("audiomode:i:2"),
        String::from("disable themes:i:1"),
        String::from("username:s:Administrator"),
        String::from("prompt for credentials on client:i:1"),
    ]
    .join("\r\n")
}

/// Writes the connection file for `local_port` to the temporary directory
/// and returns its path. The file is left for the client to read after this
/// process exits.
///
/// # Errors
///
/// Returns [`ViewerError::ConnectionFile`] when the file cannot be written.
pub fn write_rdp_file(local_port: u16) -> Result<PathBuf, ViewerError> {
    let failed = |err: io::Error| ViewerError::ConnectionFile {
        message: err.to_string(),
    };
    let mut file = tempfile::Builder::new()
        .prefix(&format!("bastion-{local_port}-"))
        .suffix(".rdp")
        .tempfile()
        .map_err(failed)?;
    file.write_all(rdp_file_contents(local_port).as_bytes())
        .map_err(failed)?;
    file.into_temp_path()
        .keep()
        .map_err(|err| failed(err.error))
}

/// Picks a free local port for a desktop tunnel.
///
/// Falls back to the last candidate when none can be confirmed free; the
/// plugin then reports the conflict itself.
#[must_use]
pub fn random_local_port() -> u16 {
    let mut candidate = LOCAL_PORT_MIN;
    for _ in 0..PORT_PICK_ATTEMPTS {
        let raw = Uuid::new_v4().as_u128().rem_euclid(u128::from(LOCAL_PORT_SPAN));
        let offset = u16::try_from(raw).unwrap_or_default();
        candidate = LOCAL_PORT_MIN.saturating_add(offset);
        if TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).is_ok() {
            break;
        }
    }
    candidate
}

/// Waits until `127.0.0.1:port` accepts a TCP connection.
///
/// # Errors
///
/// Returns [`ViewerError::PortNotOpen`] when `policy` runs out or `cancel`
/// fires.
pub async fn wait_for_port(
    port: u16,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), ViewerError> {
    let result: Result<(), PollError<ViewerError>> = poll_until(policy, cancel, || async move {
        let connect = timeout(CONNECT_TIMEOUT, TcpStream::connect((Ipv4Addr::LOCALHOST, port))).await;
        Ok(if matches!(connect, Ok(Ok(_))) {
            PollStatus::Ready(())
        } else {
            PollStatus::Pending
        })
    })
    .await;
    result.map_err(|_| ViewerError::PortNotOpen { port })
}

/// Starts the viewer in the background once the tunnel is listening.
pub fn spawn_viewer(
    viewer: Arc<dyn Viewer>,
    local_port: u16,
    policy: PollPolicy,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(local_port, "waiting for tunnel before opening viewer");
        if let Err(err) = wait_for_port(local_port, &policy, &cancel).await {
            warn!(error = %err, "remote desktop viewer not opened");
            return;
        }
        match viewer.open(local_port).await {
            Ok(()) => info!(local_port, "remote desktop viewer opened"),
            Err(err) => warn!(error = %err, "remote desktop viewer failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        opened: Mutex<Vec<u16>>,
    }

    impl Viewer for Recording {
        fn open(&self, local_port: u16) -> ViewerFuture<'_> {
            Box::pin(async move {
                self.opened
                    .lock()
                    .unwrap_or_else(|err| panic!("lock poisoned: {err}"))
                    .push(local_port);
                Ok(())
            })
        }
    }

    #[test]
    fn url_connects_at_once_to_local_port_as_administrator() {
        let url = rdp_url(55_123);
        assert!(url.starts_with("rdp://auto%20connect:i:1&full%20address=s:localhost:55123&"));
        assert!(url.contains("username=s:Administrator"));
        assert!(!url.contains(char::is_whitespace));
    }

    #[test]
    fn connection_file_matches_the_url_settings() {
        let path = write_rdp_file(55_124).unwrap_or_else(|err| panic!("write failed: {err}"));
        let written =
            std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read failed: {err}"));
        std::fs::remove_file(&path).unwrap_or_else(|err| panic!("cleanup failed: {err}"));

        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("rdp"));
        let lines: Vec<&str> = written.split("\r\n").collect();
        assert_eq!(lines.first(), Some(&"auto connect:i:1"));
        assert!(lines.contains(&"full address:s:localhost:55124"));
        assert!(lines.contains(&"username:s:Administrator"));
        assert!(lines.contains(&"prompt for credentials on client:i:1"));
    }

    #[test]
    fn desktop_command_points_at_the_connection() {
        let (program, args) = DesktopViewer::command(55_125, Path::new("/tmp/bastion.rdp"));
        assert!(!program.is_empty());
        assert!(
            args.iter()
                .any(|arg| arg == "/tmp/bastion.rdp" || arg.contains("localhost:55125"))
        );
    }

    #[test]
    fn random_port_is_in_range() {
        for _ in 0..10 {
            let port = random_local_port();
            assert!((LOCAL_PORT_MIN..LOCAL_PORT_MIN + LOCAL_PORT_SPAN).contains(&port));
        }
    }

    #[tokio::test]
    async fn viewer_opens_once_port_listens() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap_or_else(|err| panic!("bind failed: {err}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|err| panic!("addr failed: {err}"))
            .port();
        tokio::spawn(async move { if let Ok((_stream, _addr)) = listener.accept().await {} });

        let recording = Arc::new(Recording::default());
        let policy = PollPolicy::fixed_attempts(Duration::from_millis(10), 5);
        spawn_viewer(recording.clone(), port, policy, CancellationToken::new())
            .await
            .unwrap_or_else(|err| panic!("task failed: {err}"));

        let opened = recording
            .opened
            .lock()
            .unwrap_or_else(|err| panic!("lock poisoned: {err}"))
            .clone();
        assert_eq!(opened, vec![port]);
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let port = {
            let scratch = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .unwrap_or_else(|err| panic!("bind failed: {err}"));
            scratch
                .local_addr()
                .unwrap_or_else(|err| panic!("addr failed: {err}"))
                .port()
        };
        let policy = PollPolicy::fixed_attempts(Duration::from_millis(1), 2);
        let err = wait_for_port(port, &policy, &CancellationToken::new())
            .await
            .expect_err("nothing listens");
        assert_eq!(err, ViewerError::PortNotOpen { port });
    }
}
