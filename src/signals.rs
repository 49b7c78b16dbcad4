/// Shutdown signal handling.
///
/// SIGINT (Ctrl-C) and SIGTERM both resolve the same future. The caller
/// logs what finished and exits right away; in-flight batches are not
/// drained.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::Interrupt => write!(f, "SIGINT"),
            Shutdown::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Exit code used after an interrupt (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Wait for the first shutdown signal.
///
/// If a handler can't be installed, that signal source never fires and a
/// warning is logged; the run continues unaffected.
pub async fn shutdown_signal() -> Shutdown {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Shutdown::Interrupt,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGINT handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                Shutdown::Terminate
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Shutdown>();

    tokio::select! {
        s = interrupt => s,
        s = terminate => s,
    }
}
