//! Signal handling for a run.
//!
//! The first SIGINT or SIGTERM cancels the run token: no new work items are
//! started and in-flight transfers are aborted, dropping their temporary
//! files. A second signal exits immediately.

use tokio_util::sync::CancellationToken;

pub const FORCED_EXIT_CODE: i32 = 130;

/// Spawn the listener on the current runtime and return the token it cancels.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let mut received = 0u32;
        while wait_for_signal().await {
            received += 1;
            if received == 1 {
                tracing::warn!("Interrupted; stopping after in-flight transfers are abandoned");
                cancel.cancel();
            } else {
                tracing::warn!("Second interrupt, exiting");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });
    token
}

/// Resolves when a shutdown signal arrives; `false` if listening failed.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("Cannot listen for SIGTERM: {err}");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        received = terminate.recv() => received.is_some(),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
