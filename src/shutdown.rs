//! Process termination signals.

use std::io;

use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled on Ctrl+C, or on SIGTERM on unix.
///
/// The SIGTERM handler is installed before this returns, so a signal sent
/// right after the call is not lost.
pub fn termination_token() -> io::Result<CancellationToken> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("couldn't listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminated = async {
            terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => log::info!("received Ctrl+C, shutting down"),
            () = terminated => log::info!("received SIGTERM, shutting down"),
        }
        cancel.cancel();
    });
    Ok(token)
}
