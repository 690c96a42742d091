pub mod error;
pub mod middleware;
pub mod routes;
pub mod signature;

/// Resolves once the process is asked to stop: Ctrl+C anywhere, SIGTERM on
/// Unix. Used as the serve loop's graceful-shutdown trigger.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                // Without a SIGTERM handler, Ctrl+C is still honored below.
                tracing::error!("could not register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("could not register Ctrl+C handler: {e}");
            }
        }
        _ = sigterm => {}
    }
}
