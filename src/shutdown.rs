//! Process termination → `watch` channel used by both binaries.

use tokio::sync::watch;

/// Installs SIGINT and SIGTERM handlers and returns a receiver that flips to
/// `true` on the first of them. Must be called inside a tokio runtime.
pub fn listen_for_termination() -> std::io::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        // registered before returning
        let mut term = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("SIGINT received — shutting down"),
                _ = term.recv() => log::info!("SIGTERM received — shutting down"),
            }
            let _ = tx.send(true);
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("Ctrl-C received — shutting down");
        let _ = tx.send(true);
    });

    Ok(rx)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_flips_receiver() {
        let mut rx = listen_for_termination().unwrap();
        assert!(!*rx.borrow());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), rx.changed()).await.unwrap().unwrap();
        assert!(*rx.borrow());
    }
}
