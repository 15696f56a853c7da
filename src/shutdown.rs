use std::fmt;

use tokio::{signal, sync::watch};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// SIGINT/SIGTERM handlers, registered once and polled for every delivery.
struct SignalStreams {
    #[cfg(unix)]
    interrupt: Option<signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<signal::unix::Signal>,
}

impl SignalStreams {
    #[cfg(unix)]
    fn register() -> Self {
        use signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| error!(error = %e, "failed to install SIGINT handler"))
            .ok();
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| error!(error = %e, "failed to install SIGTERM handler"))
            .ok();
        Self {
            interrupt,
            terminate,
        }
    }

    #[cfg(not(unix))]
    fn register() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn next(&mut self) -> ShutdownSignal {
        let Self {
            interrupt: interrupt_stream,
            terminate: terminate_stream,
        } = self;

        let interrupt = async {
            let delivered = match interrupt_stream.as_mut() {
                Some(stream) => stream.recv().await.is_some(),
                None => false,
            };
            if !delivered {
                std::future::pending::<()>().await;
            }
            ShutdownSignal::Interrupt
        };
        let terminate = async {
            let delivered = match terminate_stream.as_mut() {
                Some(stream) => stream.recv().await.is_some(),
                None => false,
            };
            if !delivered {
                std::future::pending::<()>().await;
            }
            ShutdownSignal::Terminate
        };

        tokio::select! {
            s = interrupt => s,
            s = terminate => s,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> ShutdownSignal {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    }
}

/// Latches the first shutdown signal for the whole process lifetime.
///
/// Handlers are registered in [`ShutdownListener::install`], so a signal that
/// lands while nobody is awaiting (index creation, bind) is still seen by the
/// next [`wait`](ShutdownListener::wait). A second signal exits with status 1.
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    pub fn install() -> Self {
        let mut streams = SignalStreams::register();
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let first = streams.next().await;
            tx.send_replace(Some(first));
            let second = streams.next().await;
            warn!(signal = %second, "second shutdown signal while draining; exiting now");
            std::process::exit(1);
        });
        Self { rx }
    }

    /// Resolves once a signal has been received, immediately if one already was.
    pub async fn wait(&mut self) -> ShutdownSignal {
        let received = self.rx.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        match received {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }

    #[cfg(test)]
    pub fn manual() -> (watch::Sender<Option<ShutdownSignal>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn signal_received_while_nobody_waits_is_kept() {
        let (tx, mut listener) = ShutdownListener::manual();
        tx.send_replace(Some(ShutdownSignal::Terminate));

        let got = tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .unwrap();
        assert_eq!(got, ShutdownSignal::Terminate);
        // Later waits see the same latched signal.
        assert_eq!(listener.wait().await, ShutdownSignal::Terminate);
    }

    #[tokio::test]
    async fn wait_pends_without_a_signal() {
        let (_tx, mut listener) = ShutdownListener::manual();
        let res = tokio::time::timeout(Duration::from_millis(50), listener.wait()).await;
        assert!(res.is_err());
    }
}
