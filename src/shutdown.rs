use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value
/// is ever sent. Once a value has been sent via the broadcast channel, or the
/// sending half has been dropped, the server should shutdown.
///
/// Sessions check the signal without waiting, at the top of every
/// iteration. An in-flight read or write is never interrupted by it; those
/// are bounded by the idle deadline instead.
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received. Never waits.
    pub(crate) fn is_shutdown(&mut self) -> bool {
        if !self.shutdown {
            // Only one value is ever sent, so a lag error cannot hide
            // anything but the signal itself. A closed channel means the
            // accept loop is gone.
            self.shutdown = match self.notify.try_recv() {
                Err(TryRecvError::Empty) => false,
                Ok(()) | Err(TryRecvError::Lagged(_)) | Err(TryRecvError::Closed) => true,
            };
        }

        self.shutdown
    }
}
