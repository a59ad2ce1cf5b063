//! Terminal stand-in for the contact provider login popup.

use async_trait::async_trait;
use leadbridge_core::{AuthSurface, LeadbridgeError, SurfaceEvent};
use std::io::BufRead;
use tokio::sync::oneshot;
use url::Url;

/// Prints the authorization URL and treats Enter as the user closing the
/// login window. Completion is then confirmed with the backend.
#[derive(Debug, Default)]
pub struct TerminalSurface {
    closed: Option<oneshot::Receiver<()>>,
    done: bool,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthSurface for TerminalSurface {
    async fn open(&mut self, url: &Url) -> Result<(), LeadbridgeError> {
        println!("Open this URL in your browser to connect your contacts:");
        println!();
        println!("  {}", url);
        println!();
        println!("Press Enter once you have finished signing in.");

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            let _ = tx.send(());
        });
        self.closed = Some(rx);
        self.done = false;
        Ok(())
    }

    async fn poll(&mut self) -> SurfaceEvent {
        if self.done {
            return SurfaceEvent::Closed;
        }
        let Some(rx) = self.closed.as_mut() else {
            return SurfaceEvent::Closed;
        };
        match rx.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => SurfaceEvent::Pending,
            _ => {
                self.done = true;
                SurfaceEvent::Closed
            }
        }
    }

    async fn close(&mut self) {
        self.done = true;
        self.closed = None;
    }
}
