//! Detached authentication surfaces.
//!
//! The contact provider is linked through a login page shown outside the
//! application (a popup window, a browser tab). The session manager only
//! needs three things from it: open a URL, report what happened since the
//! last poll, and close. [`ChannelSurface`] is an in-process implementation
//! driven through a [`SurfaceController`], used by embedders and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::error::LeadbridgeError;

/// What the surface reported since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Nothing yet.
    Pending,
    /// A completion message posted by the login page.
    Message { origin: String, payload: String },
    /// The user closed the surface.
    Closed,
}

/// A detached UI surface hosting the contact provider login.
#[async_trait]
pub trait AuthSurface: Send {
    /// Show the authorization URL.
    async fn open(&mut self, url: &Url) -> Result<(), LeadbridgeError>;

    /// Report the next event without blocking.
    async fn poll(&mut self) -> SurfaceEvent;

    /// Dismiss the surface. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Surface fed by a channel.
#[derive(Debug)]
pub struct ChannelSurface {
    events: mpsc::UnboundedReceiver<SurfaceEvent>,
    opened: Arc<Mutex<Option<Url>>>,
    closed: bool,
}

/// Handle that drives a [`ChannelSurface`].
#[derive(Debug, Clone)]
pub struct SurfaceController {
    events: mpsc::UnboundedSender<SurfaceEvent>,
    opened: Arc<Mutex<Option<Url>>>,
}

impl ChannelSurface {
    pub fn new() -> (Self, SurfaceController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opened = Arc::new(Mutex::new(None));
        (
            Self {
                events: rx,
                opened: opened.clone(),
                closed: false,
            },
            SurfaceController { events: tx, opened },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl SurfaceController {
    /// Post a completion message as the login page would.
    pub fn post_message(&self, origin: impl Into<String>, payload: impl Into<String>) {
        let _ = self.events.send(SurfaceEvent::Message {
            origin: origin.into(),
            payload: payload.into(),
        });
    }

    /// Close the surface as the user would.
    pub fn close(&self) {
        let _ = self.events.send(SurfaceEvent::Closed);
    }

    /// URL the surface was opened with, once opened.
    pub fn opened_url(&self) -> Option<Url> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl AuthSurface for ChannelSurface {
    async fn open(&mut self, url: &Url) -> Result<(), LeadbridgeError> {
        *self.opened.lock() = Some(url.clone());
        self.closed = false;
        Ok(())
    }

    async fn poll(&mut self) -> SurfaceEvent {
        if self.closed {
            return SurfaceEvent::Closed;
        }
        match self.events.try_recv() {
            Ok(SurfaceEvent::Closed) => {
                self.closed = true;
                SurfaceEvent::Closed
            }
            Ok(event) => event,
            Err(mpsc::error::TryRecvError::Empty) => SurfaceEvent::Pending,
            // Every controller is gone, nobody can complete the login.
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                SurfaceEvent::Closed
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
