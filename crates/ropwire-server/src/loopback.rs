//! In-process transport between a [`Client`] and a [`Session`]

use ropwire_core::{Client, ClientConfig, Transport, TransportError};

use crate::server::Server;
use crate::session::Session;

/// Hands request buffers straight to a session
#[derive(Debug)]
pub struct LoopbackTransport {
    session: Session,
}

impl LoopbackTransport {
    /// Transport over a fresh session of `server`
    #[must_use]
    pub fn new(server: &Server) -> Self {
        Self {
            session: server.session(),
        }
    }

    /// Session behind the transport
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Transport for LoopbackTransport {
    fn exchange(&mut self, request: &[u8], max_response: usize) -> Result<Vec<u8>, TransportError> {
        self.session.process(request, max_response).map_err(|e| {
            tracing::warn!("Request buffer rejected: {}", e);
            TransportError::Rejected(e.to_string())
        })
    }
}

impl Server {
    /// Client connected to a new session of this server
    #[must_use]
    pub fn connect(&self) -> Client<LoopbackTransport> {
        Client::new(LoopbackTransport::new(self))
    }

    /// Client with explicit limits connected to a new session
    #[must_use]
    pub fn connect_with(&self, config: ClientConfig) -> Client<LoopbackTransport> {
        Client::with_config(LoopbackTransport::new(self), config)
    }
}
