//! Server and client error types.

use thiserror::Error;

/// Errors raised while binding a host or dialing a peer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or reading the listen address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The WebSocket handshake with a remote peer failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// URL that was dialed.
        url: String,
        /// Underlying handshake error.
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:1"));
        assert!(text.contains("in use"));
    }

    #[test]
    fn connect_error_names_url() {
        let err = ServerError::Connect {
            url: "ws://127.0.0.1:9/ws".into(),
            source: Box::new(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
        };
        assert!(err.to_string().starts_with("failed to connect to ws://127.0.0.1:9/ws"));
    }
}
