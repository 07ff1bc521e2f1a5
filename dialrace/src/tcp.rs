//! TCP dial capability.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::dial::Dial;

/// Opens plain TCP connections, giving up as soon as the attempt is cancelled.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on connections this dialer opens.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Dial<SocketAddr> for TcpDialer {
    type Connection = TcpStream;
    type Error = io::Error;

    async fn dial(&self, address: &SocketAddr, cancel: CancellationToken) -> io::Result<TcpStream> {
        let address = *address;
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                format!("dial to {address} cancelled"),
            )),
            stream = TcpStream::connect(address) => {
                let stream = stream?;
                if self.nodelay {
                    stream.set_nodelay(true)?;
                }
                tracing::trace!(%address, "TCP connection established");
                Ok(stream)
            }
        }
    }
}
