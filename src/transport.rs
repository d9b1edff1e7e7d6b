//! Transport-agnostic connect/listen seam.
//!
//! The codec and dispatcher only need a reliable, ordered, bidirectional byte
//! stream; this module is the one place that knows whether that stream is a
//! HyperV/AF_VSOCK socket or a plain TCP socket.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Any duplex byte stream usable as a pool or invalidation connection.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Where the client dials and the server listens.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    #[cfg(feature = "vsock")]
    Vsock { cid: u32, port: u32 },
}

impl Endpoint {
    pub async fn connect(&self) -> std::io::Result<BoxedStream> {
        match self {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(feature = "vsock")]
            Endpoint::Vsock { cid, port } => {
                let addr = tokio_vsock::VsockAddr::new(*cid, *port);
                let stream = tokio_vsock::VsockStream::connect(addr).await?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Accepts incoming connections on the configured transport.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(feature = "vsock")]
    Vsock(tokio_vsock::VsockListener),
}

impl Listener {
    pub async fn bind(port: u16) -> std::io::Result<Listener> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Listener::Tcp(listener))
    }

    #[cfg(feature = "vsock")]
    pub async fn bind_vsock(cid: u32, port: u32) -> std::io::Result<Listener> {
        let addr = tokio_vsock::VsockAddr::new(cid, port);
        let listener = tokio_vsock::VsockListener::bind(addr)?;
        Ok(Listener::Vsock(listener))
    }

    pub async fn accept(&self) -> std::io::Result<BoxedStream> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(feature = "vsock")]
            Listener::Vsock(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}
