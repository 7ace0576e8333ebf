//! Roll our own TLS layer instead of using tonic's so we can supply ServerConfig.
//!
//! tonic's built-in server TLS only accepts PEM identities and would ignore
//! the cipher suite policy, so connections are accepted here and handed to
//! [`tonic::transport::Server::serve_with_incoming`] already encrypted.
//!
//! Based largely on
//! <https://github.com/hyperium/tonic/blob/master/tonic/src/transport/server/io_stream.rs>

use futures::Stream;
use pin_project_lite::pin_project;
use rustls::ServerConfig;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_stream::wrappers::TcpListenerStream;

type StreamResult<IO> = std::io::Result<TlsStream<IO>>;

pin_project! {
    struct IncomingInner<S> {
        #[pin] upstream: S,
        acceptor: TlsAcceptor,
    }
}

pin_project! {
    /// Stream of connections that have completed a mutual TLS handshake.
    ///
    /// Handshakes run concurrently so a slow peer does not hold up others.
    /// A failed handshake is yielded as an error, which `tonic` logs and
    /// skips.
    pub struct Incoming<S, IO> {
        #[pin] inner: Option<IncomingInner<S>>,
        handshaking: JoinSet<StreamResult<IO>>,
    }
}

impl<S, IO> Incoming<S, IO> {
    /// Perform TLS handshakes with `server_config` on every connection
    /// produced by `upstream`.
    pub fn new(upstream: S, server_config: Arc<ServerConfig>) -> Self {
        Self {
            inner: Some(IncomingInner {
                upstream,
                acceptor: TlsAcceptor::from(server_config),
            }),
            handshaking: JoinSet::new(),
        }
    }
}

impl<S, IO> Stream for Incoming<S, IO>
where
    S: Stream<Item = std::io::Result<IO>>,
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Item = StreamResult<IO>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.handshaking.poll_join_next(cx) {
                // All TLS handshakes still in progress
                Poll::Pending => (),
                // No pending TLS handshakes at this time
                Poll::Ready(None) => (),
                // Pending TLS handshake JoinError (panic?)
                Poll::Ready(Some(Err(e))) => {
                    log::warn!("TLS accept task error: {}", e);
                    continue;
                }
                Poll::Ready(Some(Ok(Err(e)))) => {
                    log::warn!("TLS handshake failed: {}", e);
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(Ok(stream)))) => {
                    return Poll::Ready(Some(Ok(stream)));
                }
            }
            match this.inner.as_mut().as_pin_mut() {
                // Upstream was terminated previously
                None => {
                    return if this.handshaking.is_empty() {
                        Poll::Ready(None)
                    } else {
                        Poll::Pending
                    };
                }
                Some(inner) => {
                    let inner_this = inner.project();
                    match inner_this.upstream.poll_next(cx) {
                        // No new streams available
                        Poll::Pending => {
                            return Poll::Pending;
                        }
                        // Upstream terminated; drain handshakes in progress
                        Poll::Ready(None) => {
                            this.inner.set(None);
                        }
                        // Upstream accept error
                        Poll::Ready(Some(Err(e))) => {
                            return Poll::Ready(Some(Err(e)));
                        }
                        // Upstream accept succesful
                        Poll::Ready(Some(Ok(s))) => {
                            this.handshaking.spawn(inner_this.acceptor.accept(s));
                        }
                    }
                }
            }
        }
    }
}

impl<S, IO> futures::stream::FusedStream for Incoming<S, IO>
where
    S: Stream<Item = std::io::Result<IO>>,
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_terminated(&self) -> bool {
        self.handshaking.is_empty() && self.inner.is_none()
    }
}

/// Accept TLS connections arriving at `listener`.
pub fn tls_over_listener(
    listener: tokio::net::TcpListener,
    server_config: Arc<ServerConfig>,
) -> Incoming<TcpListenerStream, tokio::net::TcpStream> {
    Incoming::new(TcpListenerStream::new(listener), server_config)
}

/// Bind `addr` and accept TLS connections on it. Must be called from
/// within a tokio runtime.
pub fn tls_over_tcp(
    addr: std::net::SocketAddr,
    server_config: Arc<ServerConfig>,
) -> std::io::Result<Incoming<TcpListenerStream, tokio::net::TcpStream>> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(tls_over_listener(
        tokio::net::TcpListener::from_std(listener)?,
        server_config,
    ))
}
