//! The HTTP/1.1 listener both tiers run on.
//!
//! One task per connection. Connections are persistent unless the request says
//! otherwise, and pipelined requests are answered in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Upper bound on head plus body of one request.
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound listener waiting for a handler.
///
/// Binding and running are separate steps so callers can learn the real port
/// (bind to `:0`) before any traffic flows.
///
/// ```rust,no_run
/// use dynhtml::http::{Request, Response, StatusCode};
/// use dynhtml::server::Server;
///
/// # async fn demo() -> Result<(), dynhtml::server::ServerError> {
/// let server = Server::bind("127.0.0.1:0").await?;
/// println!("api on {}", server.local_addr());
/// server
///     .run(|_req: Request| async { Response::new(StatusCode::Ok).body("up") })
///     .await
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    idle_timeout: Duration,
}

impl Server {
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self {
            local_addr: listener.local_addr()?,
            listener,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Closes connections that send nothing for `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves forever.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then stops accepting. Connection tasks
    /// already spawned are left to finish their current exchange.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        let idle_timeout = self.idle_timeout;
        info!(address = %self.local_addr, "listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "listener stopped");
                    return Ok(());
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, handler, idle_timeout).await {
                    warn!(peer = %peer, error = %e, "connection aborted");
                }
            });
        }
    }
}

async fn serve_connection<H, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    idle_timeout: Duration,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    debug!(peer = %peer, "connection opened");
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // False while a pipelined request may already sit in `buf`.
    let mut need_read = true;

    loop {
        if need_read {
            let Ok(read) = tokio::time::timeout(idle_timeout, stream.read_buf(&mut buf)).await
            else {
                debug!(peer = %peer, "idle, closing");
                break;
            };
            if read? == 0 {
                debug!(peer = %peer, "peer closed");
                break;
            }
        }
        need_read = true;

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer, buffered = buf.len(), "request too large");
            return reject(&mut stream, StatusCode::PayloadTooLarge, "Request too large").await;
        }

        let (mut request, head_len) = match Request::parse(&buf) {
            Ok(parsed) => parsed,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer, error = %e, "unparseable request");
                return reject(&mut stream, StatusCode::BadRequest, &format!("Bad Request: {e}"))
                    .await;
            }
        };

        // Only Content-Length framing is spoken; a chunked body would be read as
        // the next request.
        if request.headers().contains("transfer-encoding") {
            warn!(peer = %peer, "transfer-encoding refused");
            return reject(
                &mut stream,
                StatusCode::NotImplemented,
                "Transfer-Encoding not supported",
            )
            .await;
        }

        let declared = request.content_length().unwrap_or(0);
        let end = match head_len.checked_add(declared) {
            Some(end) if end <= MAX_REQUEST_SIZE => end,
            _ => {
                warn!(peer = %peer, declared, "declared body too large");
                return reject(&mut stream, StatusCode::PayloadTooLarge, "Request too large").await;
            }
        };
        if buf.len() < end {
            continue;
        }
        request.set_body(Bytes::copy_from_slice(&buf[head_len..end]));
        buf.advance(end);
        need_read = buf.is_empty();

        let keep_alive = request.is_keep_alive();
        let is_head = *request.method() == Method::Head;
        debug!(
            peer = %peer,
            method = %request.method(),
            path = %request.path(),
            "dispatching"
        );

        let mut response = handler(request).await.keep_alive(keep_alive);
        if is_head {
            response = response.without_body();
        }
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            break;
        }
    }

    Ok(())
}

// Answers and ends the connection; the rest of the byte stream cannot be framed.
async fn reject(stream: &mut TcpStream, status: StatusCode, reason: &str) -> std::io::Result<()> {
    let response = Response::new(status).body(reason.to_owned()).keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}
