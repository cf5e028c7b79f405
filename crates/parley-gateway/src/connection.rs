use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use parley_types::error::ActionError;
use parley_types::wire::{WireRequest, WireResponse};

use crate::codec::{TransportError, WireCodec};
use crate::dispatcher::ActionDispatcher;

/// Back-off after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, dispatcher: ActionDispatcher, max_frame_bytes: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed for {}: {}", addr, e);
                }
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, dispatcher, max_frame_bytes).await {
                        Ok(()) => info!("{} disconnected", addr),
                        Err(e) => warn!("Connection error from {}: {}", addr, e),
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Strict request/response loop: read one frame, dispatch, write one reply.
/// Returns when the peer closes; transport failures end the connection.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: ActionDispatcher,
    max_frame_bytes: usize,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, WireCodec::<WireRequest>::new(max_frame_bytes));

    while let Some(frame) = framed.next().await {
        let response = match frame? {
            Ok(request) => {
                debug!("Request: {:?}", request);
                dispatcher.dispatch(request).await
            }
            Err(e) => {
                warn!("Rejected frame: {}", e);
                WireResponse::failure(&ActionError::invalid_request(e))
            }
        };
        framed.send(response).await?;
    }

    Ok(())
}
