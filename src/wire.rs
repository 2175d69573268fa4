use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::api::{Api, Request, Response};
use crate::limits::MAX_REQUEST_LINE;
use crate::store::ReservationStore;
use crate::time::now_ms;

/// Serve one client: one JSON request per line in, one JSON response per line out.
/// Returns when the peer closes the socket.
pub async fn process_connection<S: ReservationStore>(
    socket: TcpStream,
    api: Arc<Api<S>>,
) -> io::Result<()> {
    socket.set_nodelay(true)?;
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Request>(line) {
                    Ok(req) => api.handle(req, now_ms()).await,
                    Err(e) => {
                        debug!("malformed request: {e}");
                        Response::bad_request(format!("malformed request: {e}"))
                    }
                }
            }
            // The codec discards the rest of the line and resyncs at the next newline.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Response::bad_request(format!("request line exceeds {MAX_REQUEST_LINE} bytes"))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };

        let out = serde_json::to_string(&response).map_err(io::Error::other)?;
        framed.send(out).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::other(other),
        })?;
    }
    Ok(())
}
