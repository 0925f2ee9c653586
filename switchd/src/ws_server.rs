use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::unbounded_channel as channel;
use tokio::sync::mpsc::UnboundedSender as Sender;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;

#[async_trait::async_trait]
pub trait WebSocketHandler<Request, Response> {
    async fn handle(&self, request: Request) -> Response;

    /// Answer for an inbound frame that does not decode as a `Request`.
    fn bad_request(&self, error: serde_json::Error) -> Response;

    fn add_connection(&self, sender: Sender<Response>) -> uuid::Uuid;
    fn remove_connection(&self, id: uuid::Uuid);
}

pub struct WebSocketServer<Request, Response> {
    handler: Arc<dyn WebSocketHandler<Request, Response> + Send + Sync>,
}

impl<Request, Response> WebSocketServer<Request, Response>
where
    Request: serde::de::DeserializeOwned + Send + Sync + 'static,
    Response: serde::Serialize + Send + Sync + 'static,
{
    pub fn new(handler: Arc<dyn WebSocketHandler<Request, Response> + Send + Sync>) -> Self {
        Self { handler }
    }

    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("shell endpoint binding failed: {:?}", e))?;

        let handler = self.handler.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(accept_connection(stream, handler.clone()));
            }
        })
        .await
        .map_err(|e| anyhow!("listening for shell connections failed: {:?}", e))
    }
}

async fn accept_connection<Request, Response>(
    stream: TcpStream,
    handler: Arc<dyn WebSocketHandler<Request, Response> + Send + Sync>,
) -> Result<()>
where
    Request: serde::de::DeserializeOwned + Send + Sync,
    Response: serde::Serialize + Send + Sync,
{
    let addr = stream
        .peer_addr()
        .map_err(|_| anyhow!("peer address missing"))?;

    debug!("accepted connection from {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| anyhow!("websocket handshake failed: {}", e))?;

    let (mut write, mut read) = ws_stream.split();

    let (tx, rx) = channel::<Response>();
    let mut rx = UnboundedReceiverStream::new(rx);

    let connection_id = handler.add_connection(tx.clone());
    scopeguard::defer! {
        handler.remove_connection(connection_id);
    }

    loop {
        tokio::select! {
            Some(response) = rx.next() => {
                match serde_json::to_string(&response) {
                    Ok(text) => {
                        use futures_util::SinkExt;
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("response could not be sent: {:?}", e);
                        }
                    }
                    Err(e) => {
                        warn!("response serialization failed: {:?}", e);
                    }
                }
            }
            Some(message) = read.next() => {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        debug!("could not retrieve message: {:?}", e);
                        continue;
                    }
                };

                if message.is_close() {
                    break;
                }

                // Pings and pongs are answered by the protocol layer.
                if !message.is_text() {
                    continue;
                }

                match message.to_text() {
                    Ok(text) => {
                        let response = match serde_json::from_str::<Request>(text) {
                            Ok(request) => handler.handle(request).await,
                            Err(e) => {
                                debug!("request did not decode: {:?}", e);
                                handler.bad_request(e)
                            }
                        };
                        tx.send(response).ok();
                    }
                    Err(e) => {
                        debug!("message is not in text format: {:?}", e);
                    }
                }
            }
            else => break,
        };
    }

    debug!("connection to {} closed", addr);

    Ok(())
}
