use std::sync::Arc;

use axum::body::Body as AxumBody;
use axum::extract::ws::{Message as AxumMessage, WebSocket as AxumWebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::header::UPGRADE;
use axum::http::request::Parts;
use axum::http::Response;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use volley_core::app::Application;
use volley_core::body::Body;
use volley_core::context::Context;
use volley_core::request::Request as CoreRequest;
use volley_core::response::Response as CoreResponse;
use volley_core::websocket::{Message, WebSocket, WebSocketPeer};

const CHANNEL_CAPACITY: usize = 32;

pub(crate) fn is_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Accept the upgrade and run the application against the socket once the handshake is done.
pub(crate) async fn upgrade(app: Arc<Application>, mut parts: Parts) -> Response<AxumBody> {
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let request = crate::request::from_parts(&parts, Body::empty());
    upgrade.on_upgrade(move |socket| serve(app, request, socket))
}

async fn serve(app: Arc<Application>, request: CoreRequest, socket: AxumWebSocket) {
    let (handle, peer) = WebSocket::channel(CHANNEL_CAPACITY);
    let response = CoreResponse::memory().with_origin(app.origin());
    let mut ctx = Context::new(request, response).with_web_socket(handle);

    let run = async move {
        if let Err(err) = app.handle(&mut ctx).await {
            tracing::error!("websocket middleware failed: {}", err.message());
            app.emit_error(&err);
        }
        // Dropping the context closes the outgoing channel and ends the bridge.
        drop(ctx);
    };

    tokio::join!(run, bridge(socket, peer));
}

async fn bridge(socket: AxumWebSocket, peer: WebSocketPeer) {
    let (mut sink, mut stream) = socket.split();
    let WebSocketPeer {
        mut outgoing,
        mut incoming,
    } = peer;

    let to_client = async move {
        while let Some(message) = outgoing.next().await {
            let close = message == Message::Close;
            if sink.send(into_axum_message(message)).await.is_err() || close {
                break;
            }
        }
        let _ = sink.close().await;
    };

    let from_client = async move {
        while let Some(Ok(frame)) = stream.next().await {
            let message = match frame {
                AxumMessage::Text(text) => Message::Text(text.as_str().to_owned()),
                AxumMessage::Binary(bytes) => Message::Binary(bytes),
                AxumMessage::Close(_) => Message::Close,
                AxumMessage::Ping(_) | AxumMessage::Pong(_) => continue,
            };
            let close = message == Message::Close;
            if incoming.send(message).await.is_err() || close {
                break;
            }
        }
    };

    tokio::select! {
        _ = to_client => {}
        _ = from_client => {}
    }
}

fn into_axum_message(message: Message) -> AxumMessage {
    match message {
        Message::Text(text) => AxumMessage::Text(text.into()),
        Message::Binary(bytes) => AxumMessage::Binary(bytes),
        Message::Close => AxumMessage::Close(None),
    }
}
