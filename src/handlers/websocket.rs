use futures_util::future;
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{info, warn};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use warp::http::HeaderMap;
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::constants::{HEALTH_PATH, MAX_FRAME_BYTES, POLICY_VIOLATION_CLOSE_CODE};
use crate::core::ip_extractor::{extract_client_ip, IpExtractionConfig};
use crate::core::server::SharedRelay;
use crate::core::transport::{Frame, TransportError};
use crate::handlers::session::run_session;

/// Build the relay's routes: the WebSocket endpoint at `/` and `/health`
pub fn routes(
    relay: SharedRelay,
    ip_config: IpExtractionConfig,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_route = warp::path::end()
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(warp::header::headers_cloned())
        .and(with_relay(relay))
        .and(with_ip_config(ip_config))
        .map(
            |ws: warp::ws::Ws,
             remote: Option<SocketAddr>,
             headers: HeaderMap,
             relay: SharedRelay,
             ip_config: IpExtractionConfig| {
                let address = extract_client_ip(&headers, remote, &ip_config);
                info!("New websocket connection from {:?}", address);
                ws.max_message_size(MAX_FRAME_BYTES)
                    .on_upgrade(move |socket| handle_ws_client(socket, address, relay))
            },
        );

    let health_route = warp::path(HEALTH_PATH).and(warp::path::end()).map(|| "OK");

    health_route.or(ws_route)
}

// Helper function to include relay state in request
fn with_relay(relay: SharedRelay) -> impl Filter<Extract = (SharedRelay,), Error = Infallible> + Clone {
    warp::any().map(move || relay.clone())
}

fn with_ip_config(
    config: IpExtractionConfig,
) -> impl Filter<Extract = (IpExtractionConfig,), Error = Infallible> + Clone {
    warp::any().map(move || config.clone())
}

/// Handle an upgraded WebSocket connection
pub async fn handle_ws_client(ws: WebSocket, address: Option<IpAddr>, relay: SharedRelay) {
    let (mut ws_tx, ws_rx) = ws.split();

    let Some(address) = address else {
        warn!("Refusing connection without an identifiable address");
        let _ = ws_tx
            .send(Message::close_with(POLICY_VIOLATION_CLOSE_CODE, "Unidentifiable client"))
            .await;
        return;
    };

    let inbound = ws_rx.map(|result| {
        result
            .map(from_ws_message)
            .map_err(|e| TransportError(e.to_string()))
    });
    let outbound = ws_tx.with(|frame: Frame| future::ready(Ok::<Message, warp::Error>(to_ws_message(frame))));

    run_session(relay, address, inbound, outbound).await;
}

fn from_ws_message(msg: Message) -> Frame {
    if msg.is_close() {
        let (code, reason) = msg
            .close_frame()
            .map(|(code, reason)| (code, reason.to_string()))
            .unwrap_or((1005, String::new()));
        Frame::Close { code, reason }
    } else if msg.is_text() {
        match msg.to_str() {
            Ok(text) => Frame::Text(text.to_string()),
            Err(()) => Frame::Binary(msg.into_bytes()),
        }
    } else if msg.is_binary() {
        Frame::Binary(msg.into_bytes())
    } else {
        Frame::Control
    }
}

fn to_ws_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(bytes) => Message::binary(bytes),
        Frame::Close { code, reason } => Message::close_with(code, reason),
        Frame::Control => Message::ping(Vec::new()),
    }
}
