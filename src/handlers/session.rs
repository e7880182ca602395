//! Per-connection session handler
//!
//! Admits the peer, announces it, then reads frames and hands them to the
//! moderation gate until the peer leaves or the session is torn down. A
//! dedicated writer task drains the session's outbound queue to the peer.

use futures_util::sink::{Sink, SinkExt};
use futures_util::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::fmt::Display;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::constants::{BANNED_ON_CONNECT_REASON, POLICY_VIOLATION_CLOSE_CODE};
use crate::core::connection::{wait_for_teardown, ConnectionEnds, Session, Teardown};
use crate::core::gate::GateOutcome;
use crate::core::message::{InboundContent, OutboundEvent};
use crate::core::server::SharedRelay;
use crate::core::transport::{Frame, TransportError};
use crate::error::RelayError;
use crate::security_log::SecurityEvent;

/// Why the read loop stopped
#[derive(Debug)]
enum LoopEnd {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Reading from the peer failed
    ReadFailed,
    /// Something unexpected went wrong while handling a frame
    Failed,
    /// The registry retired the session (ban, failed delivery)
    TornDown(Teardown),
}

/// Serve one connection from `address` until it ends
pub async fn run_session<R, W>(relay: SharedRelay, address: IpAddr, inbound: R, outbound: W)
where
    R: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    W: Sink<Frame> + Send + 'static,
    W::Error: Display,
{
    let mut outbound = Box::pin(outbound);
    let write_timeout = relay.settings().write_timeout;

    let (session, ends) = match relay.registry().admit(address) {
        Ok(admitted) => admitted,
        Err(RelayError::AddressBanned(ip)) => {
            relay
                .security()
                .log_event(SecurityEvent::ConnectionRejected { ip })
                .await;
            let close = Frame::close(POLICY_VIOLATION_CLOSE_CODE, BANNED_ON_CONNECT_REASON);
            send_close(&mut outbound, close, write_timeout).await;
            return;
        }
        Err(e) => {
            error!("Failed to admit client {}: {}", address, e);
            let close = Frame::close(1011, "Server error");
            send_close(&mut outbound, close, write_timeout).await;
            return;
        }
    };

    let ConnectionEnds { outbound: queue, teardown } = ends;
    let writer = tokio::spawn(run_writer(outbound, queue, teardown.clone(), write_timeout));

    if let Err(e) = relay
        .router()
        .broadcast(&OutboundEvent::joined(address), Some(session.id))
        .await
    {
        error!("Failed to announce session {}: {}", session.id, e);
    }

    let end = read_loop(&relay, &session, inbound, teardown).await;
    debug!("Session {} ({}) loop ended: {:?}", session.id, address, end);

    match end {
        // The ban path and the router already announced these departures
        LoopEnd::TornDown(_) => {}
        LoopEnd::PeerClosed | LoopEnd::ReadFailed | LoopEnd::Failed => {
            match relay.registry().remove(session.id, Teardown::Disconnected) {
                Ok(Some(_)) => {
                    info!("Client disconnected: {}", address);
                    if let Err(e) = relay.router().broadcast(&OutboundEvent::left(address), None).await {
                        error!("Failed to announce departure of {}: {}", address, e);
                    }
                }
                // Retired concurrently by a ban or failed delivery
                Ok(None) => {}
                Err(e) => {
                    // Without the registry the writer would never be signalled
                    error!("Error unregistering session {}: {}", session.id, e);
                    writer.abort();
                }
            }
        }
    }

    match writer.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("Writer task for session {} aborted", session.id),
        Err(e) => error!("Writer task for session {} failed: {}", session.id, e),
    }
}

async fn read_loop<R>(
    relay: &SharedRelay,
    session: &Session,
    inbound: R,
    mut teardown: watch::Receiver<Option<Teardown>>,
) -> LoopEnd
where
    R: Stream<Item = Result<Frame, TransportError>> + Send,
{
    let mut inbound = Box::pin(inbound);
    let max_image_bytes = relay.settings().max_image_bytes;

    loop {
        // Teardown wins over a pending read, which is then dropped
        let next = tokio::select! {
            biased;
            reason = wait_for_teardown(&mut teardown) => return LoopEnd::TornDown(reason),
            next = inbound.next() => next,
        };

        let raw = match next {
            None => return LoopEnd::PeerClosed,
            Some(Err(e)) => {
                warn!("Read error on session {} ({}): {}", session.id, session.address, e);
                return LoopEnd::ReadFailed;
            }
            Some(Ok(Frame::Close { code, reason })) => {
                debug!("Session {} closed by peer ({} {})", session.id, code, reason);
                return LoopEnd::PeerClosed;
            }
            Some(Ok(Frame::Control)) => continue,
            Some(Ok(Frame::Binary(bytes))) => {
                relay
                    .security()
                    .log_event(SecurityEvent::DecodeFailure {
                        ip: session.address,
                        details: format!("unexpected binary frame of {} bytes", bytes.len()),
                    })
                    .await;
                continue;
            }
            Some(Ok(Frame::Text(raw))) => raw,
        };

        let content = match InboundContent::decode(&raw, max_image_bytes) {
            Ok(content) => content,
            Err(e) => {
                relay
                    .security()
                    .log_event(SecurityEvent::DecodeFailure {
                        ip: session.address,
                        details: e.to_string(),
                    })
                    .await;
                continue;
            }
        };

        match relay.gate().process(session, content).await {
            Ok(GateOutcome::Banned { .. }) => {
                // The ban retired every session from this address, this one included
                return LoopEnd::TornDown(wait_for_teardown(&mut teardown).await);
            }
            Ok(outcome) => debug!("Session {} item outcome: {:?}", session.id, outcome),
            Err(e) => {
                error!("Error handling message from {}: {}", session.address, e);
                return LoopEnd::Failed;
            }
        }
    }
}

/// Drain the outbound queue to the peer until the session is torn down
async fn run_writer<W>(
    mut sink: Pin<Box<W>>,
    mut queue: mpsc::Receiver<Arc<str>>,
    mut teardown: watch::Receiver<Option<Teardown>>,
    write_timeout: Duration,
) where
    W: Sink<Frame> + Send,
    W::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            reason = wait_for_teardown(&mut teardown) => {
                if let Teardown::Banned { reason } = reason {
                    let close = Frame::close(POLICY_VIOLATION_CLOSE_CODE, format!("Banned: {}", reason));
                    send_close(&mut sink, close, write_timeout).await;
                }
                if timeout(write_timeout, sink.close()).await.is_err() {
                    debug!("Timed out closing connection");
                }
                break;
            }
            payload = queue.recv() => {
                let Some(payload) = payload else { break };
                match timeout(write_timeout, sink.send(Frame::Text(payload.to_string()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!("WebSocket write timed out after {:?}", write_timeout);
                        break;
                    }
                }
            }
        }
    }
}

async fn send_close<W>(sink: &mut Pin<Box<W>>, frame: Frame, write_timeout: Duration)
where
    W: Sink<Frame>,
    W::Error: Display,
{
    match timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Failed to send close frame: {}", e),
        Err(_) => debug!("Timed out sending close frame"),
    }
}
