//! Connection session: per-socket reader, unified writer, and one forwarder
//! per subscription.
//!
//! Exactly one task writes to the socket for the session's lifetime: the
//! unified writer draining `write_queue`. Everything else (acks, errors,
//! pong, welcome, fanned-out messages) is an envelope enqueued onto that
//! queue. Subscriber pipelines never see the socket; their forwarders move
//! envelopes from the pipeline queue onto `write_queue` best-effort.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::subscriber::SubscriberPipeline;
use crate::protocol::{
    frame, parse_frame, ClientFrame, Envelope, ERR_INVALID_JSON, ERR_MISSING_MESSAGE,
    ERR_MISSING_MESSAGE_ID, ERR_MISSING_TOPIC, ERR_NOT_SUBSCRIBED, ERR_TOPIC_NOT_FOUND,
    ERR_UNKNOWN_TYPE,
};
use crate::FanoutEngine;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> String {
    format!("client-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
}

// ========================================
// SESSION ENTRY POINT
// ========================================

/// Drive one accepted WebSocket until EOF, read error, deadline expiry, or
/// write failure. Cleanup detaches every subscription before the socket
/// goes away.
pub async fn run_session(socket: WebSocket, engine: FanoutEngine) {
    let client_id = next_client_id();
    let (ws_sink, ws_stream) = socket.split();

    let (write_tx, write_rx) = mpsc::channel::<Envelope>(engine.registry.queue_capacity().max(1));
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(run_writer(
        ws_sink,
        write_rx,
        engine.config.server.write_timeout,
        cancel.clone(),
        client_id.clone(),
    ));

    let mut session = Session {
        client_id: client_id.clone(),
        engine,
        write_tx,
        cancel: cancel.clone(),
        subs: HashMap::new(),
    };

    info!("session established for {}", client_id);
    session.send(Envelope::welcome(&client_id)).await;

    session.read_loop(ws_stream).await;

    session.cleanup();
    cancel.cancel();
    drop(session);
    let _ = writer.await;
    info!("session closed for {}", client_id);
}

// ========================================
// UNIFIED WRITER
// ========================================

/// The only task allowed to touch the socket's write side. Exits when the
/// write queue closes (after draining) or on write error/deadline, in which
/// case the whole session is cancelled.
async fn run_writer(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut write_rx: mpsc::Receiver<Envelope>,
    write_timeout: Duration,
    cancel: CancellationToken,
    client_id: String,
) {
    while let Some(envelope) = write_rx.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize envelope for {}: {}", client_id, err);
                continue;
            }
        };

        match timeout(write_timeout, sink.send(WsMessage::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("write error for {}: {}", client_id, err);
                break;
            }
            Err(_) => {
                warn!("write deadline expired for {}", client_id);
                break;
            }
        }
    }

    cancel.cancel();
    let _ = sink.close().await;
}

// ========================================
// SESSION STATE
// ========================================

struct Session {
    client_id: String,
    engine: FanoutEngine,
    write_tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    /// topic name -> local pipeline, for cleanup on session end.
    subs: HashMap<String, Arc<SubscriberPipeline>>,
}

impl Session {
    async fn read_loop(&mut self, mut ws_stream: SplitStream<WebSocket>) {
        let read_timeout = self.engine.config.server.read_timeout;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = timeout(read_timeout, ws_stream.next()) => next,
            };

            let msg = match next {
                Err(_) => {
                    debug!("read deadline expired for {}", self.client_id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!("read error for {}: {}", self.client_id, err);
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                WsMessage::Text(text) => self.handle_text(text.as_str()).await,
                WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_text(text).await,
                    Err(_) => {
                        self.send(Envelope::error(None, ERR_INVALID_JSON, "frame is not valid JSON"))
                            .await
                    }
                },
                WsMessage::Close(_) => break,
                // Control frames are answered by the transport layer.
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(_) => {
                self.send(Envelope::error(None, ERR_INVALID_JSON, "frame is not valid JSON"))
                    .await;
                return;
            }
        };

        let msg_type = frame.msg_type.clone();
        match msg_type.as_str() {
            frame::MSG_SUBSCRIBE => self.handle_subscribe(frame).await,
            frame::MSG_UNSUBSCRIBE => self.handle_unsubscribe(frame).await,
            frame::MSG_PUBLISH => self.handle_publish(frame).await,
            frame::MSG_PING => {
                self.send(Envelope::pong(frame.request_id.as_deref())).await;
            }
            other => {
                let detail = format!("unknown message type: '{}'", other);
                self.send(Envelope::error(frame.request_id.as_deref(), ERR_UNKNOWN_TYPE, detail))
                    .await;
            }
        }
    }

    async fn handle_subscribe(&mut self, req: ClientFrame) {
        let request_id = req.request_id.as_deref();
        let Some(topic_name) = req.topic.filter(|t| !t.is_empty()) else {
            self.send(Envelope::error(request_id, ERR_MISSING_TOPIC, "topic is required"))
                .await;
            return;
        };

        let Some(topic) = self.engine.registry.get(&topic_name) else {
            let detail = format!("topic '{}' not found", topic_name);
            self.send(Envelope::error(request_id, ERR_TOPIC_NOT_FOUND, detail))
                .await;
            return;
        };

        if self.subs.contains_key(&topic_name) {
            self.send(Envelope::ack(request_id, "already subscribed")).await;
            return;
        }

        let pipeline = Arc::new(SubscriberPipeline::new(
            self.client_id.clone(),
            self.engine.registry.queue_capacity(),
        ));
        self.spawn_forwarder(pipeline.clone());
        topic.attach(pipeline.clone());
        self.subs.insert(topic_name.clone(), pipeline);
        self.engine
            .metrics
            .set_subscribers(&topic_name, topic.subscriber_count());

        // Replay goes straight onto the write queue so the frames land on
        // the socket before the ack, in history order.
        let last_n = req.last_n.unwrap_or(0);
        if last_n > 0 {
            for msg in topic.last_n(last_n) {
                self.send(Envelope::message(&topic_name, msg)).await;
            }
        }

        debug!("{} subscribed to '{}'", self.client_id, topic_name);
        self.send(Envelope::ack(request_id, format!("subscribed to '{}'", topic_name)))
            .await;
    }

    async fn handle_unsubscribe(&mut self, req: ClientFrame) {
        let request_id = req.request_id.as_deref();
        let Some(topic_name) = req.topic.filter(|t| !t.is_empty()) else {
            self.send(Envelope::error(request_id, ERR_MISSING_TOPIC, "topic is required"))
                .await;
            return;
        };

        let Some(pipeline) = self.subs.remove(&topic_name) else {
            let detail = format!("not subscribed to '{}'", topic_name);
            self.send(Envelope::error(request_id, ERR_NOT_SUBSCRIBED, detail))
                .await;
            return;
        };

        if let Some(topic) = self.engine.registry.get(&topic_name) {
            topic.detach(&self.client_id);
            self.engine
                .metrics
                .set_subscribers(&topic_name, topic.subscriber_count());
        }
        // Topic may already be deleted; the local pipeline still goes away.
        pipeline.close();

        debug!("{} unsubscribed from '{}'", self.client_id, topic_name);
        self.send(Envelope::ack(request_id, format!("unsubscribed from '{}'", topic_name)))
            .await;
    }

    async fn handle_publish(&mut self, req: ClientFrame) {
        let request_id = req.request_id.as_deref();
        let Some(topic_name) = req.topic.filter(|t| !t.is_empty()) else {
            self.send(Envelope::error(request_id, ERR_MISSING_TOPIC, "topic is required"))
                .await;
            return;
        };
        let Some(message) = req.message else {
            self.send(Envelope::error(request_id, ERR_MISSING_MESSAGE, "message is required"))
                .await;
            return;
        };
        if message.id.is_empty() {
            self.send(Envelope::error(request_id, ERR_MISSING_MESSAGE_ID, "message id is required"))
                .await;
            return;
        }

        match self.engine.registry.publish(&topic_name, message) {
            Ok((delivered, dropped)) => {
                self.send(Envelope::publish_ack(request_id, delivered as u64, dropped as u64))
                    .await;
            }
            Err(err) => {
                self.send(Envelope::error(request_id, ERR_TOPIC_NOT_FOUND, err.to_string()))
                    .await;
            }
        }
    }

    /// Move envelopes from the pipeline queue onto the write queue. Exits on
    /// pipeline closure (after draining what is queued) or on session
    /// cancellation (immediately, without draining).
    fn spawn_forwarder(&self, pipeline: Arc<SubscriberPipeline>) {
        let write_tx = self.write_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    envelope = pipeline.recv() => match envelope {
                        Some(envelope) => match write_tx.try_send(envelope) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!("write queue full for {}, dropping envelope", pipeline.client_id());
                            }
                            Err(TrySendError::Closed(_)) => break,
                        },
                        None => break,
                    },
                }
            }
            pipeline.mark_closed();
        });
    }

    /// Reader-side enqueue onto the unified writer. Backpressure here only
    /// slows this session's own request handling.
    async fn send(&self, envelope: Envelope) {
        let _ = self.write_tx.send(envelope).await;
    }

    fn cleanup(&mut self) {
        for (topic_name, pipeline) in self.subs.drain() {
            if let Some(topic) = self.engine.registry.get(&topic_name) {
                topic.detach(&self.client_id);
                self.engine
                    .metrics
                    .set_subscribers(&topic_name, topic.subscriber_count());
            }
            pipeline.close();
        }
    }
}
