use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use mcp_queue_engine::{Dispatcher, QueueConfig};
use mcp_queue_proto::{decode_message, recv_frame, send_message, CodecError, Message};

/// Unix-domain socket server: accepts clients, decodes framed requests,
/// and keeps each connection's write side alive for the dispatcher's
/// completion callbacks.
pub struct QueueServer {
    socket_path: PathBuf,
    pid_path: PathBuf,
    config: QueueConfig,
    dispatcher: Arc<Dispatcher>,
}

impl QueueServer {
    pub fn new(
        socket_path: PathBuf,
        pid_path: PathBuf,
        config: QueueConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            socket_path,
            pid_path,
            config,
            dispatcher,
        }
    }

    /// Bind, serve until a `Shutdown` message or a signal, then stop the
    /// dispatcher and clean up the socket and PID files.
    pub async fn run(&self) -> anyhow::Result<()> {
        // A stale socket from an unclean exit would make bind fail.
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        std::fs::write(&self.pid_path, std::process::id().to_string())?;

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("server listening on {}", self.socket_path.display());

        self.dispatcher.start().await;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let signals = shutdown_signal();
        tokio::pin!(signals);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutdown requested over the socket");
                    break;
                }

                _ = &mut signals => {
                    info!("shutdown signal received");
                    break;
                }

                conn = listener.accept() => {
                    let stream = match conn {
                        Ok((stream, _addr)) => stream,
                        Err(err) => {
                            error!("accept error: {err}");
                            continue;
                        }
                    };
                    debug!("new client connection");
                    let dispatcher = self.dispatcher.clone();
                    let config = self.config.clone();
                    let shutdown_tx = shutdown_tx.clone();
                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_connection(stream, dispatcher, config, shutdown_tx).await
                        {
                            warn!("client connection error: {err:#}");
                        }
                    });
                }
            }
        }

        self.dispatcher.stop().await;
        drop(listener);
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
        info!("server stopped");
        Ok(())
    }
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!("failed to register SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn writer_task(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(err) = send_message(&mut writer, &msg).await {
            debug!("client write failed: {err}");
            break;
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    config: QueueConfig,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let (mut reader, writer) = stream.into_split();

    // All writes, responses and completion callbacks alike, funnel
    // through one task so they serialise per connection and a slow
    // client can only ever stall itself.
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    let idle_timeout = config.client_idle_timeout;
    loop {
        let frame = if idle_timeout > 0.0 {
            match tokio::time::timeout(
                Duration::from_secs_f64(idle_timeout),
                recv_frame(&mut reader),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("client connection idle timeout");
                    break;
                }
            }
        } else {
            recv_frame(&mut reader).await
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err @ (CodecError::FrameTooLarge(_) | CodecError::ShortRead)) => {
                warn!("client protocol error: {err}");
                break;
            }
            Err(err) => {
                warn!("client read error: {err}");
                break;
            }
        };

        let msg = match decode_message(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                // The frame itself was whole, so the stream is still in
                // sync; answer and keep reading.
                let _ = tx.send(Message::Error {
                    error: describe_bad_frame(&frame, &err),
                });
                continue;
            }
        };
        debug!("received {}", message_type(&msg));

        match msg {
            Message::Ping => {
                let _ = tx.send(Message::Pong);
            }
            Message::SubmitJob(mut request) => {
                config.apply_submit_defaults(&mut request);
                match dispatcher.submit(request, Some(tx.clone())).await {
                    Ok(job_id) => {
                        let _ = tx.send(Message::JobAccepted { job_id });
                    }
                    Err(err) => {
                        let _ = tx.send(Message::Error {
                            error: format!("job submission failed: {err:#}"),
                        });
                    }
                }
                // The connection now idles here until the dispatcher
                // pushes the terminal notification through `tx`.
            }
            Message::Status => {
                let _ = tx.send(Message::StatusResponse(dispatcher.status().await));
            }
            Message::Shutdown => {
                let _ = tx.send(Message::ShutdownAck);
                let _ = shutdown_tx.send(true);
                break;
            }
            other => {
                let _ = tx.send(Message::Error {
                    error: format!("Unknown message type: {}", message_type(&other)),
                });
            }
        }
    }

    // Dropping `tx` here only closes this handle; the dispatcher may
    // still hold a clone for an in-flight job, and its sends simply
    // fail once the writer task is gone.
    drop(tx);
    let _ = writer_handle.await;
    Ok(())
}

fn message_type(msg: &Message) -> String {
    serde_json::to_value(msg)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn describe_bad_frame(frame: &[u8], err: &CodecError) -> String {
    match serde_json::from_slice::<Value>(frame) {
        Ok(value) => match value.get("type").and_then(Value::as_str) {
            Some(kind) if is_known_type(kind) => format!("invalid {kind} message: {err}"),
            Some(kind) => format!("Unknown message type: {kind}"),
            None => "message is missing a type".to_string(),
        },
        Err(_) => format!("invalid message: {err}"),
    }
}

fn is_known_type(kind: &str) -> bool {
    matches!(
        kind,
        "ping"
            | "pong"
            | "submit_job"
            | "job_accepted"
            | "job_completed"
            | "job_failed"
            | "status"
            | "status_response"
            | "shutdown"
            | "shutdown_ack"
            | "error"
    )
}
