//! Line-oriented TCP command channel.
//!
//! Every connected client receives each status update as one JSON line and
//! may send `STOP`, `RESUME`, `STATUS` or `LOG`. Replies are JSON objects
//! tagged by `"type"` and terminated with CRLF.

use std::{io, net::SocketAddr, sync::Arc};

use safety_core::{EventEntry, EventKind, EventLog, StatusSnapshot, StopReason, StopSignal};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info, warn};

use crate::safety::hub::StatusHub;

/// Entries returned by the `LOG` command.
pub(crate) const LOG_REPLY_ENTRIES: usize = 20;
const COMMANDS: [&str; 4] = ["STOP", "RESUME", "STATUS", "LOG"];

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Reply {
    Welcome { message: String },
    Response { result: String },
    Status(StatusSnapshot),
    Log { history: Vec<EventEntry> },
    Help { commands: [&'static str; 4] },
}

/// What a command handler may touch.
#[derive(Clone)]
pub(crate) struct CommandContext {
    pub(crate) hub: Arc<StatusHub>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) stop: Arc<StopSignal>,
}

/// Interpret one received line. Blank lines get no reply.
pub(crate) fn handle_command(line: &str, ctx: &CommandContext) -> Option<Reply> {
    let command = line.trim().to_ascii_uppercase();
    if command.is_empty() {
        return None;
    }
    ctx.events
        .record(EventKind::Command, format!("Command: {command}"));

    let reply = match command.as_str() {
        "STOP" => {
            warn!("emergency stop requested over the command socket");
            ctx.stop.request(StopReason::EmergencyStop);
            ctx.events.record(EventKind::Danger, "Emergency stop requested");
            Reply::Response {
                result: "Emergency stop requested".into(),
            }
        }
        // Gating is re-evaluated before every primitive, so a resume only
        // needs acknowledging.
        "RESUME" => Reply::Response {
            result: "Resume acknowledged; motion continues once the hand is clear".into(),
        },
        "STATUS" => match ctx.hub.latest() {
            Some(snapshot) => Reply::Status(snapshot),
            None => Reply::Response {
                result: "No status published yet".into(),
            },
        },
        "LOG" => Reply::Log {
            history: ctx.events.recent(LOG_REPLY_ENTRIES),
        },
        _ => Reply::Help { commands: COMMANDS },
    };
    Some(reply)
}

/// Accept clients until the surrounding runtime shuts down.
pub(crate) async fn serve_commands(listener: TcpListener, ctx: CommandContext) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                actix_web::rt::spawn(async move {
                    info!("command client {peer} connected");
                    ctx.events
                        .record(EventKind::Info, format!("Client connected: {peer}"));
                    if let Err(err) = handle_client(stream, peer, &ctx).await {
                        debug!("command client {peer} errored: {err}");
                    }
                    info!("command client {peer} disconnected");
                    ctx.events
                        .record(EventKind::Info, format!("Client disconnected: {peer}"));
                });
            }
            Err(err) => warn!("command socket accept failed: {err}"),
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, ctx: &CommandContext) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut updates = ctx.hub.subscribe();

    send_reply(
        &mut writer,
        &Reply::Welcome {
            message: "Connected to handguard safety monitor".into(),
        },
    )
    .await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if let Some(reply) = handle_command(&line, ctx) {
                    send_reply(&mut writer, &reply).await?;
                }
            }
            update = updates.recv() => match update {
                Ok(json) => write_line(&mut writer, &json).await?,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("command client {peer} skipped {skipped} status updates");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn send_reply(writer: &mut OwnedWriteHalf, reply: &Reply) -> io::Result<()> {
    let json = serde_json::to_string(reply).map_err(io::Error::other)?;
    write_line(writer, &json).await
}

async fn write_line(writer: &mut OwnedWriteHalf, json: &str) -> io::Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use safety_core::{CoordinationBus, SafetyThresholds};
    use serde_json::{Value, json};

    use super::*;

    fn context() -> (CommandContext, CoordinationBus) {
        let bus = CoordinationBus::new();
        let ctx = CommandContext {
            hub: Arc::new(StatusHub::new()),
            events: bus.events_handle(),
            stop: bus.stop_handle(),
        };
        (ctx, bus)
    }

    fn to_json(reply: &Reply) -> Value {
        serde_json::to_value(reply).unwrap()
    }

    #[test]
    fn stop_requests_emergency_stop() {
        let (ctx, bus) = context();
        let reply = handle_command("stop\r", &ctx).unwrap();
        assert_eq!(
            to_json(&reply),
            json!({"type": "response", "result": "Emergency stop requested"})
        );
        assert_eq!(bus.stop().reason(), Some(StopReason::EmergencyStop));
    }

    #[test]
    fn resume_only_acknowledges() {
        let (ctx, bus) = context();
        let reply = to_json(&handle_command("RESUME", &ctx).unwrap());
        assert_eq!(reply["type"], "response");
        assert!(!bus.stop().is_requested());
        assert!(!bus.region().robot_paused());
    }

    #[test]
    fn status_returns_latest_snapshot() {
        let (ctx, bus) = context();
        assert_eq!(to_json(&handle_command("STATUS", &ctx).unwrap())["type"], "response");

        let snapshot =
            StatusSnapshot::from_region(bus.region(), &SafetyThresholds::default(), 3, (1280, 720));
        ctx.hub.publish(snapshot).unwrap();
        let reply = to_json(&handle_command("STATUS", &ctx).unwrap());
        assert_eq!(reply["type"], "status");
        assert_eq!(reply["status"], "SAFE");
        assert_eq!(reply["aruco_marker_id"], 3);
    }

    #[test]
    fn log_returns_recent_commands() {
        let (ctx, bus) = context();
        for _ in 0..30 {
            bus.events().record(EventKind::Info, "tick");
        }
        let reply = to_json(&handle_command("LOG", &ctx).unwrap());
        let history = reply["history"].as_array().unwrap();
        assert_eq!(history.len(), LOG_REPLY_ENTRIES);
        assert_eq!(history.last().unwrap()["type"], "command");
        assert_eq!(history.last().unwrap()["message"], "Command: LOG");
    }

    #[test]
    fn unknown_command_lists_help_and_blank_is_ignored() {
        let (ctx, bus) = context();
        assert!(handle_command("   ", &ctx).is_none());
        assert!(bus.events().is_empty());
        assert_eq!(
            to_json(&handle_command("dance", &ctx).unwrap()),
            json!({"type": "help", "commands": ["STOP", "RESUME", "STATUS", "LOG"]})
        );
    }

    #[test]
    fn client_gets_welcome_and_replies() {
        let (ctx, bus) = context();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::task::spawn_local(serve_commands(listener, ctx));

            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();

            let welcome: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(welcome["type"], "welcome");

            writer.write_all(b"STOP\n").await.unwrap();
            let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(reply["type"], "response");
        });
        assert!(bus.stop().is_requested());
    }
}
