//! Stdio bridge to the external TUI process.
//!
//! Line-delimited JSON, one object per line. Inbound (TUI→client) the
//! envelope is tiny: `{"type":"connect"}` or `{"type":"send","value":"…"}`
//! with `value` as plain text. Outbound (client→TUI) it is the full wire
//! [`Frame`]. Logs go to stderr; stdout belongs to the TUI exclusively.

use sealwire_proto::Frame;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use crate::supervisor::Supervisor;

/// TUI→client stdio envelope. `value` is raw text, not base64.
#[derive(Debug, Deserialize)]
struct TuiCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
}

/// Handle for emitting frames to the TUI.
///
/// Cheap to clone; every emitter feeds the same ordered queue, so UI output
/// never interleaves mid-line.
#[derive(Clone)]
pub struct UiEmitter {
    tx: mpsc::UnboundedSender<Frame>,
}

impl UiEmitter {
    /// An emitter plus the receiving end of its queue. Production wires the
    /// receiver to [`write_ui_to_stdout`]; tests consume it directly.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue one frame for the TUI. Dropped silently if the writer is gone,
    /// which only happens during process teardown.
    pub fn emit(&self, frame: Frame) {
        let _ = self.tx.send(frame);
    }
}

/// Drain the UI queue onto stdout, one JSON object per line.
pub async fn write_ui_to_stdout(mut ui_rx: mpsc::UnboundedReceiver<Frame>) {
    let mut stdout = tokio::io::stdout();

    while let Some(frame) = ui_rx.recv().await {
        let mut line = match frame.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "could not encode ui frame");
                continue;
            },
        };
        line.push('\n');

        if stdout.write_all(line.as_bytes()).await.is_err() {
            // The TUI is gone; nothing left to talk to.
            return;
        }
        let _ = stdout.flush().await;
    }
}

/// Read TUI commands from stdin until shutdown or EOF.
///
/// # Errors
///
/// Returns any stdin I/O error. EOF and the shutdown latch are clean exits.
pub async fn run(supervisor: Supervisor) -> std::io::Result<()> {
    let shutdown = supervisor.shutdown_latch();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.fired() => return Ok(()),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            // stdin closed: the TUI died, exit cleanly.
            supervisor.quit().await;
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let command: TuiCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(_) => continue,
        };

        match command.kind.as_str() {
            "connect" => {
                tracing::info!("trying to connect");
                supervisor.connect().await;
            },
            "send" => {
                let value = command.value.unwrap_or_default();
                tracing::debug!(line = %value, "sending");
                supervisor.submit_line(&value).await;
            },
            other => tracing::debug!(kind = %other, "unknown tui command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tui_commands_parse_with_and_without_value() {
        let connect: TuiCommand = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert_eq!(connect.kind, "connect");
        assert!(connect.value.is_none());

        let send: TuiCommand =
            serde_json::from_str(r#"{"type":"send","value":"hello there"}"#).unwrap();
        assert_eq!(send.kind, "send");
        assert_eq!(send.value.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn emitter_preserves_order() {
        use sealwire_proto::{FrameKind, WsMetadata};

        let (ui, mut rx) = UiEmitter::new();
        for i in 0..5u8 {
            ui.emit(Frame::with_value(FrameKind::Message, vec![i], WsMetadata::default()));
        }

        for i in 0..5u8 {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.value, Some(vec![i]));
        }
    }
}
