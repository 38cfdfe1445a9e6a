//! 流式发射器
//!
//! ProgressEmitter 独占进度通道的发送端：创建时发出 start，complete / error 消耗自身并关闭通道，
//! 未发出终止事件就被丢弃（提前返回、panic 展开）时在 Drop 中补发 error。
//! 发送失败说明消费端已断开，此时取消请求的 CancellationToken。

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::events::{ProgressEvent, ProgressKind};
use crate::core::orchestrator::{Orchestrator, Outcome, TurnRequest};
use crate::core::RelayError;

pub struct ProgressEmitter {
    sender: Option<UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl ProgressEmitter {
    pub fn start(sender: UnboundedSender<ProgressEvent>, cancel: CancellationToken) -> Self {
        let emitter = Self {
            sender: Some(sender),
            cancel,
        };
        emitter.send(ProgressEvent::new(
            ProgressKind::Start,
            json!({"message": "Starting message processing"}),
        ));
        emitter
    }

    pub fn progress(&self, data: Value) {
        self.send(ProgressEvent::new(ProgressKind::Progress, data));
    }

    pub fn complete(mut self, data: Value) {
        self.terminate(ProgressEvent::new(ProgressKind::Complete, data));
    }

    pub fn error(mut self, data: Value) {
        self.terminate(ProgressEvent::new(ProgressKind::Error, data));
    }

    /// 将编排结果转为终止事件
    pub fn finish(self, result: Result<Outcome, RelayError>) {
        match result {
            Ok(Outcome::Answered { message }) => self.complete(json!({"message": message})),
            Ok(Outcome::Completed { summary, data, .. }) => {
                self.complete(json!({"message": summary, "data": data}))
            }
            Ok(Outcome::AgentFailed { message, data }) => {
                self.error(json!({"message": message, "data": data}))
            }
            Err(err) => self.error(json!({"message": err.stage(), "error": err.to_string()})),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.sender {
            if tx.send(event).is_err() && !self.cancel.is_cancelled() {
                tracing::debug!("progress receiver dropped, cancelling request");
                self.cancel.cancel();
            }
        }
    }

    fn terminate(&mut self, event: ProgressEvent) {
        if let Some(tx) = self.sender.take() {
            if tx.send(event).is_err() {
                self.cancel.cancel();
            }
        }
    }
}

impl Drop for ProgressEmitter {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::warn!("progress stream closed without a terminal event");
            self.terminate(ProgressEvent::new(
                ProgressKind::Error,
                json!({"message": "processing aborted"}),
            ));
        }
    }
}

/// 在独立任务中运行一次编排，返回进度事件接收端（收到 None 即流结束）
pub fn spawn_stream(
    orchestrator: Arc<Orchestrator>,
    request: TurnRequest,
) -> UnboundedReceiver<ProgressEvent> {
    let (tx, rx) = unbounded_channel();
    let span = request.span();

    tokio::spawn(
        async move {
            let cancel = CancellationToken::new();
            let emitter = ProgressEmitter::start(tx, cancel.clone());
            let result = orchestrator.run(&request, Some(&emitter), &cancel).await;
            if let Err(err) = &result {
                tracing::warn!(error = %err, class = ?err.class(), "stream request failed");
            }
            emitter.finish(result);
        }
        .instrument(span),
    );

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_start_then_terminal_then_closed() {
        let (tx, mut rx) = unbounded_channel();
        let emitter = ProgressEmitter::start(tx, CancellationToken::new());
        emitter.progress(json!({"message": "working"}));
        emitter.complete(json!({"message": "done"}));

        let events = drain(&mut rx);
        let kinds: Vec<ProgressKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [ProgressKind::Start, ProgressKind::Progress, ProgressKind::Complete]
        );
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_drop_without_terminal_emits_error() {
        let (tx, mut rx) = unbounded_channel();
        {
            let emitter = ProgressEmitter::start(tx, CancellationToken::new());
            emitter.progress(json!({"message": "working"}));
        }
        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.kind, ProgressKind::Error);
        assert_eq!(last.message(), Some("processing aborted"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn test_receiver_drop_cancels() {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let emitter = ProgressEmitter::start(tx, cancel.clone());
        drop(rx);
        emitter.progress(json!({"message": "anyone there?"}));
        assert!(cancel.is_cancelled());
        assert!(emitter.is_cancelled());
    }

    #[test]
    fn test_fatal_error_carries_stage_and_error() {
        let (tx, mut rx) = unbounded_channel();
        let emitter = ProgressEmitter::start(tx, CancellationToken::new());
        emitter.finish(Err(RelayError::Session("connection refused".into())));
        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.kind, ProgressKind::Error);
        assert_eq!(last.message(), Some("Failed to create session"));
        assert_eq!(
            last.data.get("error").and_then(Value::as_str),
            Some("session creation failed: connection refused")
        );
    }
}
