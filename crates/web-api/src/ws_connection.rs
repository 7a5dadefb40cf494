use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, MessageId, Participant, RejectionReason, SessionId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::SessionStream;
use serde::Serialize;
use tokio::sync::mpsc;

/// 每个入站帧的准入回执
#[derive(Debug, Serialize)]
struct AckFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    accepted: bool,
    code: Option<&'static str>,
    reason: Option<String>,
    message_id: Option<MessageId>,
}

impl AckFrame {
    fn from_outcome(outcome: Result<MessageId, RejectionReason>) -> Self {
        match outcome {
            Ok(message_id) => Self {
                kind: "ack",
                accepted: true,
                code: None,
                reason: None,
                message_id: Some(message_id),
            },
            Err(reason) => Self {
                kind: "ack",
                accepted: false,
                code: Some(reason.code()),
                reason: Some(reason.to_string()),
                message_id: None,
            },
        }
    }
}

/// WebSocket 连接
///
/// 单个连接绑定一个会话：
/// - 文本帧交给路由器准入，并回执结果
/// - 会话广播转发给客户端
/// - Ping/Pong 心跳
/// - 断开时清理参与者与连接计数
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    participant: Participant,
    session_id: SessionId,
    connection_id: ConnectionId,
    stream: SessionStream,
}

impl WebSocketConnection {
    pub fn new(
        socket: WebSocket,
        state: AppState,
        participant: Participant,
        session_id: SessionId,
    ) -> Self {
        let stream = state.broadcaster.subscribe(session_id.clone());
        let connection_id = ConnectionId::generate();

        tracing::info!(
            user_id = %participant.user_id,
            session_id = %session_id,
            connection_id = %connection_id,
            "WebSocket 连接已建立"
        );

        Self {
            socket,
            state,
            participant,
            session_id,
            connection_id,
            stream,
        }
    }

    /// 运行连接主循环，直到任一方向断开
    pub async fn run(self) {
        let Self {
            socket,
            state,
            participant,
            session_id,
            connection_id,
            mut stream,
        } = self;

        state
            .participants
            .join(&session_id, participant.clone())
            .await;

        let (mut sender, mut incoming) = socket.split();

        // 所有写操作经由命令通道串行化
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendText(text) => WsMessage::Text(text.into()),
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    Some(event) = stream.recv() => match serde_json::to_string(&event) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize session event");
                            continue;
                        }
                    },
                    else => break,
                };
                if sender.send(frame).await.is_err() {
                    tracing::debug!("WebSocket sender closed");
                    break;
                }
            }
        });

        let mut recv_task = {
            let state = state.clone();
            let participant = participant.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    let inbound = Inbound {
                        state: &state,
                        participant: &participant,
                        session_id: &session_id,
                        connection_id,
                    };
                    if inbound.handle(message, &cmd_tx).await.is_err() {
                        break;
                    }
                }
            })
        };

        // 任一方向结束即关闭整个连接
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        state
            .participants
            .leave(&session_id, participant.user_id)
            .await;
        state.rate_limiter.remove_connection(participant.user_id);

        tracing::info!(
            user_id = %participant.user_id,
            session_id = %session_id,
            connection_id = %connection_id,
            "WebSocket 连接已断开"
        );
    }
}

/// 接收方向的上下文
struct Inbound<'a> {
    state: &'a AppState,
    participant: &'a Participant,
    session_id: &'a SessionId,
    connection_id: ConnectionId,
}

impl Inbound<'_> {
    /// 返回 Err 表示连接应当关闭
    async fn handle(&self, message: WsMessage, cmd_tx: &mpsc::Sender<WsCommand>) -> Result<(), ()> {
        let command = match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => WsCommand::SendPong(data.to_vec()),
            WsMessage::Pong(_) => return Ok(()),
            WsMessage::Text(text) => {
                let outcome = self.state.router.admit_text(
                    text.as_str(),
                    self.participant,
                    self.session_id,
                    self.connection_id,
                );
                WsCommand::SendText(Self::ack(outcome))
            }
            WsMessage::Binary(_) => WsCommand::SendText(Self::ack(Err(
                RejectionReason::malformed("binary frames are not supported"),
            ))),
        };

        cmd_tx.send(command).await.map_err(|_| {
            tracing::warn!("WebSocket command channel closed");
        })
    }

    fn ack(outcome: Result<MessageId, RejectionReason>) -> String {
        serde_json::to_string(&AckFrame::from_outcome(outcome)).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to serialize ack frame");
            r#"{"type":"ack","accepted":false}"#.to_string()
        })
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}
