//! TCP 通知中继 - 多实例部署的跨进程扇出
//!
//! 帧格式：4 字节小端长度前缀 + JSON 载荷。中继服务把收到的
//! 每一帧原样转发给所有连接（含发送方）；发布方不直接投递本地
//! 订阅者，而是依赖自己那份回环帧，保证本地与远端看到同一顺序。

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::message::{Channel, Notification};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{BoxError, LocalBackend, NotificationBackend};

/// 单帧载荷上限（防御畸形长度前缀）
const MAX_FRAME_BYTES: u32 = 1024 * 1024;

/// 中继帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFrame {
    pub channel: String,
    pub notification: Notification,
}

/// 写入一帧：长度前缀 + JSON
async fn write_frame(writer: &mut OwnedWriteHalf, frame: &RelayFrame) -> Result<(), BoxError> {
    let payload = serde_json::to_vec(frame)?;
    let len = u32::try_from(payload.len())?;
    if len > MAX_FRAME_BYTES {
        return Err("relay frame too large".into());
    }
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一帧；对端关闭连接时返回 None
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<RelayFrame>, BoxError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err("relay frame too large".into());
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// 中继服务端
///
/// 收到任何连接的一帧就重广播给当前所有连接。无持久化、无确认:
/// 通知是尽力而为的加速通道。
pub struct RelayServer {
    listener: TcpListener,
    shutdown: CancellationToken,
}

impl RelayServer {
    pub async fn bind(addr: &str, shutdown: CancellationToken) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, shutdown })
    }

    /// 实际监听地址（测试用 127.0.0.1:0 绑定后取端口）
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, BoxError> {
        Ok(self.listener.local_addr()?)
    }

    /// 接收循环；shutdown 触发后返回
    pub async fn run(self) {
        // 重广播通道：每个连接的读任务发布，所有连接的写任务订阅
        let (rebroadcast, _) = broadcast::channel::<RelayFrame>(256);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("relay server shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "relay accept failed");
                            continue;
                        }
                    };
                    tracing::info!(%peer, "relay connection established");
                    let rebroadcast = rebroadcast.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, rebroadcast, shutdown).await;
                        tracing::info!(%peer, "relay connection closed");
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    rebroadcast: broadcast::Sender<RelayFrame>,
    shutdown: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut outgoing = rebroadcast.subscribe();

    // 读写分任务：帧读取不可被写侧 select 打断（半帧即损坏）
    let write_shutdown = shutdown.clone();
    let write_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = write_shutdown.cancelled() => return,
                frame = outgoing.recv() => {
                    match frame {
                        Ok(frame) => {
                            if let Err(e) = write_frame(&mut writer, &frame).await {
                                tracing::warn!(error = %e, "relay write failed");
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "relay connection lagged, frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(frame)) => {
                        // 没有其他连接时发送失败，忽略
                        let _ = rebroadcast.send(frame);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "relay read failed");
                        break;
                    }
                }
            }
        }
    }
    write_task.abort();
}

/// 中继后端
///
/// publish 只把帧发给中继；本地订阅者的投递靠中继回环的那份帧，
/// 由读任务统一走 [`LocalBackend::deliver`]。
pub struct RelayBackend {
    local: Arc<LocalBackend>,
    outgoing: mpsc::UnboundedSender<RelayFrame>,
}

impl RelayBackend {
    /// 连接中继并启动读写任务
    pub async fn connect(
        addr: &str,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> Result<Self, BoxError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();
        let local = Arc::new(LocalBackend::new(capacity));

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<RelayFrame>();

        // 写任务
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => return,
                    frame = outgoing_rx.recv() => {
                        let Some(frame) = frame else { return };
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            tracing::error!(error = %e, "relay publish failed");
                            return;
                        }
                    }
                }
            }
        });

        // 读任务：回环与远端帧都在这里落地到本地订阅者
        let read_local = local.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    frame = read_frame(&mut reader) => {
                        match frame {
                            Ok(Some(frame)) => {
                                match Channel::from_str(&frame.channel) {
                                    Ok(channel) => {
                                        read_local.deliver(&channel, frame.notification);
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "relay frame with bad channel");
                                    }
                                }
                            }
                            Ok(None) => {
                                tracing::error!("relay connection lost");
                                return;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "relay read failed");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self { local, outgoing })
    }
}

#[async_trait]
impl NotificationBackend for RelayBackend {
    async fn publish(
        &self,
        channel: &Channel,
        notification: Notification,
    ) -> Result<usize, BoxError> {
        let frame = RelayFrame {
            channel: channel.to_string(),
            notification,
        };
        self.outgoing
            .send(frame)
            .map_err(|_| "relay connection closed")?;
        // 本地订阅者由回环帧投递；当前本地接收者数仍可报告
        Ok(0)
    }

    fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Notification> {
        self.local.subscribe(channel)
    }

    fn cleanup(&self) {
        self.local.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::NotificationKind;
    use std::time::Duration;

    #[tokio::test]
    async fn frames_fan_out_across_relay_connections() {
        let shutdown = CancellationToken::new();
        let server = RelayServer::bind("127.0.0.1:0", shutdown.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());

        let a = RelayBackend::connect(&addr, 8, shutdown.clone())
            .await
            .unwrap();
        let b = RelayBackend::connect(&addr, 8, shutdown.clone())
            .await
            .unwrap();

        let channel = Channel::Store(7);
        let mut a_rx = a.subscribe(&channel);
        let mut b_rx = b.subscribe(&channel);

        let note = Notification::new(
            NotificationKind::System,
            &channel,
            "cross instance",
            "hello from a",
        );
        a.publish(&channel, note).await.unwrap();

        // 发布方靠回环帧收到自己的消息，另一实例靠转发收到
        let got_a = tokio::time::timeout(Duration::from_secs(1), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let got_b = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_a.title, "cross instance");
        assert_eq!(got_b.title, "cross instance");

        shutdown.cancel();
    }
}
