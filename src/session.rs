/// 会话：一条入站连接与一条出站连接的双向中继
use crate::bridge::{bridge, BridgeOutcome};
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::transport::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 会话结束时的汇总
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    /// 入站连接 → 出站连接
    pub inbound: BridgeOutcome,
    /// 出站连接 → 入站连接
    pub outbound: BridgeOutcome,
}

impl SessionReport {
    /// 是否因 I/O 故障结束
    pub fn failed(&self) -> bool {
        self.inbound.error().is_some() || self.outbound.error().is_some()
    }
}

/// 独占两条连接，结束后两条连接都会被关闭
pub struct Session {
    id: Uuid,
    accepted: Connection,
    dialed: Connection,
    cancel: CancellationToken,
    buffer_size: usize,
}

impl Session {
    pub fn new(accepted: Connection, dialed: Connection, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            accepted,
            dialed,
            cancel,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 运行两个方向的数据泵，任一方向结束即拆除整个会话
    pub async fn run(mut self) -> SessionReport {
        info!(
            "Session {} started: {} ({}) <-> {} ({})",
            self.id,
            self.accepted.peer_addr(),
            self.accepted.kind(),
            self.dialed.peer_addr(),
            self.dialed.kind()
        );

        let (inbound, outbound) = {
            let (mut accepted_read, mut accepted_write) = tokio::io::split(&mut self.accepted);
            let (mut dialed_read, mut dialed_write) = tokio::io::split(&mut self.dialed);
            let cancel = &self.cancel;
            let buffer_size = self.buffer_size;

            // 使用 join! 等待两个方向都退出；先结束的一方负责取消另一方
            tokio::join!(
                async {
                    let outcome =
                        bridge(&mut accepted_read, &mut dialed_write, cancel, buffer_size).await;
                    cancel.cancel();
                    outcome
                },
                async {
                    let outcome =
                        bridge(&mut dialed_read, &mut accepted_write, cancel, buffer_size).await;
                    cancel.cancel();
                    outcome
                }
            )
        };

        self.accepted.close().await;
        self.dialed.close().await;

        for (direction, outcome) in [("inbound", &inbound), ("outbound", &outbound)] {
            match outcome {
                BridgeOutcome::Failed(err) => {
                    warn!("Session {} {} bridge failed: {}", self.id, direction, err)
                }
                other => debug!("Session {} {} bridge: {}", self.id, direction, other),
            }
        }

        info!(
            "Session {} closed ({} bytes in, {} bytes out)",
            self.id,
            inbound.bytes(),
            outbound.bytes()
        );

        SessionReport {
            id: self.id,
            inbound,
            outbound,
        }
    }
}
