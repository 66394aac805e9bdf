use crate::core::StopToken;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 创建一条流的输入包队列
///
/// - capacity > 0：有界通道，队列满时 `push` 阻塞（背压），可被停止令牌打断
/// - capacity == 0：无界通道
///
/// 发送端由解封装线程持有，`finish()` 标记输入结束；接收端由解码线程持有，
/// 输入结束后仍会先取完残留的包。
pub fn packet_queue<P>(capacity: usize) -> (PacketSender<P>, PacketReceiver<P>) {
    let (tx, rx) = if capacity == 0 { unbounded() } else { bounded(capacity) };
    let end_of_input = Arc::new(AtomicBool::new(false));
    (
        PacketSender {
            tx,
            end_of_input: end_of_input.clone(),
        },
        PacketReceiver { rx, end_of_input },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// 停止令牌已触发
    Stopped,
    /// 解码端已退出
    Closed,
}

/// 出队结果
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<P> {
    Packet(P),
    /// 输入结束且队列已清空
    EndOfInput,
    Stopped,
}

pub struct PacketSender<P> {
    tx: Sender<P>,
    end_of_input: Arc<AtomicBool>,
}

impl<P> Clone for PacketSender<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            end_of_input: self.end_of_input.clone(),
        }
    }
}

impl<P> PacketSender<P> {
    /// 入队（生产者：解封装线程）
    pub fn push(&self, packet: P, stop: &StopToken) -> Result<(), PushError> {
        if stop.is_cancelled() {
            return Err(PushError::Stopped);
        }
        select! {
            send(self.tx, packet) -> res => res.map_err(|_| PushError::Closed),
            recv(stop.waiter()) -> _ => Err(PushError::Stopped),
        }
    }

    /// 标记输入结束，drop 发送端后接收端取完残留包即返回 `Pop::EndOfInput`
    pub fn finish(self) {
        self.end_of_input.store(true, Ordering::Release);
    }
}

pub struct PacketReceiver<P> {
    rx: Receiver<P>,
    end_of_input: Arc<AtomicBool>,
}

impl<P> PacketReceiver<P> {
    /// 阻塞等待下一个包，入队、输入结束或停止时被唤醒
    pub fn wait_pop(&self, stop: &StopToken) -> Pop<P> {
        if stop.is_cancelled() {
            return Pop::Stopped;
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(packet) => Pop::Packet(packet),
                Err(_) => {
                    // 所有发送端都已 drop（正常结束或解封装线程异常退出）
                    self.end_of_input.store(true, Ordering::Release);
                    Pop::EndOfInput
                }
            },
            recv(stop.waiter()) -> _ => Pop::Stopped,
        }
    }

    pub fn is_end_of_input(&self) -> bool {
        self.end_of_input.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
