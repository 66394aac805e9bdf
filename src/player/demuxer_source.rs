use crate::core::Result;

/// 读包结果
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome<P> {
    Packet(P),
    EndOfInput,
    /// 被停止令牌中断
    Interrupted,
}

/// 数据包来源抽象接口
///
/// 解封装线程只依赖这个 trait，便于替换成测试用的数据源。
pub trait PacketSource: Send {
    type Packet: Send;

    /// 读取下一个数据包（阻塞）
    ///
    /// 返回：
    /// - Ok(Packet): 成功读取一个包
    /// - Ok(EndOfInput): 到达文件末尾
    /// - Ok(Interrupted): 停止令牌触发
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<ReadOutcome<Self::Packet>>;

    /// 包所属的流索引
    fn stream_index(packet: &Self::Packet) -> usize;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
