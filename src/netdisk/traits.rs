// 网盘接口抽象
//
// 上传引擎只依赖这两个 trait，便于替换实现和测试

use crate::auth::RemoteCredentials;
use crate::netdisk::{ChunkAck, UploadSession};
use crate::uploader::{ChunkDescriptor, UploadError};
use async_trait::async_trait;

/// 上传会话协商
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    /// 为完整远程路径（含上传根目录）创建上传会话
    async fn create_session(
        &self,
        credentials: &RemoteCredentials,
        remote_path: &str,
    ) -> Result<UploadSession, UploadError>;
}

/// 分片发送
#[async_trait]
pub trait ChunkUploader: Send + Sync {
    /// 发送一个字节区间，任何 2xx 都视为成功
    async fn send(
        &self,
        session: &UploadSession,
        descriptor: &ChunkDescriptor,
        data: Vec<u8>,
    ) -> Result<ChunkAck, UploadError>;
}
