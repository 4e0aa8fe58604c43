// 上传分片管理
//
// Graph 上传会话的分片规则：
// - 同一会话的字节范围必须连续、不重叠、按偏移升序到达
// - 每个分片一次 PUT，携带 Content-Range / Content-Length
// - 分片大小按 MB 配置，默认 5MB，允许 1-60MB

use crate::uploader::UploadError;
use futures::Stream;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// 1MB
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// 默认分片大小: 5MB
pub const DEFAULT_CHUNK_SIZE_MB: u64 = 5;

/// 最小分片大小: 1MB
pub const MIN_CHUNK_SIZE_MB: u64 = 1;

/// 最大分片大小: 60MB
pub const MAX_CHUNK_SIZE_MB: u64 = 60;

/// MB 转字节
pub fn chunk_size_from_mb(chunk_size_mb: u64) -> u64 {
    chunk_size_mb * BYTES_PER_MB
}

/// 校验分片大小（MB）是否在允许范围内
pub fn validate_chunk_size_mb(chunk_size_mb: u64) -> Result<(), String> {
    if !(MIN_CHUNK_SIZE_MB..=MAX_CHUNK_SIZE_MB).contains(&chunk_size_mb) {
        return Err(format!(
            "分片大小必须在 {}-{}MB 之间，当前: {}MB",
            MIN_CHUNK_SIZE_MB, MAX_CHUNK_SIZE_MB, chunk_size_mb
        ));
    }
    Ok(())
}

/// 分片描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 分片索引
    pub index: usize,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
    /// 文件总大小
    pub total_size: u64,
}

impl ChunkDescriptor {
    pub fn new(index: usize, range: Range<u64>, total_size: u64) -> Self {
        Self {
            index,
            range,
            total_size,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// Content-Range 头的值，例如 `bytes 0-999999/1000000`
    pub fn content_range(&self) -> String {
        format!(
            "bytes {}-{}/{}",
            self.range.start,
            self.range.end - 1,
            self.total_size
        )
    }
}

/// 分片计划
///
/// 由（文件大小，分片大小）确定性推导，不涉及 I/O
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunks: Vec<ChunkDescriptor>,
    total_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// 创建分片计划
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小（字节，必须大于 0）
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks = Self::calculate_chunks(total_size, chunk_size);

        debug!(
            "创建分片计划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            chunk_size,
            chunks.len()
        );

        Self {
            chunks,
            total_size,
            chunk_size,
        }
    }

    /// 计算分片
    fn calculate_chunks(total_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut index = 0;

        while offset < total_size {
            let end = std::cmp::min(offset + chunk_size, total_size);
            chunks.push(ChunkDescriptor::new(index, offset..end, total_size));
            offset = end;
            index += 1;
        }

        chunks
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 已读取的分片数据
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    pub descriptor: ChunkDescriptor,
    pub data: Vec<u8>,
}

/// 分片读取器
///
/// 按分片计划顺序读取本地文件，只能向前读；中途失败需要从头重新上传整个文件
#[derive(Debug)]
pub struct ChunkReader {
    path: PathBuf,
    file: File,
    plan: ChunkPlan,
    next_index: usize,
}

impl ChunkReader {
    /// 打开本地文件
    ///
    /// 路径不存在或不是常规文件时返回 Io 错误
    pub async fn open(path: &Path, chunk_size: u64) -> Result<Self, UploadError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::io(path, e))?;

        if !metadata.is_file() {
            return Err(UploadError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "不是常规文件"),
            ));
        }

        let file = File::open(path).await.map_err(|e| UploadError::io(path, e))?;
        let plan = ChunkPlan::new(metadata.len(), chunk_size);

        info!(
            "打开上传文件: {:?}, 大小={} bytes, 分片数量={}",
            path,
            plan.total_size(),
            plan.chunk_count()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            plan,
            next_index: 0,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.plan.total_size()
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// 读取下一个分片，读完返回 None
    pub async fn next_chunk(&mut self) -> Result<Option<ChunkBuffer>, UploadError> {
        let descriptor = match self.plan.chunks.get(self.next_index) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };

        let mut data = vec![0u8; descriptor.size() as usize];
        self.file
            .read_exact(&mut data)
            .await
            .map_err(|e| UploadError::io(&self.path, e))?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            descriptor.index,
            descriptor.range.start,
            descriptor.range.end - 1,
            data.len()
        );

        self.next_index += 1;
        Ok(Some(ChunkBuffer { descriptor, data }))
    }

    /// 转换为惰性分片流
    pub fn into_stream(self) -> impl Stream<Item = Result<ChunkBuffer, UploadError>> {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_chunk().await?.map(|chunk| (chunk, reader)))
        })
    }
}
