// QuickXorHash 流式校验和
//
// OneDrive / Graph 用于校验上传内容完整性的哈希：
// - 160 位循环寄存器，每个字节相对上一个字节左移 11 位后异或进寄存器
// - 最终把总长度（小端 i64）异或进摘要的最后 8 个字节
// - 摘要以 base64 文本形式上报
//
// 摘要只取决于字节序列本身，与 update 的切分方式无关

use crate::uploader::UploadError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// 寄存器宽度（位）
const WIDTH_IN_BITS: usize = 160;

/// 每个字节的位移
const SHIFT: usize = 11;

/// 64 位单元数量（最后一个单元只用低 32 位）
const CELL_COUNT: usize = (WIDTH_IN_BITS - 1) / 64 + 1;

/// 摘要长度（字节）
pub const DIGEST_LEN: usize = WIDTH_IN_BITS / 8;

/// QuickXor 哈希累加器
///
/// 非线程安全，只在单个文件的上传流程内使用
#[derive(Debug, Clone, Default)]
pub struct QuickXorHash {
    cells: [u64; CELL_COUNT],
    shift_so_far: usize,
    length_so_far: u64,
}

impl QuickXorHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已累加的字节数
    pub fn len(&self) -> u64 {
        self.length_so_far
    }

    pub fn is_empty(&self) -> bool {
        self.length_so_far == 0
    }

    /// 累加一段数据（必须按文件顺序喂入每个字节且只喂一次）
    pub fn update(&mut self, data: &[u8]) {
        let len = data.len();
        if len == 0 {
            return;
        }

        let mut cell_index = self.shift_so_far / 64;
        let mut cell_offset = self.shift_so_far % 64;

        // 位置相差 160 的字节落在同一位，先异或再写入
        let iterations = len.min(WIDTH_IN_BITS);

        for i in 0..iterations {
            let is_last_cell = cell_index == CELL_COUNT - 1;
            let bits_in_cell = if is_last_cell {
                WIDTH_IN_BITS % 64
            } else {
                64
            };

            if cell_offset <= bits_in_cell - 8 {
                for j in (i..len).step_by(WIDTH_IN_BITS) {
                    self.cells[cell_index] ^= (data[j] as u64) << cell_offset;
                }
            } else {
                // 字节跨越单元边界，高位部分写入下一个单元（最后一个单元回绕到第一个）
                let next_index = if is_last_cell { 0 } else { cell_index + 1 };
                let low_bits = bits_in_cell - cell_offset;

                let mut xored: u8 = 0;
                for j in (i..len).step_by(WIDTH_IN_BITS) {
                    xored ^= data[j];
                }

                self.cells[cell_index] ^= (xored as u64) << cell_offset;
                self.cells[next_index] ^= (xored as u64) >> low_bits;
            }

            cell_offset += SHIFT;
            while cell_offset >= bits_in_cell {
                cell_index = if is_last_cell { 0 } else { cell_index + 1 };
                cell_offset -= bits_in_cell;
            }
        }

        self.shift_so_far = (self.shift_so_far + SHIFT * (len % WIDTH_IN_BITS)) % WIDTH_IN_BITS;
        self.length_so_far += len as u64;
    }

    /// 计算摘要（不消耗内部状态，可继续 update）
    pub fn digest(&self) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];

        for (i, cell) in self.cells[..CELL_COUNT - 1].iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&cell.to_le_bytes());
        }

        let tail_start = (CELL_COUNT - 1) * 8;
        let tail_len = DIGEST_LEN - tail_start;
        out[tail_start..].copy_from_slice(&self.cells[CELL_COUNT - 1].to_le_bytes()[..tail_len]);

        let length = (self.length_so_far as i64).to_le_bytes();
        for (i, b) in length.iter().enumerate() {
            out[DIGEST_LEN - length.len() + i] ^= b;
        }

        out
    }

    /// 摘要的 base64 文本形式（与 Graph 返回的 quickXorHash 格式一致）
    pub fn digest_base64(&self) -> String {
        STANDARD.encode(self.digest())
    }
}

/// 独立读取一遍文件计算 QuickXor 摘要（base64）
///
/// 在阻塞线程池中执行文件 I/O
pub async fn hash_file(path: &Path) -> Result<String, UploadError> {
    let owned = path.to_path_buf();

    tokio::task::spawn_blocking(move || hash_file_sync(&owned))
        .await
        .map_err(|e| UploadError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn hash_file_sync(path: &Path) -> Result<String, UploadError> {
    let file = std::fs::File::open(path).map_err(|e| UploadError::io(path, e))?;

    // 使用 BufReader 提高读取效率
    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = QuickXorHash::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| UploadError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.digest_base64();
    debug!(
        "QuickXor 计算完成: path={:?}, size={}, digest={}",
        path,
        hasher.len(),
        digest
    );

    Ok(digest)
}
