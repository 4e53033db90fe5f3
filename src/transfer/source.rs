// 上传数据源
//
// 按偏移读取（read_at），并发或重试的分片读取互不共享游标

use async_trait::async_trait;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 可按偏移读取的字节源
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// 总字节数
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取 `[offset, offset + len)`，不足时返回 `UnexpectedEof`
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// 内存数据源
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "偏移超出范围"))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "读取超出数据末尾"))?;
        Ok(self.data[start..end].to_vec())
    }
}

/// 本地文件数据源
///
/// 每次读取独立打开文件并定位，阻塞 I/O 放到 spawn_blocking 中执行
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// 打开文件并记录大小
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("不是普通文件: {:?}", path),
            ));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;

            let mut buffer = vec![0u8; len];
            file.read_exact(&mut buffer)?;

            Ok(buffer)
        })
        .await
        .map_err(io::Error::other)?
    }
}
