use crate::error::{BackupError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// gzip 压缩文件，返回压缩后的大小
pub async fn compress_file(input: &Path, output: &Path, level: u32) -> Result<u64> {
    let source = input.to_path_buf();
    let target = output.to_path_buf();

    // 在后台线程中执行压缩操作，避免阻塞异步运行时
    let size = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let mut reader = BufReader::new(File::open(&source)?);
        let writer = BufWriter::new(File::create(&target)?);
        let mut encoder = GzEncoder::new(writer, Compression::new(level));
        std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.flush()?;
        Ok(std::fs::metadata(&target)?.len())
    })
    .await?
    .map_err(|e| BackupError::compression(e.to_string()))?;

    info!("压缩完成: {} ({} 字节)", output.display(), size);
    Ok(size)
}

/// 解压 gzip 文件，返回解压后的大小
pub async fn decompress_file(input: &Path, output: &Path) -> Result<u64> {
    let source = input.to_path_buf();
    let target = output.to_path_buf();

    let size = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&source)?));
        let mut writer = BufWriter::new(File::create(&target)?);
        let size = std::io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
        Ok(size)
    })
    .await?
    .map_err(|e| BackupError::compression(format!("解压失败: {e}")))?;

    info!("解压完成: {} ({} 字节)", output.display(), size);
    Ok(size)
}
