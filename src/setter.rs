// setter.rs — 系统壁纸设置模块

use crate::download::{Downloader, Fetch};
use crate::error::{Error, Result};
use crate::source::ImageRecord;
use rust_i18n::t;
use std::path::{Path, PathBuf};

/// 将指定路径的图片设置为系统壁纸
///
/// # 参数
/// - `path`: 图片的本地路径
pub fn set_from_path(path: impl AsRef<Path>) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.is_file() {
        return Err(Error::Wallpaper(
            t!("error_not_a_file", path => path_ref.display()).to_string(),
        ));
    }
    // wallpaper 需要绝对路径
    let absolute = std::fs::canonicalize(path_ref)?;
    let path_str = absolute
        .to_str()
        .ok_or_else(|| Error::Wallpaper(t!("error_utf8").to_string()))?;

    tracing::info!(path = %path_str, "setting wallpaper");

    // 调用第三方库设置壁纸，这个库会自动识别桌面环境
    wallpaper::set_from_path(path_str).map_err(|e| Error::Wallpaper(e.to_string()))
}

/// 远程图片在缓存目录中的文件名：<来源目录名>_<ID><扩展名>
pub fn cache_path(cache_dir: &Path, record: &ImageRecord) -> PathBuf {
    let ext = record.extension();
    let id = record.id.strip_suffix(ext).unwrap_or(&record.id);
    cache_dir.join(format!("{}_{}{}", record.source.dir_name(), id.replace(['/', '\\'], "_"), ext))
}

/// 先把远程图片下载到缓存目录（覆盖旧文件），再设置为壁纸
pub async fn set_from_record<F: Fetch>(
    downloader: &Downloader<F>,
    cache_dir: &Path,
    record: &ImageRecord,
) -> Result<PathBuf> {
    let path = cache_path(cache_dir, record);
    downloader.download_to(record, &path).await?;
    set_from_path(&path)?;
    Ok(path)
}
