// download.rs — 图片下载模块
// 负责计算保存目录和文件名、获取图片字节并写入磁盘，从不覆盖已有文件

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::source::{ImageRecord, SourceKind};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// 获取图片内容的抽象，生产环境走 HTTP，测试时可以换成内存实现
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, site: SourceKind, url: &str) -> Result<Vec<u8>>;
}

/// 基于共享 reqwest 客户端的下载实现
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, site: SourceKind, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(%url, "downloading");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                site,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// 下载相关的设置，从 AppConfig 中取出
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub dir: PathBuf,
    pub filename_format: String,
    pub organize_by_source: bool,
    pub auto_download: bool,
}

impl DownloadSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dir: config.download_dir.clone(),
            filename_format: config.filename_format.clone(),
            organize_by_source: config.organize_by_source,
            auto_download: config.auto_download,
        }
    }

    /// 图片的保存目录：按来源分目录时追加来源子目录
    pub fn target_dir(&self, record: &ImageRecord) -> PathBuf {
        if self.organize_by_source {
            self.dir.join(record.source.dir_name())
        } else {
            self.dir.clone()
        }
    }

    /// 按格式生成文件名（含扩展名）
    ///
    /// - `original`：`{id}`
    /// - `source_id`：`{source}_{id}`
    /// - `date_id`：`{date}_{id}`，日期为 YYYYMMDD
    /// - 其它值视为模板，支持 `{id}` `{source}` `{date}` `{width}` `{height}` `{title}`
    pub fn file_name(&self, record: &ImageRecord, date: NaiveDate) -> String {
        let ext = record.extension();
        let id = file_id(record, ext);
        let date = date.format("%Y%m%d").to_string();
        let source = record.source.dir_name();

        let stem = match self.filename_format.as_str() {
            "original" => id.to_string(),
            "source_id" => format!("{source}_{id}"),
            "date_id" => format!("{date}_{id}"),
            template => template
                .replace("{id}", id)
                .replace("{source}", source)
                .replace("{date}", &date)
                .replace("{width}", &record.width.to_string())
                .replace("{height}", &record.height.to_string())
                .replace("{title}", record.title.as_deref().unwrap_or(id)),
        };

        let stem = sanitize(&stem);
        if stem.is_empty() {
            format!("{}{ext}", sanitize(id))
        } else {
            format!("{stem}{ext}")
        }
    }
}

/// ID 里可能已经带了扩展名（Waifu.pics 以文件名为 ID），去掉以免重复
fn file_id<'a>(record: &'a ImageRecord, ext: &str) -> &'a str {
    let id = record.id.as_str();
    match id.len().checked_sub(ext.len()) {
        Some(split) if split > 0 && id.is_char_boundary(split) && id[split..].eq_ignore_ascii_case(ext) => {
            &id[..split]
        }
        _ => id,
    }
}

/// 替换路径分隔符和 Windows 不允许的字符
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

/// 文件已存在时依次尝试 name_1.ext、name_2.ext……
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{ext}")),
        None => (file_name, String::new()),
    };
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// 下载器
pub struct Downloader<F: Fetch> {
    fetcher: F,
    settings: DownloadSettings,
}

impl<F: Fetch> Downloader<F> {
    pub fn new(fetcher: F, settings: DownloadSettings) -> Self {
        Self { fetcher, settings }
    }

    /// 按配置的目录和文件名格式下载，返回保存路径
    pub async fn download(&self, record: &ImageRecord) -> Result<PathBuf> {
        let dir = self.settings.target_dir(record);
        fs::create_dir_all(&dir).await?;
        let name = self.settings.file_name(record, Local::now().date_naive());
        let path = unique_path(&dir, &name);
        self.write(record, &path).await?;
        Ok(path)
    }

    /// 下载到指定路径，已存在则覆盖
    pub async fn download_to(&self, record: &ImageRecord, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.write(record, path).await
    }

    /// 打开图片时调用：开启自动下载才会写文件
    pub async fn on_open(&self, record: &ImageRecord) -> Result<Option<PathBuf>> {
        if !self.settings.auto_download {
            return Ok(None);
        }
        self.download(record).await.map(Some)
    }

    async fn write(&self, record: &ImageRecord, path: &Path) -> Result<()> {
        let bytes = self.fetcher.fetch(record.source, &record.url).await?;
        let mut file = File::create(path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "image saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 返回固定内容并记录请求过的 URL
    #[derive(Default)]
    struct FakeFetch {
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn fetch(&self, _site: SourceKind, url: &str) -> Result<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(b"image-bytes".to_vec())
        }
    }

    struct FailingFetch;

    #[async_trait]
    impl Fetch for FailingFetch {
        async fn fetch(&self, site: SourceKind, _url: &str) -> Result<Vec<u8>> {
            Err(Error::Status { site, status: 404 })
        }
    }

    fn settings(dir: &Path, format: &str, organize: bool, auto: bool) -> DownloadSettings {
        DownloadSettings {
            dir: dir.to_path_buf(),
            filename_format: format.to_string(),
            organize_by_source: organize,
            auto_download: auto,
        }
    }

    fn record() -> ImageRecord {
        let mut r = ImageRecord::new(SourceKind::Wallhaven, "k7q9e1", "https://w.wallhaven.cc/full/k7/wallhaven-k7q9e1.png");
        r.width = 2560;
        r.height = 1440;
        r.title = Some("Blue/Sky".into());
        r
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn filename_formats() {
        let dir = Path::new("/downloads");
        let name = |format: &str| settings(dir, format, false, false).file_name(&record(), day());
        assert_eq!(name("original"), "k7q9e1.png");
        assert_eq!(name("source_id"), "wallhaven_k7q9e1.png");
        assert_eq!(name("date_id"), "20240305_k7q9e1.png");
        assert_eq!(name("{source}-{width}x{height}-{id}"), "wallhaven-2560x1440-k7q9e1.png");
        assert_eq!(name("{title}_{date}"), "Blue_Sky_20240305.png");
        assert_eq!(name("../{id}"), "_k7q9e1.png");
    }

    #[test]
    fn id_with_extension_is_not_doubled() {
        let r = ImageRecord::new(SourceKind::WaifuPics, "AbC123.jpg", "https://i.waifu.pics/AbC123.jpg");
        let s = settings(Path::new("/d"), "source_id", false, false);
        assert_eq!(s.file_name(&r, day()), "waifu_pics_AbC123.jpg");
    }

    #[test]
    fn target_dir_follows_organize_flag() {
        let dir = Path::new("/downloads");
        assert_eq!(settings(dir, "original", true, false).target_dir(&record()), dir.join("wallhaven"));
        assert_eq!(settings(dir, "original", false, false).target_dir(&record()), dir);

        let waifu = ImageRecord::new(SourceKind::WaifuIm, "1", "https://cdn.waifu.im/1.jpg");
        assert_eq!(settings(dir, "original", true, false).target_dir(&waifu), dir.join("waifu_im"));
    }

    #[test]
    fn existing_files_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a_1.jpg"), b"x").unwrap();
        assert_eq!(unique_path(dir.path(), "a.jpg"), dir.path().join("a_2.jpg"));
        assert_eq!(unique_path(dir.path(), "b.jpg"), dir.path().join("b.jpg"));
    }

    #[tokio::test]
    async fn download_writes_into_source_dir_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(FakeFetch::default(), settings(dir.path(), "original", true, false));

        let first = downloader.download(&record()).await.unwrap();
        let second = downloader.download(&record()).await.unwrap();
        assert_eq!(first, dir.path().join("wallhaven").join("k7q9e1.png"));
        assert_eq!(second, dir.path().join("wallhaven").join("k7q9e1_1.png"));
        assert_eq!(std::fs::read(&first).unwrap(), b"image-bytes");
        assert_eq!(
            *downloader.fetcher.requested.lock().unwrap(),
            vec![record().url, record().url]
        );
    }

    #[tokio::test]
    async fn open_with_auto_download_writes_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(FakeFetch::default(), settings(dir.path(), "source_id", false, true));

        let saved = downloader.on_open(&record()).await.unwrap();
        let expected = dir.path().join("wallhaven_k7q9e1.png");
        assert_eq!(saved.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn open_without_auto_download_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(FakeFetch::default(), settings(dir.path(), "original", false, false));

        assert_eq!(downloader.on_open(&record()).await.unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(downloader.fetcher.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(FailingFetch, settings(dir.path(), "original", false, true));

        let err = downloader.download(&record()).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert!(!dir.path().join("k7q9e1.png").exists());
    }

    #[tokio::test]
    async fn download_to_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache").join("wallhaven_k7q9e1.png");
        let downloader = Downloader::new(FakeFetch::default(), settings(dir.path(), "original", false, false));
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"old").unwrap();

        downloader.download_to(&record(), &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"image-bytes");
    }
}
