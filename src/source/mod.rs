// source/mod.rs — 图片源抽象接口模块
// 定义了所有图片站（Wallhaven、Waifu.im、Waifu.pics、Nekos.moe）必须实现的通用 Trait

pub mod nekosmoe;
pub mod waifuim;
pub mod waifupics;
pub mod wallhaven;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use wallhaven::WallhavenOptions;

/// 支持的图片来源
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[default]
    Wallhaven,
    #[value(alias = "waifu.im")]
    #[serde(alias = "waifu.im")]
    WaifuIm,
    #[value(alias = "waifu.pics")]
    #[serde(alias = "waifu.pics")]
    WaifuPics,
    #[value(alias = "nekos.moe")]
    #[serde(alias = "nekos.moe")]
    NekosMoe,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Wallhaven,
        SourceKind::WaifuIm,
        SourceKind::WaifuPics,
        SourceKind::NekosMoe,
    ];

    /// 展示用名称，与站点域名一致
    pub fn display_name(self) -> &'static str {
        match self {
            SourceKind::Wallhaven => "wallhaven",
            SourceKind::WaifuIm => "waifu.im",
            SourceKind::WaifuPics => "waifu.pics",
            SourceKind::NekosMoe => "nekos.moe",
        }
    }

    /// 按来源分目录保存时使用的子目录名（点号换成下划线）
    pub fn dir_name(self) -> &'static str {
        match self {
            SourceKind::Wallhaven => "wallhaven",
            SourceKind::WaifuIm => "waifu_im",
            SourceKind::WaifuPics => "waifu_pics",
            SourceKind::NekosMoe => "nekos_moe",
        }
    }

    /// 解析配置文件或命令行中写的来源名，接受 "waifu.im"、"waifu-im"、"waifu_im" 等写法
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['.', '_'], "-");
        Self::ALL.into_iter().find(|kind| {
            kind.display_name().replace('.', "-") == normalized
                || kind.display_name().replace('.', "") == normalized
        })
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 统一的图片元数据结构
/// 不论来自哪个图片站，都转换成这个结构体供上层使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// 图片在原站的 ID
    pub id: String,
    /// 原图的直接下载 URL
    pub url: String,
    /// 缩略图 URL（部分站点没有缩略图，与 url 相同）
    pub thumbnail: String,
    pub source: SourceKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 宽高未知时为 0
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub purity: Option<String>,
    /// 主色调，十六进制（如 "#336699"）
    #[serde(default)]
    pub colors: Vec<String>,
    /// 作品出处页面
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    /// 文件大小（字节）
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub favorites: Option<u64>,
}

impl ImageRecord {
    /// 构造只有必填字段的记录，其余字段由各适配器补充
    pub fn new(source: SourceKind, id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            thumbnail: url.clone(),
            url,
            source,
            title: None,
            tags: Vec::new(),
            width: 0,
            height: 0,
            category: None,
            purity: None,
            colors: Vec::new(),
            page_url: None,
            nsfw: false,
            file_size: None,
            created_at: None,
            views: None,
            favorites: None,
        }
    }

    /// 全局唯一标识：不同来源的 ID 可能重复，因此带上来源前缀
    pub fn key(&self) -> String {
        format!("{}:{}", self.source.dir_name(), self.id)
    }

    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// "2560x1440" 形式的分辨率，宽高未知时为 None
    pub fn resolution(&self) -> Option<String> {
        self.has_dimensions()
            .then(|| format!("{}x{}", self.width, self.height))
    }

    /// 约分后的宽高比，如 "16:9"
    pub fn ratio_label(&self) -> Option<String> {
        if !self.has_dimensions() {
            return None;
        }
        let divisor = gcd(self.width, self.height);
        Some(format!("{}:{}", self.width / divisor, self.height / divisor))
    }

    /// 从 URL 推断文件扩展名（带点），未知格式按 .jpg 处理
    pub fn extension(&self) -> &'static str {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("png") => ".png",
            Some("gif") => ".gif",
            Some("webp") => ".webp",
            _ => ".jpg",
        }
    }

    /// 列表展示用的标题：优先 title，其次第一个标签，最后用 ID
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or_else(|| self.tags.first().map(String::as_str))
            .unwrap_or(&self.id)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// 搜索参数结构体
/// 通用参数对所有来源生效，wallhaven 中的参数只有 Wallhaven 使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 页码，从 1 开始
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub nsfw: bool,
    /// 排序方式，各站取值不同（Wallhaven: date_added/random/toplist...；Nekos.moe: newest/likes/random...）
    #[serde(default)]
    pub sorting: Option<String>,
    /// 每页数量，未指定时使用各站默认值
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub wallhaven: WallhavenOptions,
}

fn first_page() -> u32 {
    1
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            tags: Vec::new(),
            page: first_page(),
            nsfw: false,
            sorting: None,
            limit: None,
            wallhaven: WallhavenOptions::default(),
        }
    }
}

/// 一页搜索结果
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub images: Vec<ImageRecord>,
    pub current_page: u32,
    pub last_page: u32,
    /// Wallhaven 随机排序的种子，翻页时带上以保持顺序一致
    pub seed: Option<String>,
}

impl SearchPage {
    /// 不支持分页的来源：当前页即最后一页
    pub fn single(images: Vec<ImageRecord>, page: u32) -> Self {
        Self {
            images,
            current_page: page,
            last_page: page,
            seed: None,
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.last_page
    }
}

/// 各来源支持的功能，`pixelvault sources` 会列出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFeatures {
    pub search: bool,
    pub pagination: bool,
    pub nsfw: bool,
    pub tags: bool,
    pub api_key: bool,
}

/// 图片源的抽象 Trait
/// 所有的图片站客户端都应该实现这个 Trait
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn features(&self) -> SourceFeatures;

    /// 搜索图片，返回统一的 ImageRecord 列表和分页信息
    async fn search(&self, options: &SearchOptions) -> Result<SearchPage>;

    /// 获取单张图片的完整信息（搜索结果里可能缺标签等字段）
    async fn details(&self, record: &ImageRecord) -> Result<ImageRecord> {
        Ok(record.clone())
    }

    /// 可用的标签或分类
    async fn tags(&self, nsfw: bool) -> Result<Vec<String>>;

    /// 校验 API Key；不需要 Key 的来源总是通过
    async fn verify_key(&self) -> Result<bool> {
        Ok(true)
    }
}

/// 创建共享的 HTTP 客户端（内部有连接池，所有来源和下载复用同一个）
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("PixelVault/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// 根据配置创建指定来源的客户端
pub fn from_config(
    kind: SourceKind,
    config: &AppConfig,
    client: reqwest::Client,
) -> Box<dyn ImageSource> {
    match kind {
        SourceKind::Wallhaven => Box::new(wallhaven::WallhavenClient::new(
            client,
            config.wallhaven_api_key.clone(),
        )),
        SourceKind::WaifuIm => Box::new(waifuim::WaifuImClient::new(
            client,
            config.waifuim_token.clone(),
        )),
        SourceKind::WaifuPics => Box::new(waifupics::WaifuPicsClient::new(client)),
        SourceKind::NekosMoe => Box::new(nekosmoe::NekosMoeClient::new(
            client,
            config.nekosmoe_token.clone(),
        )),
    }
}

/// 检查响应状态码，成功时返回响应体文本
pub(crate) async fn read_body(site: SourceKind, response: reqwest::Response) -> Result<String> {
    let status = response.status();
    match status.as_u16() {
        401 => Err(Error::InvalidApiKey(site)),
        429 => Err(Error::RateLimited(site)),
        code if !status.is_success() => Err(Error::Status { site, status: code }),
        _ => Ok(response.text().await?),
    }
}

/// 检查响应状态码并把响应体解析为 JSON
pub(crate) async fn read_json<T: DeserializeOwned>(
    site: SourceKind,
    response: reqwest::Response,
) -> Result<T> {
    let body = read_body(site, response).await?;
    decode(site, &body)
}

pub(crate) fn decode<T: DeserializeOwned>(site: SourceKind, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|reason| Error::Decode { site, reason })
}
