// wallhaven.rs — Wallhaven API 异步客户端模块
// 负责与 Wallhaven API v1 交互：搜索、详情、API Key 校验

use super::{ImageRecord, ImageSource, SearchOptions, SearchPage, SourceFeatures, SourceKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://wallhaven.cc/api/v1";

/// 仅 SFW 的纯净度开关
const PURITY_SFW: &str = "100";

/// 常用标签（Wallhaven 没有列出全部标签的接口）
const COMMON_TAGS: &[&str] = &[
    "landscape", "nature", "space", "city", "abstract", "dark", "sci-fi",
    "cyberpunk", "fantasy", "gaming", "car", "animal", "portrait", "sunset",
    "beach", "night", "water", "forest", "winter", "summer", "flowers",
    "architecture", "minimalism", "technology", "food", "music", "anime",
    "digital art",
];

/// Wallhaven 特有的搜索参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallhavenOptions {
    /// 分类开关 (general/anime/people)，如 "111"=全部, "100"=仅general
    pub categories: String,
    /// 纯净度开关 (sfw/sketchy/nsfw)，如 "100"=仅SFW
    pub purity: String,
    /// desc / asc
    pub order: String,
    /// 排行榜时间范围 (1d/3d/1w/1M/3M/6M/1y)，仅 sorting=toplist 时发送
    pub top_range: String,
    /// 最小分辨率，如 "1920x1080"
    #[serde(default)]
    pub atleast: Option<String>,
    #[serde(default)]
    pub resolutions: Vec<String>,
    /// 宽高比，如 "16x9"
    #[serde(default)]
    pub ratios: Vec<String>,
    /// 颜色（不带 # 的十六进制）
    #[serde(default)]
    pub colors: Option<String>,
    /// 随机排序的种子，仅 sorting=random 时发送
    #[serde(default)]
    pub seed: Option<String>,
}

impl Default for WallhavenOptions {
    fn default() -> Self {
        Self {
            categories: "111".to_string(),
            purity: PURITY_SFW.to_string(),
            order: "desc".to_string(),
            top_range: "1M".to_string(),
            atleast: None,
            resolutions: Vec::new(),
            ratios: Vec::new(),
            colors: None,
            seed: None,
        }
    }
}

/// Wallhaven API 搜索响应的顶层结构
#[derive(Deserialize, Debug)]
struct SearchResponse {
    data: Vec<Wallpaper>,
    #[serde(default)]
    meta: Option<Meta>,
}

/// 分页信息
#[derive(Deserialize, Debug)]
struct Meta {
    #[serde(default)]
    current_page: u32,
    #[serde(default)]
    last_page: u32,
    #[serde(default)]
    seed: Option<String>,
}

/// GET /w/{id} 的响应
#[derive(Deserialize, Debug)]
struct DetailResponse {
    data: Wallpaper,
}

/// 单张壁纸的数据结构
///
/// 只提取我们需要的字段，JSON 中多余的字段会被 serde 自动忽略
#[derive(Deserialize, Debug)]
struct Wallpaper {
    /// 壁纸唯一标识符（如 "94x38z"）
    id: String,
    /// 壁纸原图的直接下载 URL
    /// 格式如：https://w.wallhaven.cc/full/94/wallhaven-94x38z.jpg
    path: String,
    #[serde(default)]
    thumbs: Thumbs,
    #[serde(default)]
    dimension_x: u32,
    #[serde(default)]
    dimension_y: u32,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    purity: Option<String>,
    #[serde(default)]
    colors: Vec<String>,
    /// 作品出处，可能为空字符串
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    views: Option<u64>,
    #[serde(default)]
    favorites: Option<u64>,
    /// 搜索结果中没有标签，只有详情接口返回
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize, Debug, Default)]
struct Thumbs {
    #[serde(default)]
    large: String,
}

#[derive(Deserialize, Debug)]
struct Tag {
    name: String,
}

impl From<Wallpaper> for ImageRecord {
    fn from(w: Wallpaper) -> Self {
        let mut record = ImageRecord::new(SourceKind::Wallhaven, w.id, w.path);
        if !w.thumbs.large.is_empty() {
            record.thumbnail = w.thumbs.large;
        }
        record.width = w.dimension_x;
        record.height = w.dimension_y;
        record.nsfw = w.purity.as_deref() == Some("nsfw");
        record.category = w.category;
        record.purity = w.purity;
        record.colors = w.colors;
        record.page_url = w.source.filter(|s| !s.is_empty());
        record.file_size = w.file_size;
        record.created_at = w.created_at;
        record.views = w.views;
        record.favorites = w.favorites;
        record.tags = w.tags.into_iter().map(|t| t.name).collect();
        record.title = record.tags.first().cloned();
        record
    }
}

/// Wallhaven API 异步客户端
///
/// API Key 同时以 `X-API-Key` header 和 `apikey` 查询参数发送。
/// 没有 Key 时只能访问 SFW 内容。
pub struct WallhavenClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WallhavenClient {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: String::from(BASE_URL),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// 构建 GET 请求，自动附带 API Key
    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match self.api_key.as_deref() {
            Some(key) => request.header("X-API-Key", key).query(&[("apikey", key)]),
            None => request,
        }
    }

    /// 把通用搜索参数转换为 Wallhaven 的查询参数
    fn search_params(&self, options: &SearchOptions) -> Vec<(&'static str, String)> {
        let wh = &options.wallhaven;
        let sorting = options.sorting.as_deref().unwrap_or("date_added");

        // 没有 Key 时请求 Sketchy/NSFW 只会被服务端忽略，直接降级为 SFW
        let purity = if self.api_key.is_none() && wh.purity.get(1..).is_some_and(|p| p.contains('1')) {
            tracing::warn!(purity = %wh.purity, "sketchy/nsfw requested without an API key, falling back to SFW");
            PURITY_SFW.to_string()
        } else {
            wh.purity.clone()
        };

        // 只给了标签没给关键词时，用 "+tag" 语法组成查询
        let query = match options.query.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(q) => q.to_string(),
            None => options
                .tags
                .iter()
                .map(|tag| format!("+{tag}"))
                .collect::<Vec<_>>()
                .join(" "),
        };

        let mut params = vec![
            ("q", query),
            ("categories", wh.categories.clone()),
            ("purity", purity),
            ("sorting", sorting.to_string()),
            ("order", wh.order.clone()),
            ("page", options.page.max(1).to_string()),
        ];

        if sorting == "toplist" {
            params.push(("topRange", wh.top_range.clone()));
        }
        if sorting == "random" {
            if let Some(seed) = &wh.seed {
                params.push(("seed", seed.clone()));
            }
        }
        if let Some(atleast) = &wh.atleast {
            params.push(("atleast", atleast.clone()));
        }
        if !wh.resolutions.is_empty() {
            params.push(("resolutions", wh.resolutions.join(",")));
        }
        if !wh.ratios.is_empty() {
            params.push(("ratios", wh.ratios.join(",")));
        }
        if let Some(colors) = &wh.colors {
            params.push(("colors", colors.trim_start_matches('#').to_string()));
        }

        params
    }
}

fn parse_search(body: &str, requested_page: u32) -> Result<SearchPage> {
    let response: SearchResponse = super::decode(SourceKind::Wallhaven, body)?;
    let (current_page, last_page, seed) = match response.meta {
        Some(meta) => (meta.current_page.max(1), meta.last_page.max(1), meta.seed),
        None => (requested_page, requested_page, None),
    };
    Ok(SearchPage {
        images: response.data.into_iter().map(ImageRecord::from).collect(),
        current_page,
        last_page,
        seed,
    })
}

#[async_trait]
impl ImageSource for WallhavenClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Wallhaven
    }

    fn features(&self) -> SourceFeatures {
        SourceFeatures {
            search: true,
            pagination: true,
            nsfw: true,
            tags: true,
            api_key: true,
        }
    }

    async fn search(&self, options: &SearchOptions) -> Result<SearchPage> {
        let params = self.search_params(options);
        tracing::debug!(?params, "wallhaven search");

        let response = self.get("/search").query(&params).send().await?;
        let body = super::read_body(SourceKind::Wallhaven, response).await?;
        let page = parse_search(&body, options.page)?;

        if page.images.is_empty() && options.wallhaven.purity != PURITY_SFW {
            tracing::warn!("no results; if you expect NSFW content, check that your API key is valid");
        }
        Ok(page)
    }

    async fn details(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let response = self.get(&format!("/w/{}", record.id)).send().await?;
        let detail: DetailResponse = super::read_json(SourceKind::Wallhaven, response).await?;
        Ok(detail.data.into())
    }

    async fn tags(&self, _nsfw: bool) -> Result<Vec<String>> {
        Ok(COMMON_TAGS.iter().map(|t| t.to_string()).collect())
    }

    /// 通过需要鉴权的 GET /settings 校验 Key
    async fn verify_key(&self) -> Result<bool> {
        if self.api_key.is_none() {
            return Ok(false);
        }
        let response = self.get("/settings").send().await?;
        key_accepted(response).await
    }
}

/// /settings 的响应：401 表示 Key 无效，其余错误照常返回
async fn key_accepted(response: reqwest::Response) -> Result<bool> {
    match super::read_json::<serde_json::Value>(SourceKind::Wallhaven, response).await {
        Ok(_) => Ok(true),
        Err(Error::InvalidApiKey(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
