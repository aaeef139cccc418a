// waifupics.rs — Waifu.pics API 异步客户端模块
// 没有搜索和分页，只能按分类（category）随机取图

use super::{ImageRecord, ImageSource, SearchOptions, SearchPage, SourceFeatures, SourceKind};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.waifu.pics";

const DEFAULT_CATEGORY: &str = "waifu";

/// /many 失败时单张接口的最大请求次数
const SINGLE_FALLBACK_ATTEMPTS: usize = 10;

pub const SFW_CATEGORIES: &[&str] = &[
    "waifu", "neko", "shinobu", "megumin", "bully", "cuddle", "cry", "hug",
    "awoo", "kiss", "lick", "pat", "smug", "bonk", "yeet", "blush", "smile",
    "wave", "highfive", "handhold", "nom", "bite", "glomp", "slap", "kill",
    "kick", "happy", "wink", "poke", "dance", "cringe",
];

pub const NSFW_CATEGORIES: &[&str] = &["waifu", "neko", "trap", "blowjob"];

/// POST /many/{type}/{category} 的响应
#[derive(Deserialize, Debug)]
struct ManyResponse {
    #[serde(default)]
    files: Vec<String>,
}

/// GET /{type}/{category} 的响应
#[derive(Deserialize, Debug)]
struct SingleResponse {
    url: String,
}

/// Waifu.pics API 异步客户端
pub struct WaifuPicsClient {
    client: reqwest::Client,
    base_url: String,
}

/// 选择端点类型和分类：分类取第一个标签，不合法时退回 waifu
fn endpoint(options: &SearchOptions) -> (&'static str, String) {
    let type_path = if options.nsfw { "nsfw" } else { "sfw" };
    let valid = if options.nsfw { NSFW_CATEGORIES } else { SFW_CATEGORIES };
    let requested = options
        .tags
        .first()
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    if valid.contains(&requested.as_str()) {
        (type_path, requested)
    } else {
        tracing::warn!(category = %requested, endpoint = type_path, "invalid waifu.pics category, using 'waifu'");
        (type_path, DEFAULT_CATEGORY.to_string())
    }
}

/// 把图片 URL 转为记录：ID 取文件名
fn record_from_url(url: String, category: &str, nsfw: bool) -> ImageRecord {
    let id = url.rsplit('/').next().unwrap_or(&url).to_string();
    let mut record = ImageRecord::new(SourceKind::WaifuPics, id, url);
    record.title = Some(capitalize(category));
    record.category = Some(category.to_string());
    record.tags = vec![category.to_string()];
    record.nsfw = nsfw;
    record
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_many(body: &str, category: &str, nsfw: bool) -> Result<Vec<ImageRecord>> {
    let response: ManyResponse = super::decode(SourceKind::WaifuPics, body)?;
    Ok(response
        .files
        .into_iter()
        .filter(|url| !url.is_empty())
        .map(|url| record_from_url(url, category, nsfw))
        .collect())
}

impl WaifuPicsClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: String::from(BASE_URL),
        }
    }

    async fn many(&self, type_path: &str, category: &str) -> Result<Vec<ImageRecord>> {
        let url = format!("{}/many/{}/{}", self.base_url, type_path, category);
        tracing::debug!(%url, "waifu.pics many");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "exclude": [] }))
            .send()
            .await?;
        let body = super::read_body(SourceKind::WaifuPics, response).await?;
        parse_many(&body, category, type_path == "nsfw")
    }

    async fn single(&self, type_path: &str, category: &str) -> Result<ImageRecord> {
        let url = format!("{}/{}/{}", self.base_url, type_path, category);
        let response = self.client.get(&url).send().await?;
        let single: SingleResponse = super::read_json(SourceKind::WaifuPics, response).await?;
        Ok(record_from_url(single.url, category, type_path == "nsfw"))
    }
}

#[async_trait]
impl ImageSource for WaifuPicsClient {
    fn kind(&self) -> SourceKind {
        SourceKind::WaifuPics
    }

    fn features(&self) -> SourceFeatures {
        SourceFeatures {
            search: false,
            pagination: false,
            nsfw: true,
            tags: true,
            api_key: false,
        }
    }

    async fn search(&self, options: &SearchOptions) -> Result<SearchPage> {
        let (type_path, category) = endpoint(options);

        match self.many(type_path, &category).await {
            Ok(images) if !images.is_empty() => return Ok(SearchPage::single(images, options.page)),
            Ok(_) => tracing::warn!("waifu.pics /many returned no files, falling back to single requests"),
            Err(e) => tracing::warn!(error = %e, "waifu.pics /many failed, falling back to single requests"),
        }

        let mut images: Vec<ImageRecord> = Vec::new();
        for _ in 0..SINGLE_FALLBACK_ATTEMPTS {
            match self.single(type_path, &category).await {
                Ok(image) => {
                    if !images.iter().any(|existing| existing.id == image.id) {
                        images.push(image);
                    }
                }
                // 已经拿到部分结果时，出错就停止，返回已有的
                Err(e) if images.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "waifu.pics single request failed");
                    break;
                }
            }
        }
        Ok(SearchPage::single(images, options.page))
    }

    async fn tags(&self, nsfw: bool) -> Result<Vec<String>> {
        let categories = if nsfw { NSFW_CATEGORIES } else { SFW_CATEGORIES };
        Ok(categories.iter().map(|c| c.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_response_maps_files_to_records() {
        let body = r#"{"files": ["https://i.waifu.pics/AbC123.jpg", "https://i.waifu.pics/zz9.gif"]}"#;
        let images = parse_many(body, "neko", false).unwrap();
        assert_eq!(images.len(), 2);

        let first = &images[0];
        assert_eq!(first.id, "AbC123.jpg");
        assert_eq!(first.url, "https://i.waifu.pics/AbC123.jpg");
        assert_eq!(first.thumbnail, first.url);
        assert_eq!(first.source, SourceKind::WaifuPics);
        assert_eq!(first.tags, vec!["neko"]);
        assert_eq!(first.category.as_deref(), Some("neko"));
        assert_eq!(first.title.as_deref(), Some("Neko"));
        assert_eq!((first.width, first.height), (0, 0));
        assert_eq!(images[1].extension(), ".gif");
    }

    #[test]
    fn invalid_category_falls_back_to_waifu() {
        let options = SearchOptions {
            tags: vec!["shinobu".into()],
            nsfw: true,
            ..SearchOptions::default()
        };
        assert_eq!(endpoint(&options), ("nsfw", "waifu".to_string()));

        let options = SearchOptions {
            nsfw: false,
            ..options
        };
        assert_eq!(endpoint(&options), ("sfw", "shinobu".to_string()));
    }

    #[test]
    fn no_tag_uses_default_category() {
        assert_eq!(endpoint(&SearchOptions::default()), ("sfw", "waifu".to_string()));
    }
}
