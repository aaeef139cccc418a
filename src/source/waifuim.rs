// waifuim.rs — Waifu.im API (v6) 异步客户端模块
//
// 注意：Waifu.im 的 many 参数经常只返回少量图片，
// 所以未指定标签时会依次请求几组常见标签并合并去重。

use super::{ImageRecord, ImageSource, SearchOptions, SearchPage, SourceFeatures, SourceKind};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.waifu.im";
const API_VERSION: &str = "v6";

/// 单次请求的最大数量（API 限制）
const MAX_LIMIT: u32 = 30;

/// 未指定标签时轮流尝试的标签组合，空组合即不限标签
const TAG_COMBINATIONS: &[&[&str]] = &[
    &["waifu"],
    &["maid"],
    &["uniform"],
    &["waifu", "maid"],
    &["raiden-shogun"],
    &["marin-kitagawa"],
    &[],
];

/// 合并多组结果时的目标数量
const COMBINED_TARGET: usize = 20;

/// GET /search 的响应
#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Deserialize, Debug)]
struct Image {
    image_id: u64,
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    dominant_color: Option<String>,
    /// 作品出处
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    is_nsfw: bool,
    #[serde(default)]
    byte_size: Option<u64>,
    #[serde(default)]
    uploaded_at: Option<String>,
    #[serde(default)]
    favorites: Option<u64>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize, Debug)]
struct Tag {
    name: String,
}

/// GET /tags 的响应
#[derive(Deserialize, Debug)]
struct TagsResponse {
    #[serde(default)]
    versatile: Vec<String>,
    #[serde(default)]
    nsfw: Vec<String>,
}

impl From<Image> for ImageRecord {
    fn from(image: Image) -> Self {
        // preview_url 指向网页而不是图片，缩略图直接用原图
        let mut record = ImageRecord::new(SourceKind::WaifuIm, image.image_id.to_string(), image.url);
        record.width = image.width;
        record.height = image.height;
        record.colors = image.dominant_color.into_iter().collect();
        record.page_url = image.source.filter(|s| !s.is_empty());
        record.nsfw = image.is_nsfw;
        record.file_size = image.byte_size;
        record.created_at = image.uploaded_at;
        record.favorites = image.favorites;
        record.tags = image.tags.into_iter().map(|t| t.name).collect();
        record.title = record.tags.first().cloned();
        record
    }
}

fn parse_search(body: &str) -> Result<Vec<ImageRecord>> {
    let response: SearchResponse = super::decode(SourceKind::WaifuIm, body)?;
    Ok(response.images.into_iter().map(ImageRecord::from).collect())
}

/// Waifu.im API 异步客户端
pub struct WaifuImClient {
    client: reqwest::Client,
    base_url: String,
    /// 可选的访问令牌，以 Bearer 形式发送
    token: Option<String>,
}

impl WaifuImClient {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: String::from(BASE_URL),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("Accept-Version", API_VERSION);
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 按一组标签请求一次 /search
    async fn fetch(&self, tags: &[&str], nsfw: bool, limit: u32) -> Result<Vec<ImageRecord>> {
        let mut params: Vec<(&str, String)> = tags
            .iter()
            .map(|tag| ("included_tags", tag.to_string()))
            .collect();
        params.push(("is_nsfw", nsfw.to_string()));
        params.push(("gif", "false".to_string()));
        params.push(("limit", limit.to_string()));

        tracing::debug!(?params, "waifu.im search");
        let response = self.get("/search").query(&params).send().await?;
        let body = super::read_body(SourceKind::WaifuIm, response).await?;
        parse_search(&body)
    }
}

/// 把新结果追加到已有结果中，跳过重复 ID
fn merge_unique(all: &mut Vec<ImageRecord>, batch: Vec<ImageRecord>) {
    for image in batch {
        if !all.iter().any(|existing| existing.id == image.id) {
            all.push(image);
        }
    }
}

#[async_trait]
impl ImageSource for WaifuImClient {
    fn kind(&self) -> SourceKind {
        SourceKind::WaifuIm
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
        let limit = options.limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT);

        if !options.tags.is_empty() {
            let tags: Vec<&str> = options.tags.iter().map(String::as_str).collect();
            let images = self.fetch(&tags, options.nsfw, limit).await?;
            return Ok(SearchPage::single(images, options.page));
        }

        let mut images = Vec::new();
        let mut last_error = None;
        for tags in TAG_COMBINATIONS {
            match self.fetch(tags, options.nsfw, 10).await {
                Ok(batch) => merge_unique(&mut images, batch),
                Err(e) => {
                    tracing::warn!(?tags, error = %e, "waifu.im request failed, trying next tag set");
                    last_error = Some(e);
                }
            }
            if images.len() >= COMBINED_TARGET {
                break;
            }
        }

        match last_error {
            Some(e) if images.is_empty() => Err(e),
            _ => Ok(SearchPage::single(images, options.page)),
        }
    }

    async fn tags(&self, nsfw: bool) -> Result<Vec<String>> {
        let response = self.get("/tags").send().await?;
        let tags: TagsResponse = super::read_json(SourceKind::WaifuIm, response).await?;
        let mut all = tags.versatile;
        if nsfw {
            all.extend(tags.nsfw);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r##"{
        "images": [{
            "signature": "2f0b85e9d6ab8b3a",
            "extension": ".png",
            "image_id": 8108,
            "favorites": 12,
            "dominant_color": "#a39e98",
            "source": "https://www.pixiv.net/en/artworks/12345",
            "artist": null,
            "uploaded_at": "2021-11-02T11:16:19.048684+00:00",
            "liked_at": null,
            "is_nsfw": false,
            "width": 2508,
            "height": 3541,
            "byte_size": 4473627,
            "url": "https://cdn.waifu.im/8108.png",
            "preview_url": "https://www.waifu.im/preview/8108/",
            "tags": [
                {"tag_id": 12, "name": "waifu", "description": "A female anime/manga character.", "is_nsfw": false},
                {"tag_id": 5, "name": "maid", "description": "Cute womans or girl employed to do domestic work.", "is_nsfw": false}
            ]
        }]
    }"##;

    #[test]
    fn search_response_maps_every_field() {
        let images = parse_search(FIXTURE).unwrap();
        assert_eq!(images.len(), 1);
        let image = &images[0];
        assert_eq!(image.id, "8108");
        assert_eq!(image.url, "https://cdn.waifu.im/8108.png");
        assert_eq!(image.thumbnail, image.url);
        assert_eq!(image.source, SourceKind::WaifuIm);
        assert_eq!((image.width, image.height), (2508, 3541));
        assert_eq!(image.colors, vec!["#a39e98"]);
        assert_eq!(image.page_url.as_deref(), Some("https://www.pixiv.net/en/artworks/12345"));
        assert_eq!(image.file_size, Some(4473627));
        assert_eq!(image.favorites, Some(12));
        assert_eq!(image.tags, vec!["waifu", "maid"]);
        assert_eq!(image.title.as_deref(), Some("waifu"));
        assert_eq!(image.extension(), ".png");
        assert!(!image.nsfw);
    }

    #[test]
    fn merge_skips_duplicate_ids() {
        let mut all = parse_search(FIXTURE).unwrap();
        merge_unique(&mut all, parse_search(FIXTURE).unwrap());
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn tags_response_splits_versatile_and_nsfw() {
        let tags: TagsResponse =
            super::super::decode(SourceKind::WaifuIm, r#"{"versatile": ["maid", "waifu"], "nsfw": ["ero"]}"#).unwrap();
        assert_eq!(tags.versatile, vec!["maid", "waifu"]);
        assert_eq!(tags.nsfw, vec!["ero"]);
    }
}
