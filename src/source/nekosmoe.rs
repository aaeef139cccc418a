// nekosmoe.rs — Nekos.moe API 异步客户端模块
// 搜索接口是 POST + JSON body；图片地址由 ID 拼出，不在响应里

use super::{ImageRecord, ImageSource, SearchOptions, SearchPage, SourceFeatures, SourceKind};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://nekos.moe/api/v1";
const IMAGE_HOST: &str = "https://nekos.moe";

const DEFAULT_LIMIT: u32 = 20;
/// 搜索接口单页上限
const MAX_SEARCH_LIMIT: u32 = 50;
/// 随机接口单次上限
const MAX_RANDOM_COUNT: u32 = 100;

/// Nekos.moe 没有标签列表接口，使用常见标签
const COMMON_TAGS: &[&str] = &[
    "neko", "cat ears", "catgirl", "kemonomimi", "animal ears", "tail",
    "fox girl", "maid", "cute", "blush", "smile", "long hair", "short hair",
    "twintails", "ponytail", "blonde hair", "brown hair", "black hair",
    "white hair", "pink hair", "blue eyes", "green eyes", "red eyes",
    "school uniform", "dress", "thighhighs", "glasses", "fang",
];

/// POST /images/search 的请求体
#[derive(Serialize, Debug)]
struct SearchBody<'a> {
    nsfw: bool,
    sort: &'a str,
    skip: u32,
    limit: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<&'a str>,
}

/// 搜索和随机接口共用的响应
#[derive(Deserialize, Debug)]
struct ImagesResponse {
    #[serde(default)]
    images: Vec<Image>,
}

/// GET /images/{id} 的响应
#[derive(Deserialize, Debug)]
struct ImageResponse {
    image: Image,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Image {
    id: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    nsfw: bool,
    #[serde(default)]
    likes: Option<u64>,
    #[serde(default)]
    favorites: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<Image> for ImageRecord {
    fn from(image: Image) -> Self {
        let url = format!("{IMAGE_HOST}/image/{}.jpg", image.id);
        let mut record = ImageRecord::new(SourceKind::NekosMoe, image.id, url);
        record.thumbnail = format!("{IMAGE_HOST}/thumbnail/{}.jpg", record.id);
        record.page_url = Some(format!("{IMAGE_HOST}/post/{}", record.id));
        record.title = image.artist.filter(|a| !a.is_empty());
        record.tags = image.tags;
        record.nsfw = image.nsfw;
        record.favorites = image.favorites.or(image.likes);
        record.created_at = image.created_at;
        record
    }
}

fn parse_images(body: &str) -> Result<Vec<ImageRecord>> {
    let response: ImagesResponse = super::decode(SourceKind::NekosMoe, body)?;
    Ok(response.images.into_iter().map(ImageRecord::from).collect())
}

/// 把通用排序名映射为 Nekos.moe 的 sort 取值；None 表示走随机接口
/// 第 page 页之前要跳过的条数，页码过大时停在 u32::MAX
fn skip_for(page: u32, limit: u32) -> u32 {
    page.saturating_sub(1).saturating_mul(limit)
}

fn sort_mode(sorting: Option<&str>) -> Option<&'static str> {
    match sorting {
        Some("random") => None,
        Some("likes") | Some("favorites") => Some("likes"),
        Some("oldest") => Some("oldest"),
        Some("relevance") => Some("relevance"),
        _ => Some("newest"),
    }
}

/// Nekos.moe API 异步客户端
pub struct NekosMoeClient {
    client: reqwest::Client,
    base_url: String,
    /// 可选令牌，原样放在 Authorization header 中
    token: Option<String>,
}

impl NekosMoeClient {
    pub fn new(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: String::from(BASE_URL),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }

    async fn random(&self, count: u32, nsfw: bool) -> Result<Vec<ImageRecord>> {
        let mut params = vec![("count", count.clamp(1, MAX_RANDOM_COUNT).to_string())];
        if nsfw {
            params.push(("nsfw", "true".to_string()));
        }
        let request = self
            .client
            .get(format!("{}/random/image", self.base_url))
            .query(&params);
        let response = self.authorize(request).send().await?;
        let body = super::read_body(SourceKind::NekosMoe, response).await?;
        parse_images(&body)
    }
}

#[async_trait]
impl ImageSource for NekosMoeClient {
    fn kind(&self) -> SourceKind {
        SourceKind::NekosMoe
    }

    fn features(&self) -> SourceFeatures {
        SourceFeatures {
            search: true,
            pagination: true,
            nsfw: true,
            tags: true,
            api_key: false,
        }
    }

    async fn search(&self, options: &SearchOptions) -> Result<SearchPage> {
        let page = options.page.max(1);

        let Some(sort) = sort_mode(options.sorting.as_deref()) else {
            let count = options.limit.unwrap_or(DEFAULT_LIMIT);
            let images = self.random(count, options.nsfw).await?;
            return Ok(SearchPage::single(images, page));
        };

        let limit = options.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
        let body = SearchBody {
            nsfw: options.nsfw,
            sort,
            skip: skip_for(page, limit),
            limit,
            tags: &options.tags,
            artist: options.query.as_deref().filter(|q| !q.trim().is_empty()),
        };
        tracing::debug!(?body, "nekos.moe search");

        let request = self
            .client
            .post(format!("{}/images/search", self.base_url))
            .json(&body);
        let response = self.authorize(request).send().await?;
        let text = super::read_body(SourceKind::NekosMoe, response).await?;
        let images = parse_images(&text)?;

        // 接口不返回总页数：拿满一页就认为还有下一页
        let last_page = if images.len() as u32 >= limit { page + 1 } else { page };
        Ok(SearchPage {
            images,
            current_page: page,
            last_page,
            seed: None,
        })
    }

    async fn details(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let request = self
            .client
            .get(format!("{}/images/{}", self.base_url, record.id));
        let response = self.authorize(request).send().await?;
        let detail: ImageResponse = super::read_json(SourceKind::NekosMoe, response).await?;
        Ok(detail.image.into())
    }

    async fn tags(&self, _nsfw: bool) -> Result<Vec<String>> {
        Ok(COMMON_TAGS.iter().map(|t| t.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "images": [{
            "id": "B1x2y3Z",
            "originalHash": "6e0c0c6d2c1b",
            "uploader": {"id": "u1", "username": "uploader"},
            "approver": {"id": "u2", "username": "mod"},
            "nsfw": false,
            "artist": "someartist",
            "tags": ["catgirl", "blue eyes"],
            "comments": [],
            "createdAt": "2018-05-20T12:00:00.000Z",
            "likes": 40,
            "favorites": 25
        }]
    }"#;

    #[test]
    fn search_response_maps_every_field() {
        let images = parse_images(FIXTURE).unwrap();
        let image = &images[0];
        assert_eq!(image.id, "B1x2y3Z");
        assert_eq!(image.url, "https://nekos.moe/image/B1x2y3Z.jpg");
        assert_eq!(image.thumbnail, "https://nekos.moe/thumbnail/B1x2y3Z.jpg");
        assert_eq!(image.page_url.as_deref(), Some("https://nekos.moe/post/B1x2y3Z"));
        assert_eq!(image.source, SourceKind::NekosMoe);
        assert_eq!(image.title.as_deref(), Some("someartist"));
        assert_eq!(image.tags, vec!["catgirl", "blue eyes"]);
        assert_eq!(image.favorites, Some(25));
        assert_eq!(image.created_at.as_deref(), Some("2018-05-20T12:00:00.000Z"));
        assert!(!image.nsfw);
        assert!(!image.has_dimensions());
    }

    #[test]
    fn search_body_omits_empty_fields() {
        let body = SearchBody {
            nsfw: false,
            sort: "newest",
            skip: 20,
            limit: 20,
            tags: &[],
            artist: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"nsfw": false, "sort": "newest", "skip": 20, "limit": 20}));
    }

    #[test]
    fn sorting_names_are_mapped() {
        assert_eq!(sort_mode(None), Some("newest"));
        assert_eq!(sort_mode(Some("date_added")), Some("newest"));
        assert_eq!(sort_mode(Some("favorites")), Some("likes"));
        assert_eq!(sort_mode(Some("random")), None);
    }

    #[test]
    fn skip_counts_whole_pages_and_saturates() {
        assert_eq!(skip_for(1, 20), 0);
        assert_eq!(skip_for(3, 20), 40);
        assert_eq!(skip_for(0, 20), 0);
        assert_eq!(skip_for(u32::MAX, 50), u32::MAX);
    }
}
