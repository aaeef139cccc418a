// store.rs — 本地数据存储模块
// 收藏、历史记录和当前会话都以 JSON 文件保存在 ~/.local/share/pixelvault/ 下

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::source::{ImageRecord, SearchOptions, SearchPage, SourceKind};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 收藏或历史中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(flatten)]
    pub image: ImageRecord,
    pub added_at: DateTime<Utc>,
}

impl Entry {
    /// 同一张图：先比较来源 + ID，再比较原图 URL
    fn is_same(&self, record: &ImageRecord) -> bool {
        (self.image.source == record.source && self.image.id == record.id)
            || (!record.url.is_empty() && self.image.url == record.url)
    }
}

/// 收藏夹 / 历史记录
///
/// 最新的记录排在最前面，同一张图只保留一条。
/// 设置了 `limit` 时超出部分从末尾丢弃。
#[derive(Debug)]
pub struct Collection {
    path: PathBuf,
    limit: Option<usize>,
    entries: Vec<Entry>,
}

impl Collection {
    /// 读取 JSON 文件，文件不存在时得到空集合
    pub fn load(path: impl Into<PathBuf>, limit: Option<usize>) -> Result<Self> {
        let path = path.into();
        let entries: Vec<Entry> = read_json_or_default(&path)?;
        let mut collection = Self {
            path,
            limit,
            entries: Vec::with_capacity(entries.len()),
        };
        // 旧文件里可能有重复项，加载时顺手去重
        for entry in entries {
            if !collection.entries.iter().any(|e| e.is_same(&entry.image)) {
                collection.entries.push(entry);
            }
        }
        collection.truncate();
        Ok(collection)
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    /// 加入集合，已存在时返回 false 且不改变集合
    pub fn add(&mut self, record: &ImageRecord) -> bool {
        if self.contains(record) {
            return false;
        }
        self.entries.insert(0, entry_now(record));
        self.truncate();
        true
    }

    /// 记录一次访问：已存在则移到最前面并更新时间
    pub fn touch(&mut self, record: &ImageRecord) {
        self.entries.retain(|e| !e.is_same(record));
        self.entries.insert(0, entry_now(record));
        self.truncate();
    }

    /// 移除，不存在时返回 false
    pub fn remove(&mut self, record: &ImageRecord) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_same(record));
        self.entries.len() != before
    }

    /// 切换收藏状态，返回切换后是否在集合中
    pub fn toggle(&mut self, record: &ImageRecord) -> bool {
        if self.remove(record) {
            false
        } else {
            self.add(record)
        }
    }

    pub fn contains(&self, record: &ImageRecord) -> bool {
        self.entries.iter().any(|e| e.is_same(record))
    }

    /// 按图片 ID 或 "来源:ID" 查找
    pub fn find(&self, reference: &str) -> Option<&ImageRecord> {
        self.entries
            .iter()
            .map(|e| &e.image)
            .find(|image| image.key() == reference || image.id == reference)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn truncate(&mut self) {
        if let Some(limit) = self.limit {
            self.entries.truncate(limit);
        }
    }
}

fn entry_now(record: &ImageRecord) -> Entry {
    Entry {
        image: record.clone(),
        added_at: Utc::now(),
    }
}

/// 最近一次查询的参数和结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub source: SourceKind,
    pub options: SearchOptions,
    /// 本地高级过滤条件（原始字符串）
    #[serde(default)]
    pub filter: Option<String>,
    /// 过滤条件里的普通搜索词已经作为服务端关键词发出
    #[serde(default)]
    pub text_as_query: bool,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub last_page: u32,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

impl Session {
    /// 读取会话文件，不存在时返回空会话
    pub fn load(path: &Path) -> Result<Self> {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// 新的查询替换整个会话
    pub fn replace(
        &mut self,
        source: SourceKind,
        options: SearchOptions,
        filter: Option<String>,
        page: SearchPage,
    ) {
        self.source = source;
        self.options = options;
        self.filter = filter;
        self.text_as_query = false;
        self.images.clear();
        self.append(page);
    }

    /// 追加下一页，按来源 + ID 去重；返回新增数量
    pub fn append(&mut self, page: SearchPage) -> usize {
        self.current_page = page.current_page;
        self.last_page = page.last_page;
        if page.seed.is_some() {
            self.options.wallhaven.seed = page.seed;
        }
        let before = self.images.len();
        for image in page.images {
            if !self.images.iter().any(|i| i.key() == image.key()) {
                self.images.push(image);
            }
        }
        self.images.len() - before
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.last_page
    }

    /// 解析图片引用：从 1 开始的序号，或图片 ID / "来源:ID"
    pub fn resolve(&self, reference: &str) -> Result<&ImageRecord> {
        let by_index = reference
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.images.get(i));
        by_index
            .or_else(|| {
                self.images
                    .iter()
                    .find(|image| image.id == reference || image.key() == reference)
            })
            .ok_or_else(|| Error::UnknownImage(reference.to_string()))
    }

    /// 在本地生效的过滤器；搜索词交给服务端时只保留带键的条件
    pub fn local_filter(&self) -> Filter {
        let filter = Filter::parse(self.filter.as_deref().unwrap_or_default());
        if self.text_as_query { filter.without_text() } else { filter }
    }

    /// 通过过滤的图片
    pub fn visible(&self) -> Vec<&ImageRecord> {
        self.local_filter().apply(&self.images)
    }

    /// 从通过过滤的图片中随机选一张
    pub fn pick_random<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Result<&ImageRecord> {
        use rand::seq::SliceRandom;
        self.visible()
            .choose(rng)
            .copied()
            .ok_or(Error::NoMatchingImage)
    }

    /// 用详情接口返回的完整记录替换会话中的同一张图
    pub fn update(&mut self, record: &ImageRecord) {
        if let Some(existing) = self.images.iter_mut().find(|i| i.key() == record.key()) {
            *existing = record.clone();
        }
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(T::default()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// 先写临时文件再重命名，避免写到一半时损坏原文件
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(source: SourceKind, id: &str) -> ImageRecord {
        ImageRecord::new(source, id, format!("https://img.example/{id}.jpg"))
    }

    fn keys(collection: &Collection) -> Vec<String> {
        collection.entries().iter().map(|e| e.image.key()).collect()
    }

    #[test]
    fn add_then_remove_leaves_favorites_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut favorites = Collection::load(dir.path().join("favorites.json"), None).unwrap();
        favorites.add(&image(SourceKind::Wallhaven, "a"));
        favorites.add(&image(SourceKind::WaifuIm, "b"));
        let before = keys(&favorites);

        let extra = image(SourceKind::NekosMoe, "c");
        assert!(favorites.add(&extra));
        assert!(favorites.remove(&extra));
        assert_eq!(keys(&favorites), before);
    }

    #[test]
    fn favorites_hold_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut favorites = Collection::load(dir.path().join("favorites.json"), None).unwrap();
        let a = image(SourceKind::Wallhaven, "a");
        assert!(favorites.add(&a));
        assert!(!favorites.add(&a));

        // ID 不同但 URL 相同也算同一张
        let mut same_url = image(SourceKind::Wallhaven, "other");
        same_url.url = a.url.clone();
        assert!(!favorites.add(&same_url));
        assert_eq!(favorites.len(), 1);
    }

    #[test]
    fn same_id_from_different_sources_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let mut favorites = Collection::load(dir.path().join("favorites.json"), None).unwrap();
        let mut a = image(SourceKind::WaifuIm, "42");
        let mut b = image(SourceKind::NekosMoe, "42");
        a.url = "https://cdn.waifu.im/42.png".into();
        b.url = "https://nekos.moe/image/42.jpg".into();
        assert!(favorites.add(&a));
        assert!(favorites.add(&b));
        assert_eq!(favorites.len(), 2);
        assert_eq!(favorites.find("nekos_moe:42").map(|i| i.source), Some(SourceKind::NekosMoe));
    }

    #[test]
    fn toggle_flips_membership() {
        let dir = tempfile::tempdir().unwrap();
        let mut favorites = Collection::load(dir.path().join("favorites.json"), None).unwrap();
        let a = image(SourceKind::Wallhaven, "a");
        assert!(favorites.toggle(&a));
        assert!(favorites.contains(&a));
        assert!(!favorites.toggle(&a));
        assert!(favorites.is_empty());
    }

    #[test]
    fn saved_collection_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("favorites.json");
        let mut favorites = Collection::load(&path, None).unwrap();
        let mut a = image(SourceKind::Wallhaven, "a");
        a.tags = vec!["nature".into()];
        a.width = 1920;
        favorites.add(&a);
        favorites.save().unwrap();

        let loaded = Collection::load(&path, None).unwrap();
        assert_eq!(loaded.entries(), favorites.entries());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn history_is_most_recent_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = Collection::load(dir.path().join("history.json"), Some(3)).unwrap();
        for id in ["a", "b", "c", "d"] {
            history.touch(&image(SourceKind::Wallhaven, id));
        }
        assert_eq!(keys(&history), vec!["wallhaven:d", "wallhaven:c", "wallhaven:b"]);

        history.touch(&image(SourceKind::Wallhaven, "b"));
        assert_eq!(keys(&history), vec!["wallhaven:b", "wallhaven:d", "wallhaven:c"]);
    }

    #[test]
    fn missing_or_empty_file_is_an_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        assert!(Collection::load(&path, None).unwrap().is_empty());
        fs::write(&path, "").unwrap();
        assert!(Collection::load(&path, None).unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favorites.json");
        fs::write(&path, "[{").unwrap();
        assert!(matches!(Collection::load(&path, None), Err(Error::Json(_))));
    }

    fn page(ids: &[&str], current: u32, last: u32) -> SearchPage {
        SearchPage {
            images: ids.iter().map(|id| image(SourceKind::Wallhaven, id)).collect(),
            current_page: current,
            last_page: last,
            seed: None,
        }
    }

    #[test]
    fn session_appends_without_duplicates() {
        let mut session = Session::default();
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), None, page(&["a", "b"], 1, 3));
        assert!(session.has_next_page());
        assert_eq!(session.append(page(&["b", "c"], 2, 3)), 1);
        assert_eq!(session.images.len(), 3);
        assert_eq!(session.current_page, 2);

        session.replace(SourceKind::Wallhaven, SearchOptions::default(), None, page(&["z"], 1, 1));
        assert_eq!(session.images.len(), 1);
        assert!(!session.has_next_page());
    }

    #[test]
    fn session_resolves_index_and_id() {
        let mut session = Session::default();
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), None, page(&["abc", "def"], 1, 1));
        assert_eq!(session.resolve("1").unwrap().id, "abc");
        assert_eq!(session.resolve("def").unwrap().id, "def");
        assert_eq!(session.resolve("wallhaven:abc").unwrap().id, "abc");
        assert!(matches!(session.resolve("0"), Err(Error::UnknownImage(_))));
        assert!(matches!(session.resolve("3"), Err(Error::UnknownImage(_))));
        assert!(matches!(session.resolve("nope"), Err(Error::UnknownImage(_))));
    }

    #[test]
    fn session_keeps_random_seed_for_next_page() {
        let mut session = Session::default();
        let mut first = page(&["a"], 1, 5);
        first.seed = Some("Xy12Ab".into());
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), None, first);
        assert_eq!(session.options.wallhaven.seed.as_deref(), Some("Xy12Ab"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), session);
    }

    fn wallhaven_search_page() -> SearchPage {
        // /search 返回的记录只有尺寸，没有标题和标签
        let mut big = image(SourceKind::Wallhaven, "k7q9e1");
        big.width = 3840;
        big.height = 2160;
        let mut small = image(SourceKind::Wallhaven, "p8z2l3");
        small.width = 1280;
        small.height = 720;
        SearchPage { images: vec![big, small], current_page: 1, last_page: 1, seed: None }
    }

    #[test]
    fn text_sent_as_query_is_not_matched_again() {
        let mut session = Session::default();
        let filter = Some("sunset width:>1920".to_string());
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), filter, wallhaven_search_page());

        assert!(session.visible().is_empty());

        session.text_as_query = true;
        let ids: Vec<&str> = session.visible().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["k7q9e1"]);
    }

    #[test]
    fn replacing_the_session_resets_text_as_query() {
        let mut session = Session::default();
        session.text_as_query = true;
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), None, page(&["a"], 1, 1));
        assert!(!session.text_as_query);
    }

    #[test]
    fn random_pick_only_draws_visible_images() {
        let mut session = Session::default();
        let filter = Some("width:>1920".to_string());
        session.replace(SourceKind::Wallhaven, SearchOptions::default(), filter, wallhaven_search_page());
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            assert_eq!(session.pick_random(&mut rng).unwrap().id, "k7q9e1");
        }

        session.filter = Some("width:>8000".into());
        assert!(matches!(session.pick_random(&mut rng), Err(Error::NoMatchingImage)));
    }
}
