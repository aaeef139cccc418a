// config.rs — 配置管理模块
// 遵循 Unix 风格：优先从 ~/.config/pixelvault/config.toml 读取配置，
// 数据文件放在 ~/.local/share/pixelvault/，缓存放在 ~/.cache/pixelvault/

use crate::error::{Error, Result};
use crate::source::{SearchOptions, SourceKind, WallhavenOptions};
use rust_i18n::t;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "pixelvault";

/// `config set` 支持的键
pub const KEYS: &[&str] = &[
    "download_dir",
    "filename_format",
    "organize_by_source",
    "auto_download",
    "show_auto_download_notification",
    "default_source",
    "nsfw",
    "timeout_secs",
    "history_limit",
    "wallhaven.api_key",
    "wallhaven.categories",
    "wallhaven.purity",
    "wallhaven.sorting",
    "wallhaven.order",
    "wallhaven.top_range",
    "waifuim.token",
    "nekosmoe.token",
];

/// 映射 config.toml 文件内容的嵌套结构体
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
struct ConfigFile {
    #[serde(default)]
    common: CommonConfig,
    #[serde(default)]
    source: SourceConfigs,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
struct CommonConfig {
    /// 图片下载目录 (支持 ~、$HOME 等环境变量，相对路径则相对于 $HOME)
    /// 不配置则默认为 ~/Pictures/Pixelvault
    #[serde(default)]
    download_dir: Option<String>,
    /// 文件名格式: original / source_id / date_id，
    /// 或包含 {id} {source} {date} {width} {height} {title} 的模板
    #[serde(default = "default_filename_format")]
    filename_format: String,
    /// 按来源分子目录保存
    #[serde(default = "enabled")]
    organize_by_source: bool,
    /// 打开图片时自动下载
    #[serde(default)]
    auto_download: bool,
    /// 自动下载后打印保存位置
    #[serde(default = "enabled")]
    show_auto_download_notification: bool,
    /// 默认图片来源
    #[serde(default)]
    default_source: SourceKind,
    /// 是否请求 NSFW 内容
    #[serde(default)]
    nsfw: bool,
    /// HTTP 请求超时（秒）
    #[serde(default = "default_timeout")]
    timeout_secs: u64,
    /// 历史记录最多保留的条数
    #[serde(default = "default_history_limit")]
    history_limit: usize,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            filename_format: default_filename_format(),
            organize_by_source: true,
            auto_download: false,
            show_auto_download_notification: true,
            default_source: SourceKind::default(),
            nsfw: false,
            timeout_secs: default_timeout(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_filename_format() -> String {
    "original".to_string()
}
fn enabled() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_history_limit() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
struct SourceConfigs {
    #[serde(default)]
    wallhaven: WallhavenConfig,
    #[serde(default)]
    waifuim: TokenConfig,
    #[serde(default)]
    nekosmoe: TokenConfig,
}

/// Wallhaven 的 API Key 和默认搜索参数
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct WallhavenConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// 分类开关 (general/anime/people)，如 "111"=全部
    #[serde(default = "default_categories")]
    pub categories: String,
    /// 纯净度开关 (sfw/sketchy/nsfw)，如 "100"=仅SFW
    #[serde(default = "default_purity")]
    pub purity: String,
    /// 排序方式 (date_added/relevance/random/views/favorites/toplist)
    #[serde(default = "default_sorting")]
    pub sorting: String,
    #[serde(default = "default_order")]
    pub order: String,
    /// 排行榜时间范围 (1d/3d/1w/1M/3M/6M/1y)
    #[serde(default = "default_top_range")]
    pub top_range: String,
}

impl Default for WallhavenConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            categories: default_categories(),
            purity: default_purity(),
            sorting: default_sorting(),
            order: default_order(),
            top_range: default_top_range(),
        }
    }
}

fn default_categories() -> String {
    "111".to_string()
}
fn default_purity() -> String {
    "100".to_string()
}
fn default_sorting() -> String {
    "date_added".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}
fn default_top_range() -> String {
    "1M".to_string()
}

/// 只需要一个可选令牌的来源
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, JsonSchema)]
struct TokenConfig {
    #[serde(default)]
    token: Option<String>,
}

/// 应用全局配置项
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Wallhaven API Key (优先级：ENV > TOML)
    pub wallhaven_api_key: Option<String>,
    /// Waifu.im 令牌 (优先级：ENV > TOML)
    pub waifuim_token: Option<String>,
    /// Nekos.moe 令牌 (优先级：ENV > TOML)
    pub nekosmoe_token: Option<String>,
    pub download_dir: PathBuf,
    pub filename_format: String,
    pub organize_by_source: bool,
    pub auto_download: bool,
    pub show_auto_download_notification: bool,
    pub default_source: SourceKind,
    pub nsfw: bool,
    pub timeout: Duration,
    pub history_limit: usize,
    /// Wallhaven 默认搜索参数
    pub wallhaven: WallhavenConfig,
    /// 配置文件所在路径
    pub config_path: PathBuf,
    /// favorites.json / history.json / session.json 所在目录
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    home: PathBuf,
    overrides: EnvOverrides,
    /// 文件中的原始内容，保存时只写回它，环境变量覆盖的值不会落盘
    file: ConfigFile,
}

/// 加载时读到的密钥类环境变量
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    wallhaven_api_key: Option<String>,
    waifuim_token: Option<String>,
    nekosmoe_token: Option<String>,
}

/// 环境变量查询函数，测试时可替换
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

impl AppConfig {
    /// 从 $HOME 和进程环境变量初始化配置
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").map_err(|_| Error::NoHome)?;
        Self::load_from(Path::new(&home), &|key| std::env::var(key).ok())
    }

    /// 配置文件损坏时使用，得到一份默认配置（路径照常解析）
    pub fn defaults() -> Result<Self> {
        let home = std::env::var("HOME").map_err(|_| Error::NoHome)?;
        let env: EnvLookup = &|key| std::env::var(key).ok();
        Ok(Self::resolve(Path::new(&home), ConfigFile::default(), env))
    }

    pub fn load_from(home: &Path, env: EnvLookup) -> Result<Self> {
        let config_path = config_dir(home, env).join("config.toml");
        let file = match fs::read_to_string(&config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %config_path.display(), "no config file, using defaults");
                ConfigFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::resolve(home, file, env))
    }

    /// 合并文件内容与环境变量，展开路径
    fn resolve(home: &Path, file: ConfigFile, env: EnvLookup) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let overrides = EnvOverrides {
            wallhaven_api_key: non_empty(env("WALLHAVEN_API_KEY")),
            waifuim_token: non_empty(env("WAIFUIM_TOKEN")),
            nekosmoe_token: non_empty(env("NEKOSMOE_TOKEN")),
        };

        // 优先级：环境变量 > 配置文件内容
        let wallhaven_api_key = overrides
            .wallhaven_api_key
            .clone()
            .or_else(|| non_empty(file.source.wallhaven.api_key.clone()));
        let waifuim_token = overrides
            .waifuim_token
            .clone()
            .or_else(|| non_empty(file.source.waifuim.token.clone()));
        let nekosmoe_token = overrides
            .nekosmoe_token
            .clone()
            .or_else(|| non_empty(file.source.nekosmoe.token.clone()));

        // 下载目录：展开 ~ 和环境变量，相对路径相对于 $HOME，未配置时用 ~/Pictures/Pixelvault
        let download_dir = match file.common.download_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => {
                let p = expand_path(dir, home, env);
                if p.is_absolute() { p } else { home.join(p) }
            }
            _ => home.join("Pictures").join("Pixelvault"),
        };

        let common = &file.common;
        Self {
            wallhaven_api_key,
            waifuim_token,
            nekosmoe_token,
            download_dir,
            filename_format: common.filename_format.clone(),
            organize_by_source: common.organize_by_source,
            auto_download: common.auto_download,
            show_auto_download_notification: common.show_auto_download_notification,
            default_source: common.default_source,
            nsfw: common.nsfw,
            timeout: Duration::from_secs(common.timeout_secs.max(1)),
            history_limit: common.history_limit,
            wallhaven: file.source.wallhaven.clone(),
            config_path: config_dir(home, env).join("config.toml"),
            data_dir: xdg_dir(home, env, "XDG_DATA_HOME", &[".local", "share"]),
            cache_dir: xdg_dir(home, env, "XDG_CACHE_HOME", &[".cache"]),
            home: home.to_path_buf(),
            overrides,
            file,
        }
    }

    pub fn favorites_path(&self) -> PathBuf {
        self.data_dir.join("favorites.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// 设置壁纸前下载远程图片的缓存目录
    pub fn wallpaper_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("wallpaper")
    }

    /// 某个来源的默认搜索参数
    pub fn search_options(&self, source: SourceKind) -> SearchOptions {
        let wallhaven = WallhavenOptions {
            categories: self.wallhaven.categories.clone(),
            purity: self.wallhaven.purity.clone(),
            order: self.wallhaven.order.clone(),
            top_range: self.wallhaven.top_range.clone(),
            ..WallhavenOptions::default()
        };
        SearchOptions {
            nsfw: self.nsfw,
            // 其它来源的排序取值不同，不套用 Wallhaven 的默认排序
            sorting: (source == SourceKind::Wallhaven).then(|| self.wallhaven.sorting.clone()),
            wallhaven,
            ..SearchOptions::default()
        }
    }

    /// 修改单个配置项（仅内存中，需要再调用 save）
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let optional = || (!value.is_empty()).then(|| value.to_string());
        let file = &mut self.file;
        match key {
            "download_dir" => file.common.download_dir = optional(),
            "filename_format" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                file.common.filename_format = value.to_string();
            }
            "organize_by_source" => file.common.organize_by_source = parse_bool(key, value)?,
            "auto_download" => file.common.auto_download = parse_bool(key, value)?,
            "show_auto_download_notification" => {
                file.common.show_auto_download_notification = parse_bool(key, value)?
            }
            "default_source" | "source" => {
                file.common.default_source =
                    SourceKind::parse(value).ok_or_else(|| invalid(key, value))?
            }
            "nsfw" => file.common.nsfw = parse_bool(key, value)?,
            "timeout_secs" | "timeout" => file.common.timeout_secs = parse_positive(key, value)?,
            "history_limit" => file.common.history_limit = parse_positive(key, value)?,
            "wallhaven.api_key" | "api_key" => file.source.wallhaven.api_key = optional(),
            "wallhaven.categories" | "categories" => {
                file.source.wallhaven.categories = parse_switches(key, value)?
            }
            "wallhaven.purity" | "purity" => file.source.wallhaven.purity = parse_switches(key, value)?,
            "wallhaven.sorting" | "sorting" => {
                const SORTINGS: &[&str] =
                    &["date_added", "relevance", "random", "views", "favorites", "toplist"];
                if !SORTINGS.contains(&value) {
                    return Err(invalid(key, value));
                }
                file.source.wallhaven.sorting = value.to_string();
            }
            "wallhaven.order" | "order" => {
                if value != "desc" && value != "asc" {
                    return Err(invalid(key, value));
                }
                file.source.wallhaven.order = value.to_string();
            }
            "wallhaven.top_range" | "top_range" => {
                const RANGES: &[&str] = &["1d", "3d", "1w", "1M", "3M", "6M", "1y"];
                if !RANGES.contains(&value) {
                    return Err(invalid(key, value));
                }
                file.source.wallhaven.top_range = value.to_string();
            }
            "waifuim.token" => file.source.waifuim.token = optional(),
            "nekosmoe.token" => file.source.nekosmoe.token = optional(),
            _ => {
                return Err(Error::Config(
                    t!("config_error_unknown_key", key => key, keys => KEYS.join(", ")).to_string(),
                ));
            }
        }
        self.refresh();
        Ok(())
    }

    /// 恢复全部默认值（仅内存中，需要再调用 save）
    pub fn reset(&mut self) {
        self.file = ConfigFile::default();
        self.refresh();
    }

    /// 文件内容变化后重新计算派生字段，环境变量覆盖沿用加载时的值
    fn refresh(&mut self) {
        let overrides = self.overrides.clone();
        let env = |key: &str| match key {
            "WALLHAVEN_API_KEY" => overrides.wallhaven_api_key.clone(),
            "WAIFUIM_TOKEN" => overrides.waifuim_token.clone(),
            "NEKOSMOE_TOKEN" => overrides.nekosmoe_token.clone(),
            _ => std::env::var(key).ok(),
        };
        let mut refreshed = Self::resolve(&self.home, self.file.clone(), &env);
        // 路径不随文件内容变化，保持加载时的结果
        refreshed.config_path = std::mem::take(&mut self.config_path);
        refreshed.data_dir = std::mem::take(&mut self.data_dir);
        refreshed.cache_dir = std::mem::take(&mut self.cache_dir);
        *self = refreshed;
    }

    /// 将配置保存回文件
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, self.to_toml()?)?;
        tracing::debug!(path = %self.config_path.display(), "config saved");
        Ok(())
    }

    /// 将配置文件内容转换为 TOML 字符串
    pub fn to_toml(&self) -> Result<String> {
        let body = toml::to_string_pretty(&self.file)?;
        // toml 库不支持带注释序列化，所以手动加上说明
        Ok(format!(
            "# PixelVault 配置文件\n# 可选来源: wallhaven (default), waifu-im, waifu-pics, nekos-moe\n# API Key 也可以通过 WALLHAVEN_API_KEY / WAIFUIM_TOKEN / NEKOSMOE_TOKEN 环境变量提供\n\n{body}"
        ))
    }

    /// 获取配置文件的 JSON Schema
    pub fn get_schema() -> Result<String> {
        let schema = schemars::schema_for!(ConfigFile);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// 展开路径中的 ~ 和环境变量
/// 支持格式: ~/path, $HOME/path, ${HOME}/path
fn expand_path(path_str: &str, home: &Path, env: EnvLookup) -> PathBuf {
    let home_str = home.to_string_lossy().into_owned();
    let expanded = shellexpand::full_with_context_no_errors(
        path_str,
        || Some(home_str.clone()),
        |var| match var {
            "HOME" => Some(home_str.clone()),
            other => env(other),
        },
    );
    PathBuf::from(expanded.into_owned())
}

fn config_dir(home: &Path, env: EnvLookup) -> PathBuf {
    xdg_dir(home, env, "XDG_CONFIG_HOME", &[".config"])
}

/// $XDG_*_HOME/pixelvault，未设置时退回 $HOME 下的默认位置
fn xdg_dir(home: &Path, env: EnvLookup, var: &str, fallback: &[&str]) -> PathBuf {
    let base = env(var)
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| fallback.iter().fold(home.to_path_buf(), |p, part| p.join(part)));
    base.join(APP_DIR)
}

fn invalid(key: &str, value: &str) -> Error {
    Error::Config(t!("config_error_invalid_value", key => key, value => value).to_string())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
        .ok_or_else(|| invalid(key, value))
}

/// 三位 0/1 开关串，至少打开一位
fn parse_switches(key: &str, value: &str) -> Result<String> {
    let valid = value.len() == 3 && value.chars().all(|c| c == '0' || c == '1') && value.contains('1');
    if valid { Ok(value.to_string()) } else { Err(invalid(key, value)) }
}
