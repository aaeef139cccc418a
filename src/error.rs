// error.rs — 统一错误类型
// 所有模块都返回 crate::error::Result，main 负责把错误转为用户可见的提示

use crate::source::SourceKind;
use rust_i18n::t;

/// 应用内所有可能的失败
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 网络层错误（连接失败、超时、TLS 等）
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// 服务端返回了非 2xx 状态码
    #[error("{site} returned HTTP {status}")]
    Status { site: SourceKind, status: u16 },

    /// API Key 无效（401）
    #[error("{0}: invalid API key")]
    InvalidApiKey(SourceKind),

    /// 请求过于频繁（429）
    #[error("{0}: rate limit exceeded, try again later")]
    RateLimited(SourceKind),

    /// 响应体不是预期的 JSON 结构
    #[error("{site} sent malformed JSON: {reason}")]
    Decode { site: SourceKind, reason: serde_json::Error },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// 配置项不合法（未知的键、格式错误的值等）
    #[error("{0}")]
    Config(String),

    /// 系统壁纸设置失败
    #[error("cannot set wallpaper: {0}")]
    Wallpaper(String),

    /// 引用的图片不在当前结果、收藏或历史中
    #[error("no image matches '{0}'")]
    UnknownImage(String),

    /// 会话存在，但当前过滤条件下没有图片
    #[error("no image in the current results matches the filter")]
    NoMatchingImage,

    /// 还没有执行过搜索，`more`、`open` 等命令没有会话可用
    #[error("no previous search")]
    NoSession,

    #[error("$HOME is not set")]
    NoHome,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 面向用户的本地化提示
    pub fn localized(&self) -> String {
        match self {
            Error::Http(e) if e.is_timeout() => t!("error_timeout").to_string(),
            Error::Http(e) => t!("error_network", reason => e).to_string(),
            Error::Status { site, status } => t!("error_status", site => site, status => status).to_string(),
            Error::InvalidApiKey(site) => t!("error_invalid_key", site => site).to_string(),
            Error::RateLimited(site) => t!("error_rate_limited", site => site).to_string(),
            Error::Decode { site, .. } => t!("error_decode", site => site).to_string(),
            Error::Io(e) => t!("error_io", reason => e).to_string(),
            Error::ConfigParse(e) => t!("error_config_parse", reason => e).to_string(),
            Error::Wallpaper(reason) => t!("error_set_failed", reason => reason).to_string(),
            Error::UnknownImage(reference) => t!("error_unknown_image", image => reference).to_string(),
            Error::NoMatchingImage => t!("error_no_match").to_string(),
            Error::NoSession => t!("error_no_session").to_string(),
            Error::NoHome => t!("error_no_home").to_string(),
            other => other.to_string(),
        }
    }
}
