// cli.rs — 命令行接口定义模块
// 使用 clap 的 derive 模式定义所有子命令和参数

use crate::source::SourceKind;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// 多来源图片浏览与下载工具
///
/// 从 Wallhaven、Waifu.im、Waifu.pics、Nekos.moe 搜索图片，
/// 支持高级过滤、收藏、下载和设置为系统壁纸。
#[derive(Parser, Debug)]
#[command(name = "pixelvault")]
#[command(version)]
#[command(author)]
#[command(about = "多来源图片浏览与下载工具 — 搜索、收藏、下载图片并设置为壁纸")]
pub struct Cli {
    /// 输出调试日志（也可以用 PIXELVAULT_LOG 环境变量控制）
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// search 的参数
#[derive(Args, Debug, Default)]
pub struct SearchArgs {
    /// 图片来源（不指定则使用配置中的默认来源）
    #[arg(short, long, value_enum)]
    pub source: Option<SourceKind>,

    /// 搜索关键词
    #[arg(short, long)]
    pub query: Option<String>,

    /// 标签，可重复或用逗号分隔（Waifu.pics 取第一个作为分类）
    #[arg(short, long, value_delimiter = ',')]
    pub tag: Vec<String>,

    /// 高级过滤条件，如 "width:>1920 ratio:16:9 tag:nature"
    #[arg(short, long)]
    pub filter: Option<String>,

    /// 页码
    #[arg(short, long, default_value_t = 1)]
    pub page: u32,

    /// 排序方式（Wallhaven: date_added/relevance/random/views/favorites/toplist；
    /// Nekos.moe: newest/oldest/likes/relevance/random）
    #[arg(long)]
    pub sorting: Option<String>,

    /// 每页数量
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<u32>,

    /// 请求 NSFW 内容（覆盖配置）
    #[arg(long, conflicts_with = "sfw")]
    pub nsfw: bool,

    /// 只请求 SFW 内容（覆盖配置）
    #[arg(long)]
    pub sfw: bool,

    /// Wallhaven 分类开关 (general/anime/people)，如 "111"=全部, "100"=仅general
    #[arg(short, long)]
    pub categories: Option<String>,

    /// Wallhaven 纯净度开关 (sfw/sketchy/nsfw)，如 "100"=仅SFW
    #[arg(long)]
    pub purity: Option<String>,

    /// Wallhaven 最小分辨率，如 1920x1080
    #[arg(long)]
    pub atleast: Option<String>,

    /// Wallhaven 精确分辨率，可用逗号分隔多个
    #[arg(long, value_delimiter = ',')]
    pub resolutions: Vec<String>,

    /// Wallhaven 宽高比，如 16x9，可用逗号分隔多个
    #[arg(long, value_delimiter = ',')]
    pub ratios: Vec<String>,

    /// Wallhaven 颜色（十六进制）
    #[arg(long)]
    pub color: Option<String>,

    /// Wallhaven 排行榜时间范围 (1d/3d/1w/1M/3M/6M/1y)
    #[arg(long)]
    pub top_range: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 搜索图片，结果保存为当前会话
    ///
    /// 用法示例:
    ///   pixelvault search -q nature
    ///   pixelvault search -s waifu-im -t maid
    ///   pixelvault search -q landscape -f "width:>1920 ratio:16:9"
    Search(SearchArgs),

    /// 加载当前会话的下一页并追加到结果中
    More,

    /// 列出当前会话中的图片
    ///
    /// 用法示例:
    ///   pixelvault list
    ///   pixelvault list --urls
    List {
        /// 同时打印原图地址
        #[arg(short, long)]
        urls: bool,
    },

    /// 用高级过滤条件重新过滤当前会话（不重新请求）
    ///
    /// 用法示例:
    ///   pixelvault filter "resolution:4k color:336699"
    ///   pixelvault filter --clear
    Filter {
        /// 过滤条件
        expression: Option<String>,

        /// 清除过滤条件
        #[arg(long, conflicts_with = "expression")]
        clear: bool,
    },

    /// 查看图片详情（记录到历史；开启 auto_download 时自动下载）
    ///
    /// 用法示例:
    ///   pixelvault open 3
    ///   pixelvault open k7q9e1
    Open {
        /// 会话中的序号（从 1 开始）或图片 ID
        image: String,
    },

    /// 下载图片到配置的下载目录
    ///
    /// 用法示例:
    ///   pixelvault download 1 2 5
    ///   pixelvault download --all
    Download {
        /// 会话中的序号或图片 ID，也可以是收藏中的 ID
        images: Vec<String>,

        /// 下载当前会话中（过滤后）的全部图片
        #[arg(short, long, conflicts_with = "images")]
        all: bool,
    },

    /// 收藏管理
    Favorite {
        #[command(subcommand)]
        action: FavoriteAction,
    },

    /// 查看或清空浏览历史
    History {
        /// 清空历史
        #[arg(long)]
        clear: bool,
    },

    /// 把会话中的图片设置为系统壁纸
    ///
    /// 用法示例:
    ///   pixelvault wallpaper 2
    ///   pixelvault wallpaper --random
    Wallpaper {
        /// 会话中的序号或图片 ID
        #[arg(required_unless_present = "random")]
        image: Option<String>,

        /// 随机选一张
        #[arg(short, long, conflicts_with = "image")]
        random: bool,
    },

    /// 将本地指定的图片设置为系统壁纸
    ///
    /// 用法示例:
    ///   pixelvault apply image.jpg
    Apply {
        /// 图片的本地路径
        image: String,
    },

    /// 列出某个来源可用的标签或分类
    Tags {
        #[arg(short, long, value_enum)]
        source: Option<SourceKind>,

        /// 包含 NSFW 标签
        #[arg(long)]
        nsfw: bool,
    },

    /// 列出支持的图片来源及其功能
    Sources,

    /// 配置管理操作
    ///
    /// 用法示例:
    ///   pixelvault config show
    ///   pixelvault config set auto_download true
    ///   pixelvault config test-key
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// 生成 shell 补全脚本（支持 bash, zsh, fish, elvish, powershell）
    ///
    /// 用法示例：
    ///   pixelvault completions zsh > ~/.zsh/completions/_pixelvault
    Completions {
        /// 目标 shell 类型
        shell: Shell,
    },
}

/// 收藏管理操作
#[derive(Subcommand, Debug)]
pub enum FavoriteAction {
    /// 收藏会话中的图片
    Add { image: String },
    /// 取消收藏（会话序号、图片 ID 或 "来源:ID"）
    Remove { image: String },
    /// 切换收藏状态
    Toggle { image: String },
    /// 列出所有收藏
    List,
}

/// 配置管理操作
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// 查看当前所有配置简报
    Show,
    /// 生成配置文件对应的 JSON Schema
    Schema,
    /// 以 TOML 格式打印当前完整配置内容
    Dump,
    /// 设置配置项，使用 `config show` 查看可用的键
    Set {
        /// 要设置的键，如 download_dir、wallhaven.purity
        key: String,
        /// 要设置的值（空字符串清除可选项）
        value: String,
    },
    /// 恢复默认配置
    Reset,
    /// 测试 Wallhaven API Key 是否有效
    TestKey {
        /// 要测试的 Key（不指定则使用配置中的）
        key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_arguments_parse() {
        let cli = Cli::parse_from([
            "pixelvault", "-v", "search", "-s", "waifu.im", "-t", "maid,uniform", "-f", "width:>1920", "--nsfw",
        ]);
        assert!(cli.verbose);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.source, Some(SourceKind::WaifuIm));
        assert_eq!(args.tag, vec!["maid", "uniform"]);
        assert_eq!(args.filter.as_deref(), Some("width:>1920"));
        assert_eq!(args.page, 1);
        assert!(args.nsfw);
    }

    #[test]
    fn wallpaper_needs_image_or_random() {
        assert!(Cli::try_parse_from(["pixelvault", "wallpaper"]).is_err());
        assert!(Cli::try_parse_from(["pixelvault", "wallpaper", "--random"]).is_ok());
        assert!(Cli::try_parse_from(["pixelvault", "wallpaper", "3"]).is_ok());
    }

    #[test]
    fn favorite_subcommands_parse() {
        let cli = Cli::parse_from(["pixelvault", "favorite", "toggle", "wallhaven:abc"]);
        assert!(matches!(
            cli.command,
            Commands::Favorite { action: FavoriteAction::Toggle { ref image } } if image == "wallhaven:abc"
        ));
    }
}
