// main.rs — 程序入口
// 负责初始化异步运行时、解析命令行参数、分发子命令

mod cli;
mod config;
mod download;
mod error;
mod filter;
mod logging;
mod setter;
mod source;
mod store;

// 初始化多语言支持，嵌入 locales 目录下的所有翻译
rust_i18n::i18n!("locales");

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, ConfigAction, FavoriteAction, SearchArgs};
use config::AppConfig;
use download::{DownloadSettings, Downloader, HttpFetch};
use error::{Error, Result};
use filter::Filter;
use rust_i18n::t;
use source::wallhaven::WallhavenClient;
use source::{ImageRecord, ImageSource, SourceKind};
use std::process::ExitCode;
use store::{Collection, Session};

/// 命令共用的上下文：配置和共享的 HTTP 客户端
struct App {
    config: AppConfig,
    client: reqwest::Client,
}

impl App {
    fn new(config: AppConfig) -> Result<Self> {
        let client = source::http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    fn source(&self, kind: SourceKind) -> Box<dyn ImageSource> {
        source::from_config(kind, &self.config, self.client.clone())
    }

    fn downloader(&self) -> Downloader<HttpFetch> {
        Downloader::new(
            HttpFetch::new(self.client.clone()),
            DownloadSettings::from_config(&self.config),
        )
    }

    fn session(&self) -> Result<Session> {
        Session::load(&self.config.session_path())
    }

    /// 读取会话，没有搜索过时报错
    fn current_session(&self) -> Result<Session> {
        let session = self.session()?;
        if session.images.is_empty() && session.current_page == 0 {
            return Err(Error::NoSession);
        }
        Ok(session)
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        session.save(&self.config.session_path())
    }

    fn favorites(&self) -> Result<Collection> {
        Collection::load(self.config.favorites_path(), None)
    }

    fn history(&self) -> Result<Collection> {
        Collection::load(self.config.history_path(), Some(self.config.history_limit))
    }

    /// 依次在会话、收藏、历史中查找图片引用
    fn resolve(&self, reference: &str) -> Result<ImageRecord> {
        if let Ok(session) = self.session() {
            if let Ok(record) = session.resolve(reference) {
                return Ok(record.clone());
            }
        }
        for collection in [self.favorites()?, self.history()?] {
            if let Some(record) = collection.find(reference) {
                return Ok(record.clone());
            }
        }
        Err(Error::UnknownImage(reference.to_string()))
    }
}

/// `#[tokio::main]` 宏将 async main 转换为同步 main + tokio 运行时
#[tokio::main]
async fn main() -> ExitCode {
    // 自动检测系统语言并设置
    let locale = std::env::var("LANG").unwrap_or_else(|_| "en".to_string());
    if locale.starts_with("zh") {
        rust_i18n::set_locale("zh-CN");
    } else {
        rust_i18n::set_locale("en");
    }

    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{} {}", t!("error_prefix"), e.localized());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // 补全脚本不需要读取配置
    if let Commands::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "pixelvault", &mut std::io::stdout());
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(config) => config,
        // 配置文件损坏时仍然允许 reset
        Err(Error::ConfigParse(e))
            if matches!(cli.command, Commands::Config { action: ConfigAction::Reset }) =>
        {
            tracing::warn!(error = %e, "config file is malformed, resetting");
            AppConfig::defaults()?
        }
        Err(e) => return Err(e),
    };
    let app = App::new(config)?;

    // 根据子命令分发执行逻辑
    match cli.command {
        Commands::Search(args) => handle_search(&app, args).await,
        Commands::More => handle_more(&app).await,
        Commands::List { urls } => {
            let session = app.current_session()?;
            print_session(&app, &session, urls)
        }
        Commands::Filter { expression, clear } => handle_filter(&app, expression, clear),
        Commands::Open { image } => handle_open(&app, &image).await,
        Commands::Download { images, all } => handle_download(&app, &images, all).await,
        Commands::Favorite { action } => handle_favorite(&app, action),
        Commands::History { clear } => handle_history(&app, clear),
        Commands::Wallpaper { image, random } => handle_wallpaper(&app, image.as_deref(), random).await,
        Commands::Apply { image } => {
            println!("{}", t!("setting_wallpaper"));
            let path = shellexpand::tilde(&image).into_owned();
            setter::set_from_path(&path)?;
            println!("{}", t!("set_done", path => path));
            Ok(())
        }
        Commands::Tags { source, nsfw } => handle_tags(&app, source, nsfw).await,
        Commands::Sources => {
            handle_sources(&app);
            Ok(())
        }
        Commands::Config { action } => handle_config(app, action).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// 处理 search 子命令：按参数搜索，结果替换当前会话
async fn handle_search(app: &App, args: SearchArgs) -> Result<()> {
    let kind = args.source.unwrap_or(app.config.default_source);
    let mut options = app.config.search_options(kind);

    options.query = args.query.filter(|q| !q.trim().is_empty());
    options.tags = args.tag.into_iter().filter(|t| !t.trim().is_empty()).collect();
    options.page = args.page.max(1);
    options.limit = args.limit;
    if args.sorting.is_some() {
        options.sorting = args.sorting;
    }
    if args.nsfw {
        options.nsfw = true;
    } else if args.sfw {
        options.nsfw = false;
    }

    let wh = &mut options.wallhaven;
    if let Some(categories) = args.categories {
        wh.categories = categories;
    }
    if let Some(purity) = args.purity {
        wh.purity = purity;
    }
    if let Some(top_range) = args.top_range {
        wh.top_range = top_range;
    }
    wh.atleast = args.atleast;
    wh.resolutions = args.resolutions;
    wh.ratios = args.ratios;
    wh.colors = args.color;

    // 过滤条件里的普通搜索词在没有 --query 时作为服务端关键词，本地不再重复匹配
    let mut text_as_query = false;
    if let Some(filter) = args.filter.as_deref().map(Filter::parse) {
        report_dropped(&filter);
        if options.query.is_none() {
            options.query = filter.text_terms();
            text_as_query = options.query.is_some();
        }
        if filter.has_advanced() {
            tracing::debug!(?filter, "advanced filter applies to fetched metadata");
        }
    }

    let source = app.source(kind);
    println!("{}", t!("search_start", source => source.kind()));
    let page = source.search(&options).await?;
    tracing::debug!(
        count = page.images.len(),
        page = page.current_page,
        has_next = page.has_next_page(),
        "search finished"
    );

    let mut session = app.session().unwrap_or_default();
    session.replace(source.kind(), options, args.filter, page);
    session.text_as_query = text_as_query;
    app.save_session(&session)?;
    print_session(app, &session, false)
}

/// 处理 more 子命令：加载下一页
async fn handle_more(app: &App) -> Result<()> {
    let mut session = app.current_session()?;
    if !session.has_next_page() {
        println!("{}", t!("no_more_pages"));
        return Ok(());
    }

    let mut options = session.options.clone();
    options.page = session.current_page + 1;
    let page = app.source(session.source).search(&options).await?;
    session.options.page = options.page;
    let added = session.append(page);
    app.save_session(&session)?;

    println!("{}", t!("more_added", count => added, page => session.current_page));
    print_session(app, &session, false)
}

/// 处理 filter 子命令：只改本地过滤条件，不重新请求
fn handle_filter(app: &App, expression: Option<String>, clear: bool) -> Result<()> {
    let mut session = app.current_session()?;
    if clear {
        session.filter = None;
        session.text_as_query = false;
    } else if let Some(expression) = expression {
        report_dropped(&Filter::parse(&expression));
        session.filter = Some(expression).filter(|e| !e.trim().is_empty());
        session.text_as_query = false;
    } else {
        let current = session.filter.as_deref().unwrap_or("-");
        println!("{}", t!("filter_current", filter => current));
        return Ok(());
    }
    app.save_session(&session)?;
    print_session(app, &session, false)
}

fn report_dropped(filter: &Filter) {
    if !filter.dropped.is_empty() {
        tracing::warn!(terms = ?filter.dropped, "ignoring malformed filter terms");
        eprintln!("{}", t!("filter_dropped", terms => filter.dropped.join(" ")));
    }
}

/// 打印会话中通过过滤的图片，序号为会话内位置
fn print_session(app: &App, session: &Session, urls: bool) -> Result<()> {
    let filter = session.local_filter();
    let favorites = app.favorites()?;

    let shown: Vec<(usize, &ImageRecord)> = session
        .images
        .iter()
        .enumerate()
        .filter(|(_, record)| filter.matches(record))
        .collect();

    if shown.is_empty() {
        println!("{}", t!("no_images"));
    }
    for (index, record) in &shown {
        let mark = if favorites.contains(record) { "*" } else { " " };
        println!(
            "{mark}{:>3}. {:<10} {:<14} {:<10} {}",
            index + 1,
            record.source.display_name(),
            record.id,
            record.resolution().unwrap_or_else(|| "-".to_string()),
            record.display_title(),
        );
        if urls {
            println!("       {}", record.url);
        }
    }

    println!(
        "{}",
        t!(
            "list_summary",
            shown => shown.len(),
            total => session.images.len(),
            page => session.current_page,
            last => session.last_page
        )
    );
    if let Some(expression) = session.filter.as_deref().filter(|_| !filter.is_empty()) {
        println!("{}", t!("filter_current", filter => expression));
    }
    if session.has_next_page() {
        println!("{}", t!("more_hint"));
    }
    Ok(())
}

/// 处理 open 子命令：获取详情、记录历史、按设置自动下载
async fn handle_open(app: &App, reference: &str) -> Result<()> {
    let record = app.resolve(reference)?;

    let detailed = match app.source(record.source).details(&record).await {
        Ok(detailed) => detailed,
        Err(e) => {
            tracing::warn!(error = %e, id = %record.id, "cannot fetch details, showing cached metadata");
            record
        }
    };

    if let Ok(mut session) = app.session() {
        session.update(&detailed);
        app.save_session(&session)?;
    }
    let mut history = app.history()?;
    history.touch(&detailed);
    history.save()?;

    let favorites = app.favorites()?;
    print_details(&detailed, favorites.contains(&detailed));

    if let Some(path) = app.downloader().on_open(&detailed).await? {
        if app.config.show_auto_download_notification {
            println!("{}", t!("auto_downloaded", path => path.display()));
        }
    }
    Ok(())
}

fn print_details(record: &ImageRecord, favorite: bool) {
    let field = |label: &str, value: &str| println!("  {label:<12} {value}");
    let join = |values: &[String]| if values.is_empty() { "-".to_string() } else { values.join(", ") };
    let number = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());

    println!("{}", record.display_title());
    field(&t!("detail_id"), &record.key());
    field(&t!("detail_source"), record.source.display_name());
    field(&t!("detail_resolution"),
        &match (record.resolution(), record.ratio_label()) {
            (Some(res), Some(ratio)) => format!("{res} ({ratio})"),
            _ => "-".to_string(),
        },
    );
    field(&t!("detail_category"), record.category.as_deref().unwrap_or("-"));
    field(&t!("detail_purity"), record.purity.as_deref().unwrap_or(if record.nsfw { "nsfw" } else { "-" }));
    field(&t!("detail_tags"), &join(&record.tags));
    field(&t!("detail_colors"), &join(&record.colors));
    field(&t!("detail_size"), &record.file_size.map(human_size).unwrap_or_else(|| "-".to_string()));
    field(&t!("detail_views"), &number(record.views));
    field(&t!("detail_favorites"), &number(record.favorites));
    field(&t!("detail_created"), record.created_at.as_deref().unwrap_or("-"));
    field(&t!("detail_url"), &record.url);
    field(&t!("detail_page"), record.page_url.as_deref().unwrap_or("-"));
    let answer = if favorite { t!("yes") } else { t!("no") };
    field(&t!("detail_favorited"), &answer);
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// 处理 download 子命令
async fn handle_download(app: &App, references: &[String], all: bool) -> Result<()> {
    let records: Vec<ImageRecord> = if all {
        let session = app.current_session()?;
        session.visible().into_iter().cloned().collect()
    } else {
        references
            .iter()
            .map(|reference| app.resolve(reference))
            .collect::<Result<_>>()?
    };

    if records.is_empty() {
        println!("{}", t!("no_images"));
        return Ok(());
    }

    let downloader = app.downloader();
    let total = records.len();
    let mut saved = 0;
    let mut last_error = None;
    for (i, record) in records.iter().enumerate() {
        println!(
            "{}",
            t!("download_info", current => i + 1, total => total, id => record.key())
        );
        match downloader.download(record).await {
            Ok(path) => {
                saved += 1;
                println!("{}", t!("save_path", path => path.display()));
            }
            Err(e) => {
                eprintln!("  {}", e.localized());
                last_error = Some(e);
            }
        }
    }

    println!("{}", t!("download_done", count => saved, total => total));
    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 处理 favorite 子命令
fn handle_favorite(app: &App, action: FavoriteAction) -> Result<()> {
    let mut favorites = app.favorites()?;
    match action {
        FavoriteAction::Add { image } => {
            let record = app.resolve(&image)?;
            if favorites.add(&record) {
                favorites.save()?;
                println!("{}", t!("favorite_added", id => record.key()));
            } else {
                println!("{}", t!("favorite_exists", id => record.key()));
            }
        }
        FavoriteAction::Remove { image } => {
            let record = match favorites.find(&image) {
                Some(record) => record.clone(),
                None => app.resolve(&image)?,
            };
            if favorites.remove(&record) {
                favorites.save()?;
                println!("{}", t!("favorite_removed", id => record.key()));
            } else {
                println!("{}", t!("favorite_missing", id => record.key()));
            }
        }
        FavoriteAction::Toggle { image } => {
            let record = app.resolve(&image)?;
            let added = favorites.toggle(&record);
            favorites.save()?;
            if added {
                println!("{}", t!("favorite_added", id => record.key()));
            } else {
                println!("{}", t!("favorite_removed", id => record.key()));
            }
        }
        FavoriteAction::List => {
            print_collection(&favorites, &t!("favorites_title", count => favorites.len()))
        }
    }
    Ok(())
}

/// 处理 history 子命令
fn handle_history(app: &App, clear: bool) -> Result<()> {
    let mut history = app.history()?;
    if clear {
        history.clear();
        history.save()?;
        println!("{}", t!("history_cleared"));
    } else {
        print_collection(&history, &t!("history_title", count => history.len()));
    }
    Ok(())
}

fn print_collection(collection: &Collection, title: &str) {
    println!("{title}");
    println!("{}", "-".repeat(30));
    for entry in collection.entries() {
        let when = entry.added_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M");
        println!(
            "  {when}  {:<24} {:<10} {}",
            entry.image.key(),
            entry.image.resolution().unwrap_or_else(|| "-".to_string()),
            entry.image.display_title(),
        );
    }
}

/// 处理 wallpaper 子命令：下载到缓存后设置为壁纸
async fn handle_wallpaper(app: &App, reference: Option<&str>, random: bool) -> Result<()> {
    let record = if random {
        let session = app.current_session()?;
        session.pick_random(&mut rand::thread_rng())?.clone()
    } else {
        let reference = reference.ok_or_else(|| Error::UnknownImage(String::new()))?;
        app.resolve(reference)?
    };

    println!("{}", t!("setting_wallpaper"));
    let path = setter::set_from_record(&app.downloader(), &app.config.wallpaper_cache_dir(), &record).await?;
    println!("{}", t!("set_done", path => path.display()));
    Ok(())
}

/// 处理 tags 子命令
async fn handle_tags(app: &App, kind: Option<SourceKind>, nsfw: bool) -> Result<()> {
    let kind = kind.unwrap_or(app.config.default_source);
    let tags = app.source(kind).tags(nsfw || app.config.nsfw).await?;
    println!("{}", t!("tags_title", source => kind, count => tags.len()));
    println!("{}", "-".repeat(30));
    for tag in &tags {
        println!("  {tag}");
    }
    Ok(())
}

/// 处理 sources 子命令：列出各来源支持的功能
fn handle_sources(app: &App) {
    let mark = |on: bool| if on { "yes" } else { "-" };
    println!(
        "{:<12} {:<8} {:<10} {:<6} {:<6} {}",
        t!("col_source"),
        t!("col_search"),
        t!("col_pages"),
        t!("col_nsfw"),
        t!("col_tags"),
        t!("col_key")
    );
    for kind in SourceKind::ALL {
        // 只读取功能表，不会发出请求
        let features = app.source(kind).features();
        println!(
            "{:<12} {:<8} {:<10} {:<6} {:<6} {}",
            kind.display_name(),
            mark(features.search),
            mark(features.pagination),
            mark(features.nsfw),
            mark(features.tags),
            mark(features.api_key)
        );
    }
}

/// 处理 config 子命令：查看或修改配置
async fn handle_config(app: App, action: ConfigAction) -> Result<()> {
    let App { mut config, client } = app;
    match action {
        ConfigAction::Show => {
            let none = t!("none");
            let masked = |value: &Option<String>| match value {
                Some(_) => t!("config_key_set").to_string(),
                None => none.to_string(),
            };
            println!("{}", t!("config_title"));
            println!("{}", t!("config_path", path => config.config_path.display()));
            println!("{}", t!("config_data_dir", path => config.data_dir.display()));
            println!("  download_dir                    = {}", config.download_dir.display());
            println!("  filename_format                 = {}", config.filename_format);
            println!("  organize_by_source              = {}", config.organize_by_source);
            println!("  auto_download                   = {}", config.auto_download);
            println!("  show_auto_download_notification = {}", config.show_auto_download_notification);
            println!("  default_source                  = {}", config.default_source);
            println!("  nsfw                            = {}", config.nsfw);
            println!("  timeout_secs                    = {}", config.timeout.as_secs());
            println!("  history_limit                   = {}", config.history_limit);
            println!("  wallhaven.api_key               = {}", masked(&config.wallhaven_api_key));
            println!("  wallhaven.categories            = {}", config.wallhaven.categories);
            println!("  wallhaven.purity                = {}", config.wallhaven.purity);
            println!("  wallhaven.sorting               = {}", config.wallhaven.sorting);
            println!("  wallhaven.order                 = {}", config.wallhaven.order);
            println!("  wallhaven.top_range             = {}", config.wallhaven.top_range);
            println!("  waifuim.token                   = {}", masked(&config.waifuim_token));
            println!("  nekosmoe.token                  = {}", masked(&config.nekosmoe_token));
        }
        ConfigAction::Schema => {
            println!("{}", AppConfig::get_schema()?);
        }
        ConfigAction::Dump => {
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{}", t!("config_updated", key => key, value => value));
        }
        ConfigAction::Reset => {
            config.reset();
            config.save()?;
            println!("{}", t!("config_reset", path => config.config_path.display()));
        }
        ConfigAction::TestKey { key } => {
            let key = key
                .or_else(|| config.wallhaven_api_key.clone())
                .ok_or_else(|| Error::Config(t!("error_no_api_key").to_string()))?;
            println!("{}", t!("key_testing"));
            if WallhavenClient::new(client, Some(key)).verify_key().await? {
                println!("{}", t!("key_ok"));
            } else {
                return Err(Error::InvalidApiKey(SourceKind::Wallhaven));
            }
        }
    }
    Ok(())
}
