// filter.rs — 高级搜索过滤
// 把 "width:>1920 tag:nature" 这类查询解析成一组谓词，再对已获取的图片元数据逐条判断

use crate::source::ImageRecord;
use chrono::NaiveDate;
use std::str::FromStr;

/// 宽高比允许的误差
const RATIO_TOLERANCE: f64 = 0.05;

/// 数值比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Lt,
    Eq,
    Ge,
    Le,
}

impl Comparison {
    /// 拆出值前面的运算符，没有运算符时视为等于
    fn split(value: &str) -> (Self, &str) {
        // 两个字符的运算符必须先匹配
        for (prefix, op) in [
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
            ("=", Comparison::Eq),
        ] {
            if let Some(rest) = value.strip_prefix(prefix) {
                return (op, rest.trim());
            }
        }
        (Comparison::Eq, value)
    }

    pub fn holds<T: PartialOrd>(self, actual: T, target: T) -> bool {
        match self {
            Comparison::Gt => actual > target,
            Comparison::Lt => actual < target,
            Comparison::Eq => actual == target,
            Comparison::Ge => actual >= target,
            Comparison::Le => actual <= target,
        }
    }
}

/// 常见分辨率名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 不小于给定宽高（4k、8k）
    AtLeast(u32, u32),
    /// 精确宽高，允许 1 像素误差（1080p 等，或直接写 1920x1080）
    Exact(u32, u32),
    /// 无法识别的名称，不匹配任何图片
    Unknown(String),
}

impl Resolution {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "8k" => Resolution::AtLeast(7680, 4320),
            "4k" | "uhd" => Resolution::AtLeast(3840, 2160),
            "1440p" | "2k" | "qhd" => Resolution::Exact(2560, 1440),
            "1080p" | "fullhd" | "fhd" => Resolution::Exact(1920, 1080),
            "720p" | "hd" => Resolution::Exact(1280, 720),
            other => match parse_pair(other, 'x') {
                Some((w, h)) => Resolution::Exact(w as u32, h as u32),
                None => Resolution::Unknown(other.to_string()),
            },
        }
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        match *self {
            Resolution::AtLeast(w, h) => width >= w && height >= h,
            Resolution::Exact(w, h) => width.abs_diff(w) <= 1 && height.abs_diff(h) <= 1,
            Resolution::Unknown(_) => false,
        }
    }
}

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// 目标宽高比（宽 / 高）
    Ratio(f64),
    Width(Comparison, u32),
    Height(Comparison, u32),
    Resolution(Resolution),
    Color(String),
    Source(String),
    Category(String),
    Tag(String),
    Views(Comparison, u64),
    Favorites(Comparison, u64),
    Date(Comparison, NaiveDate),
    /// 文件大小（字节）
    Size(Comparison, u64),
    /// 没有识别出键的普通搜索词，匹配标题和标签
    Text(String),
}

impl Predicate {
    pub fn matches(&self, record: &ImageRecord) -> bool {
        match self {
            Predicate::Ratio(target) => {
                record.has_dimensions()
                    && (record.width as f64 / record.height as f64 - target).abs() <= RATIO_TOLERANCE
            }
            Predicate::Width(op, target) => record.width > 0 && op.holds(record.width, *target),
            Predicate::Height(op, target) => record.height > 0 && op.holds(record.height, *target),
            Predicate::Resolution(resolution) => resolution.matches(record.width, record.height),
            Predicate::Color(color) => record
                .colors
                .iter()
                .any(|c| c.trim_start_matches('#').to_lowercase().contains(color.as_str())),
            Predicate::Source(name) => {
                record.source.display_name().contains(name.as_str())
                    || record.source.dir_name().contains(name.as_str())
            }
            Predicate::Category(category) => record
                .category
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains(category.as_str())),
            Predicate::Tag(tag) => record
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(tag.as_str())),
            Predicate::Views(op, target) => record.views.is_some_and(|v| op.holds(v, *target)),
            Predicate::Favorites(op, target) => {
                record.favorites.is_some_and(|v| op.holds(v, *target))
            }
            Predicate::Date(op, target) => record
                .created_at
                .as_deref()
                .and_then(date_part)
                .is_some_and(|date| op.holds(date, *target)),
            Predicate::Size(op, target) => record.file_size.is_some_and(|s| op.holds(s, *target)),
            Predicate::Text(term) => {
                record
                    .title
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(term.as_str()))
                    || record.tags.iter().any(|t| t.to_lowercase().contains(term.as_str()))
            }
        }
    }
}

/// 解析后的过滤器：所有谓词都成立才算匹配
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
    /// 键可识别但值格式错误而被丢弃的词
    pub dropped: Vec<String>,
}

impl Filter {
    pub fn parse(query: &str) -> Self {
        let mut filter = Filter::default();
        for token in tokenize(query) {
            match parse_token(&token) {
                Parsed::Predicate(predicate) => filter.predicates.push(predicate),
                Parsed::Dropped => filter.dropped.push(token),
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// 是否包含带键的条件（只有普通搜索词时可以直接交给服务端搜索）
    pub fn has_advanced(&self) -> bool {
        self.predicates
            .iter()
            .any(|p| !matches!(p, Predicate::Text(_)))
    }

    /// 普通搜索词，用空格连接
    pub fn text_terms(&self) -> Option<String> {
        let terms: Vec<&str> = self
            .predicates
            .iter()
            .filter_map(|p| match p {
                Predicate::Text(term) => Some(term.as_str()),
                _ => None,
            })
            .collect();
        (!terms.is_empty()).then(|| terms.join(" "))
    }

    /// 去掉普通搜索词，只保留带键的条件（搜索词已经交给服务端时使用）
    pub fn without_text(mut self) -> Self {
        self.predicates.retain(|p| !matches!(p, Predicate::Text(_)));
        self
    }

    pub fn matches(&self, record: &ImageRecord) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }

    pub fn apply<'a>(&self, records: &'a [ImageRecord]) -> Vec<&'a ImageRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }
}

enum Parsed {
    Predicate(Predicate),
    Dropped,
}

/// 按空格切分，引号内的空格不切分；引号本身去掉
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in query.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => quote = Some(ch),
            (c, Some(q)) if c == q => quote = None,
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            (c, _) => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_token(token: &str) -> Parsed {
    let Some((key, value)) = token.split_once(':') else {
        return Parsed::Predicate(Predicate::Text(token.to_lowercase()));
    };
    let value = value.trim();
    let key = key.to_ascii_lowercase();

    let recognized = matches!(
        key.as_str(),
        "ratio" | "width" | "height" | "resolution" | "color" | "source" | "category" | "tag"
            | "views" | "view" | "favorites" | "favorite" | "date" | "size"
    );
    if !recognized {
        return Parsed::Predicate(Predicate::Text(token.to_lowercase()));
    }
    if value.is_empty() {
        return Parsed::Dropped;
    }

    let lowered = value.to_lowercase();
    let predicate = match key.as_str() {
        "ratio" => parse_ratio(value).map(Predicate::Ratio),
        "width" => numeric(value).map(|(op, n)| Predicate::Width(op, n)),
        "height" => numeric(value).map(|(op, n)| Predicate::Height(op, n)),
        "resolution" => Some(Predicate::Resolution(Resolution::parse(value))),
        "color" => Some(Predicate::Color(lowered.trim_start_matches('#').to_string())),
        "source" => Some(Predicate::Source(lowered)),
        "category" => Some(Predicate::Category(lowered)),
        "tag" => Some(Predicate::Tag(lowered)),
        "views" | "view" => numeric(value).map(|(op, n)| Predicate::Views(op, n)),
        "favorites" | "favorite" => numeric(value).map(|(op, n)| Predicate::Favorites(op, n)),
        "date" => {
            let (op, rest) = Comparison::split(value);
            NaiveDate::parse_from_str(rest, "%Y-%m-%d")
                .ok()
                .map(|date| Predicate::Date(op, date))
        }
        "size" => {
            let (op, rest) = Comparison::split(value);
            parse_size(rest).map(|bytes| Predicate::Size(op, bytes))
        }
        _ => None,
    };

    match predicate {
        Some(p) => Parsed::Predicate(p),
        None => Parsed::Dropped,
    }
}

/// 解析 ">1920" 形式的数值条件，超出目标类型范围的值视为格式错误
fn numeric<T: FromStr>(value: &str) -> Option<(Comparison, T)> {
    let (op, rest) = Comparison::split(value);
    rest.parse::<T>().ok().map(|n| (op, n))
}

/// "16:9"、"16x9" 或小数 "1.78"
fn parse_ratio(value: &str) -> Option<f64> {
    if let Some((w, h)) = parse_pair(value, ':').or_else(|| parse_pair(value, 'x')) {
        return (h > 0.0).then(|| w / h);
    }
    value.parse::<f64>().ok().filter(|r| *r > 0.0)
}

fn parse_pair(value: &str, sep: char) -> Option<(f64, f64)> {
    let (a, b) = value.split_once(sep)?;
    let a = a.trim().parse::<u32>().ok()?;
    let b = b.trim().parse::<u32>().ok()?;
    Some((a as f64, b as f64))
}

/// "5mb"、"500kb"、"1.5gb"、"2048"
fn parse_size(value: &str) -> Option<u64> {
    let lowered = value.to_ascii_lowercase();
    let (number, multiplier) = [("gb", 1u64 << 30), ("mb", 1 << 20), ("kb", 1 << 10), ("b", 1)]
        .into_iter()
        .find_map(|(suffix, m)| lowered.strip_suffix(suffix).map(|n| (n.trim().to_string(), m)))
        .unwrap_or((lowered.clone(), 1));
    let number: f64 = number.parse().ok()?;
    (number >= 0.0).then(|| (number * multiplier as f64) as u64)
}

/// 取时间戳的日期部分，兼容 "2023-04-01 10:12:13" 和 RFC 3339
fn date_part(timestamp: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(timestamp.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;

    fn record(width: u32, height: u32, tags: &[&str]) -> ImageRecord {
        let mut r = ImageRecord::new(SourceKind::Wallhaven, "id1", "https://w.wallhaven.cc/full/id1.jpg");
        r.width = width;
        r.height = height;
        r.tags = tags.iter().map(|t| t.to_string()).collect();
        r
    }

    #[test]
    fn width_and_tag_example() {
        let filter = Filter::parse("width:>1920 tag:nature");
        assert_eq!(filter.predicates.len(), 2);
        assert!(filter.matches(&record(2560, 1440, &["nature", "sky"])));
        assert!(!filter.matches(&record(1280, 720, &["nature"])));
        assert!(!filter.matches(&record(2560, 1440, &["city"])));
    }

    #[test]
    fn one_predicate_per_recognized_token() {
        let filter = Filter::parse("ratio:16:9 width:>=1920 height:<2000 resolution:4k color:#336600 source:wallhaven category:anime tag:sky");
        assert_eq!(filter.predicates.len(), 8);
        assert!(filter.dropped.is_empty());
        assert!(filter.has_advanced());
        assert_eq!(filter.text_terms(), None);
    }

    #[test]
    fn unknown_tokens_pass_through_as_text() {
        let filter = Filter::parse("sunset foo:bar width:>100");
        assert_eq!(
            filter.predicates,
            vec![
                Predicate::Text("sunset".into()),
                Predicate::Text("foo:bar".into()),
                Predicate::Width(Comparison::Gt, 100),
            ]
        );
        assert_eq!(filter.text_terms().as_deref(), Some("sunset foo:bar"));

        let only_text = Filter::parse("sunset beach");
        assert!(!only_text.has_advanced());
    }

    #[test]
    fn operators_parse_and_default_to_equality() {
        let ops = |q: &str| match &Filter::parse(q).predicates[0] {
            Predicate::Width(op, n) => (*op, *n),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(ops("width:>1920"), (Comparison::Gt, 1920));
        assert_eq!(ops("width:<1920"), (Comparison::Lt, 1920));
        assert_eq!(ops("width:=1920"), (Comparison::Eq, 1920));
        assert_eq!(ops("width:>=1920"), (Comparison::Ge, 1920));
        assert_eq!(ops("width:<=1920"), (Comparison::Le, 1920));
        assert_eq!(ops("width:1920"), (Comparison::Eq, 1920));
    }

    #[test]
    fn malformed_terms_are_dropped() {
        let filter = Filter::parse("width:>abc height: date:yesterday size:lots tag:nature");
        assert_eq!(filter.predicates, vec![Predicate::Tag("nature".into())]);
        assert_eq!(filter.dropped, vec!["width:>abc", "height:", "date:yesterday", "size:lots"]);
    }

    #[test]
    fn out_of_range_dimensions_are_dropped() {
        let filter = Filter::parse("width:>4294967297 height:<99999999999 views:>4294967297");
        assert_eq!(filter.predicates, vec![Predicate::Views(Comparison::Gt, 4_294_967_297)]);
        assert_eq!(filter.dropped, vec!["width:>4294967297", "height:<99999999999"]);
        assert!(!filter.matches(&record(1920, 1080, &[])));
    }

    #[test]
    fn without_text_keeps_only_keyed_terms() {
        let filter = Filter::parse("sunset width:>1920 beach").without_text();
        assert_eq!(filter.predicates, vec![Predicate::Width(Comparison::Gt, 1920)]);
        assert_eq!(filter.text_terms(), None);
        // Wallhaven 的搜索结果没有标题和标签
        assert!(filter.matches(&record(3840, 2160, &[])));
    }

    #[test]
    fn ratio_matches_within_tolerance() {
        let filter = Filter::parse("ratio:16:9");
        assert!(filter.matches(&record(1920, 1080, &[])));
        assert!(filter.matches(&record(1366, 768, &[])));
        assert!(!filter.matches(&record(1600, 1200, &[])));
        assert!(!filter.matches(&record(0, 0, &[])));

        assert!(Filter::parse("ratio:21x9").matches(&record(2560, 1080, &[])));
        assert!(Filter::parse("ratio:1:1").matches(&record(1000, 1000, &[])));
    }

    #[test]
    fn resolution_names() {
        let uhd = record(3840, 2160, &[]);
        let fhd = record(1920, 1080, &[]);
        assert!(Filter::parse("resolution:4k").matches(&uhd));
        assert!(Filter::parse("resolution:UHD").matches(&record(5120, 2880, &[])));
        assert!(!Filter::parse("resolution:4k").matches(&fhd));
        assert!(Filter::parse("resolution:1080p").matches(&fhd));
        assert!(!Filter::parse("resolution:1080p").matches(&uhd));
        assert!(Filter::parse("resolution:1920x1080").matches(&fhd));
        assert!(Filter::parse("resolution:720p").matches(&record(1280, 720, &[])));
    }

    #[test]
    fn unknown_resolution_name_matches_nothing() {
        let filter = Filter::parse("resolution:ultrawide");
        assert_eq!(filter.predicates.len(), 1);
        assert!(!filter.matches(&record(3440, 1440, &[])));
    }

    #[test]
    fn metadata_fields() {
        let mut r = record(1920, 1080, &["Blue Sky"]);
        r.colors = vec!["#336699".into()];
        r.category = Some("General".into());
        r.views = Some(1500);
        r.favorites = Some(10);
        r.file_size = Some(6 * 1024 * 1024);
        r.created_at = Some("2023-04-01 10:12:13".into());

        assert!(Filter::parse("color:336699").matches(&r));
        assert!(Filter::parse("color:#336699").matches(&r));
        assert!(!Filter::parse("color:ff0000").matches(&r));
        assert!(Filter::parse("category:general").matches(&r));
        assert!(Filter::parse("source:wall").matches(&r));
        assert!(!Filter::parse("source:nekos").matches(&r));
        assert!(Filter::parse("tag:\"blue sky\"").matches(&r));
        assert!(Filter::parse("views:>1000 favorite:>=10").matches(&r));
        assert!(!Filter::parse("views:<1000").matches(&r));
        assert!(Filter::parse("size:>5mb").matches(&r));
        assert!(!Filter::parse("size:>1gb").matches(&r));
        assert!(Filter::parse("date:>2023-01-01").matches(&r));
        assert!(!Filter::parse("date:<2023-01-01").matches(&r));
    }

    #[test]
    fn missing_metadata_never_matches() {
        let r = record(0, 0, &[]);
        for query in ["width:>0", "height:<5000", "views:>=0", "category:anime", "color:fff", "date:>2000-01-01"] {
            assert!(!Filter::parse(query).matches(&r), "{query} should not match");
        }
    }

    #[test]
    fn text_terms_match_title_or_tags() {
        let mut r = record(100, 100, &["landscape"]);
        r.title = Some("Mountain Lake".into());
        assert!(Filter::parse("mountain").matches(&r));
        assert!(Filter::parse("LAND").matches(&r));
        assert!(!Filter::parse("ocean").matches(&r));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::parse("   ");
        assert!(filter.is_empty());
        let records = vec![record(1, 1, &[]), record(0, 0, &[])];
        assert_eq!(filter.apply(&records).len(), 2);
    }

    #[test]
    fn quoted_values_keep_spaces() {
        assert_eq!(tokenize(r#"tag:"blue sky" 'a b' c"#), vec!["tag:blue sky", "a b", "c"]);
    }
}
