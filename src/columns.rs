//! Header-to-field mapping.
//!
//! Report exporters disagree on language ("Website" vs. "网站"), verbosity
//! ("广告客户网域" vs. "Domain"), and column order, so the mapper resolves
//! each header cell against a static alias table instead of requiring
//! configuration. Cells and aliases are normalized (trimmed, lowercased,
//! stripped of everything that is neither ASCII alphanumeric nor CJK) and
//! matched in three tiers: exact, header-contains-alias, alias-contains-
//! header. The first tier that hits wins for a column, and the leftmost
//! column wins for a field.

use std::{collections::HashMap, fmt, sync::OnceLock};

use log::debug;
use regex::Regex;

/// Canonical semantic fields a report column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Date,
    Website,
    Country,
    AdFormat,
    AdUnit,
    Advertiser,
    Domain,
    Device,
    Browser,
    Requests,
    Impressions,
    Clicks,
    Ctr,
    Ecpm,
    Revenue,
    ViewableImpressions,
    ViewabilityRate,
    MeasurableImpressions,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Date,
        Field::Website,
        Field::Country,
        Field::AdFormat,
        Field::AdUnit,
        Field::Advertiser,
        Field::Domain,
        Field::Device,
        Field::Browser,
        Field::Requests,
        Field::Impressions,
        Field::Clicks,
        Field::Ctr,
        Field::Ecpm,
        Field::Revenue,
        Field::ViewableImpressions,
        Field::ViewabilityRate,
        Field::MeasurableImpressions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Website => "website",
            Field::Country => "country",
            Field::AdFormat => "adFormat",
            Field::AdUnit => "adUnit",
            Field::Advertiser => "advertiser",
            Field::Domain => "domain",
            Field::Device => "device",
            Field::Browser => "browser",
            Field::Requests => "requests",
            Field::Impressions => "impressions",
            Field::Clicks => "clicks",
            Field::Ctr => "ctr",
            Field::Ecpm => "ecpm",
            Field::Revenue => "revenue",
            Field::ViewableImpressions => "viewableImpressions",
            Field::ViewabilityRate => "viewabilityRate",
            Field::MeasurableImpressions => "measurableImpressions",
        }
    }

    /// Raw alias spellings observed across exporters, most specific first.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Date => &["日期", "Date"],
            Field::Website => &["网站", "Website"],
            Field::Country => &["国家/地区", "国家", "Country"],
            Field::AdFormat => &["广告资源格式", "广告格式", "Ad Format"],
            Field::AdUnit => &["广告单元（所有级别）", "广告单元", "Ad Unit"],
            Field::Advertiser => &["广告客户（已分类）", "广告客户", "Advertiser"],
            Field::Domain => &["广告客户网域", "域名", "Domain"],
            Field::Device => &["设备", "Device"],
            Field::Browser => &["浏览器", "Browser"],
            Field::Requests => &["Ad Exchange 请求总数", "请求数", "Requests"],
            Field::Impressions => &["Ad Exchange 展示次数", "展示数", "Impressions"],
            Field::Clicks => &["Ad Exchange 点击次数", "点击数", "Clicks"],
            Field::Ctr => &["Ad Exchange 点击率", "点击率", "CTR"],
            Field::Ecpm => &["Ad Exchange 平均 eCPM", "eCPM", "CPM"],
            Field::Revenue => &["Ad Exchange 收入", "收入", "Revenue"],
            Field::ViewableImpressions => &[
                "Ad Exchange Active View可见展示次数",
                "可见展示",
                "Viewable Impressions",
            ],
            Field::ViewabilityRate => &[
                "Ad Exchange Active View可见展示次数百分比",
                "可见率",
                "Viewability Rate",
            ],
            Field::MeasurableImpressions => &[
                "Ad Exchange Active View可衡量展示次数",
                "可衡量展示",
                "Measurable Impressions",
            ],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn normalize(cell: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    let strip = STRIP.get_or_init(|| Regex::new(r"[^a-z0-9\p{Han}]+").expect("valid pattern"));
    strip
        .replace_all(&cell.trim().to_lowercase(), "")
        .into_owned()
}

fn alias_table() -> &'static Vec<(Field, Vec<String>)> {
    static TABLE: OnceLock<Vec<(Field, Vec<String>)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Field::ALL
            .iter()
            .map(|field| {
                (
                    *field,
                    field.aliases().iter().map(|alias| normalize(alias)).collect(),
                )
            })
            .collect()
    })
}

/// Immutable mapping from canonical field to input column index, built once
/// per file from the header row.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    indices: HashMap<Field, usize>,
    width: usize,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Self {
        let mut indices: HashMap<Field, usize> = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            let normalized = normalize(header);
            if normalized.is_empty() {
                continue;
            }
            if let Some(field) = match_field(&normalized, &indices) {
                debug!("Mapped column '{header}' to {field} at index {index}");
                indices.insert(field, index);
            }
        }
        Self {
            indices,
            width: headers.len(),
        }
    }

    pub fn index_of(&self, field: Field) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.indices.contains_key(&field)
    }

    /// Number of columns in the header row this map was built from.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn mapped_count(&self) -> usize {
        self.indices.len()
    }

    /// Required fields (date, website) absent from the map.
    pub fn missing_required(&self) -> Vec<Field> {
        [Field::Date, Field::Website]
            .into_iter()
            .filter(|field| !self.contains(*field))
            .collect()
    }
}

fn match_field(header: &str, taken: &HashMap<Field, usize>) -> Option<Field> {
    let table = alias_table();
    // Tier 1: exact normalized match.
    for (field, aliases) in table {
        if !taken.contains_key(field) && aliases.iter().any(|alias| alias == header) {
            return Some(*field);
        }
    }
    // Tier 2: the header contains an alias.
    for (field, aliases) in table {
        if !taken.contains_key(field) && aliases.iter().any(|alias| header.contains(alias.as_str()))
        {
            return Some(*field);
        }
    }
    // Tier 3: an alias contains the header.
    for (field, aliases) in table {
        if !taken.contains_key(field) && aliases.iter().any(|alias| alias.contains(header)) {
            return Some(*field);
        }
    }
    None
}
