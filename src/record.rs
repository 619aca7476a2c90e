//! Row normalization: raw tokenized fields to typed records.
//!
//! A row either becomes a [`NormalizedRecord`] or is rejected with a
//! [`RejectReason`]; nothing here aborts the stream. Optional fields degrade
//! to `None` (numerics) or `"Unknown"` (strings) on parse failure. Suspicious
//! values are flagged in the [`QualityReport`] but never rewritten; guessing
//! replacements for business data was ruled out, so the raw value is kept and
//! the flag travels with the analysis result instead.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::columns::{ColumnMap, Field};

pub const UNKNOWN: &str = "Unknown";

const EXAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub date: NaiveDate,
    pub website: String,
    pub country: String,
    pub ad_format: String,
    pub ad_unit: String,
    pub advertiser: String,
    pub domain: String,
    pub device: String,
    pub browser: String,
    pub requests: Option<u64>,
    pub impressions: Option<u64>,
    pub clicks: Option<u64>,
    pub ctr: Option<f64>,
    pub ecpm: Option<f64>,
    pub revenue: Option<f64>,
    pub viewable_impressions: Option<u64>,
    pub viewability_rate: Option<f64>,
    pub measurable_impressions: Option<u64>,
    pub fill_rate: Option<f64>,
    pub arpu: Option<f64>,
}

/// Why a row was dropped instead of normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    FieldCount,
    MissingDate,
    BadDate,
    MissingWebsite,
}

/// Detected-but-not-corrected data oddities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    PlaceholderCountry,
    CountryLooksLikeAdFormat,
    WebsiteLooksLikeCountry,
    AdFormatLooksLikeCountry,
    NonCanonicalDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueEntry {
    pub kind: IssueKind,
    pub count: u64,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCounts {
    pub field_count: u64,
    pub missing_date: u64,
    pub bad_date: u64,
    pub missing_website: u64,
}

impl RejectCounts {
    pub fn total(&self) -> u64 {
        self.field_count + self.missing_date + self.bad_date + self.missing_website
    }

    fn bump(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::FieldCount => self.field_count += 1,
            RejectReason::MissingDate => self.missing_date += 1,
            RejectReason::BadDate => self.bad_date += 1,
            RejectReason::MissingWebsite => self.missing_website += 1,
        }
    }
}

/// Per-file data-quality tally surfaced with the analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub rejected_rows: RejectCounts,
    pub issues: Vec<IssueEntry>,
}

impl QualityReport {
    fn record_issue(&mut self, kind: IssueKind, example: &str) {
        let entry = match self.issues.iter_mut().find(|entry| entry.kind == kind) {
            Some(entry) => entry,
            None => {
                self.issues.push(IssueEntry {
                    kind,
                    count: 0,
                    examples: Vec::new(),
                });
                self.issues.last_mut().expect("just pushed")
            }
        };
        entry.count += 1;
        if entry.examples.len() < EXAMPLE_LIMIT {
            entry.examples.push(example.to_string());
        }
    }
}

pub struct Normalizer {
    map: ColumnMap,
    quality: QualityReport,
}

impl Normalizer {
    pub fn new(map: ColumnMap) -> Self {
        Self {
            map,
            quality: QualityReport::default(),
        }
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.map
    }

    pub fn quality(&self) -> &QualityReport {
        &self.quality
    }

    pub fn into_quality(self) -> QualityReport {
        self.quality
    }

    pub fn normalize(&mut self, raw: &[String]) -> Result<NormalizedRecord, RejectReason> {
        match self.normalize_inner(raw) {
            Ok(record) => Ok(record),
            Err(reason) => {
                self.quality.rejected_rows.bump(reason);
                Err(reason)
            }
        }
    }

    fn normalize_inner(&mut self, raw: &[String]) -> Result<NormalizedRecord, RejectReason> {
        if raw.len() != self.map.width() {
            return Err(RejectReason::FieldCount);
        }

        let date_raw = raw_text(raw, &self.map, Field::Date).ok_or(RejectReason::MissingDate)?;
        let (date, canonical) = parse_report_date(date_raw).ok_or(RejectReason::BadDate)?;
        if !canonical {
            self.quality
                .record_issue(IssueKind::NonCanonicalDate, date_raw);
        }
        let website = raw_text(raw, &self.map, Field::Website)
            .ok_or(RejectReason::MissingWebsite)?
            .to_string();

        let country = text_or_unknown(raw, &self.map, Field::Country);
        let ad_format = text_or_unknown(raw, &self.map, Field::AdFormat);
        let ad_unit = text_or_unknown(raw, &self.map, Field::AdUnit);
        let advertiser = text_or_unknown(raw, &self.map, Field::Advertiser);
        let domain = text_or_unknown(raw, &self.map, Field::Domain);
        let device = text_or_unknown(raw, &self.map, Field::Device);
        let browser = text_or_unknown(raw, &self.map, Field::Browser);

        let requests = counter(raw, &self.map, Field::Requests);
        let impressions = counter(raw, &self.map, Field::Impressions);
        let clicks = counter(raw, &self.map, Field::Clicks);
        let viewable_impressions = counter(raw, &self.map, Field::ViewableImpressions);
        let measurable_impressions = counter(raw, &self.map, Field::MeasurableImpressions);
        let ctr = ratio(raw, &self.map, Field::Ctr);
        let ecpm = ratio(raw, &self.map, Field::Ecpm);
        let revenue = ratio(raw, &self.map, Field::Revenue);
        let viewability_rate = ratio(raw, &self.map, Field::ViewabilityRate);

        let fill_rate = match (impressions, requests) {
            (Some(impressions), Some(requests)) if requests > 0 => {
                Some(impressions as f64 / requests as f64 * 100.0)
            }
            _ => None,
        };
        let arpu = match (revenue, requests) {
            (Some(revenue), Some(requests)) if requests > 0 => {
                Some(revenue / requests as f64 * 1000.0)
            }
            _ => None,
        };

        if raw_text(raw, &self.map, Field::Country).is_some() {
            self.flag_country(&country);
        }
        self.flag_website(&website);
        if raw_text(raw, &self.map, Field::AdFormat).is_some() {
            self.flag_ad_format(&ad_format);
        }

        Ok(NormalizedRecord {
            date,
            website,
            country,
            ad_format,
            ad_unit,
            advertiser,
            domain,
            device,
            browser,
            requests,
            impressions,
            clicks,
            ctr,
            ecpm,
            revenue,
            viewable_impressions,
            viewability_rate,
            measurable_impressions,
            fill_rate,
            arpu,
        })
    }

    fn flag_country(&mut self, country: &str) {
        if country.eq_ignore_ascii_case("unknown")
            || (!country.is_empty() && country.chars().all(|c| c.is_ascii_digit()))
        {
            self.quality
                .record_issue(IssueKind::PlaceholderCountry, country);
            return;
        }
        let lowered = country.to_lowercase();
        const AD_FORMAT_TERMS: &[&str] = &[
            "广告",
            "插页",
            "横幅",
            "视频",
            "原生",
            "激励",
            "banner",
            "interstitial",
            "rewarded",
            "native",
        ];
        if AD_FORMAT_TERMS.iter().any(|term| lowered.contains(term)) {
            self.quality
                .record_issue(IssueKind::CountryLooksLikeAdFormat, country);
        }
    }

    fn flag_website(&mut self, website: &str) {
        const COUNTRY_CODES: &[&str] = &[
            "US", "CN", "JP", "KR", "UK", "DE", "FR", "IT", "ES", "BR", "IN", "RU", "CA", "AU",
        ];
        let looks_like_code = website.len() == 2 && website.chars().all(|c| c.is_ascii_alphabetic());
        if looks_like_code || COUNTRY_CODES.contains(&website.to_uppercase().as_str()) {
            self.quality
                .record_issue(IssueKind::WebsiteLooksLikeCountry, website);
        }
    }

    fn flag_ad_format(&mut self, ad_format: &str) {
        const COUNTRY_NAMES: &[&str] = &[
            "中国",
            "美国",
            "日本",
            "韩国",
            "英国",
            "德国",
            "法国",
            "意大利",
            "西班牙",
            "巴西",
            "印度",
            "俄罗斯",
            "加拿大",
            "澳大利亚",
            "United States",
            "China",
            "Japan",
            "Germany",
        ];
        if COUNTRY_NAMES.contains(&ad_format) {
            self.quality
                .record_issue(IssueKind::AdFormatLooksLikeCountry, ad_format);
        }
    }
}

fn raw_text<'a>(raw: &'a [String], map: &ColumnMap, field: Field) -> Option<&'a str> {
    map.index_of(field)
        .and_then(|idx| raw.get(idx))
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
}

fn text_or_unknown(raw: &[String], map: &ColumnMap, field: Field) -> String {
    raw_text(raw, map, field)
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn counter(raw: &[String], map: &ColumnMap, field: Field) -> Option<u64> {
    raw_text(raw, map, field).and_then(parse_counter)
}

fn ratio(raw: &[String], map: &ColumnMap, field: Field) -> Option<f64> {
    raw_text(raw, map, field).and_then(parse_ratio)
}

fn parse_counter(value: &str) -> Option<u64> {
    let cleaned = value.replace(',', "");
    if let Ok(parsed) = cleaned.parse::<u64>() {
        return Some(parsed);
    }
    // Some exporters emit counters with a decimal point.
    match cleaned.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => Some(parsed as u64),
        _ => None,
    }
}

fn parse_ratio(value: &str) -> Option<f64> {
    let cleaned = value.trim_end_matches('%').trim().replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => Some(parsed),
        _ => None,
    }
}

/// Parse a report date, returning whether the canonical `%Y-%m-%d` form
/// matched; other accepted forms are flagged upstream.
pub fn parse_report_date(value: &str) -> Option<(NaiveDate, bool)> {
    if let Ok(parsed) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some((parsed, true));
    }
    const FALLBACK_FORMATS: &[&str] = &["%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%Y年%m月%d日"];
    for fmt in FALLBACK_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some((parsed, false));
        }
    }
    None
}
