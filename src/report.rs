//! End-of-stream extraction: aggregate maps into the durable analysis result.
//!
//! Derived ratios (eCPM, CTR) are computed here, at read time, from the
//! additive bucket sums; a zero impression count yields 0, never NaN or
//! infinity.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{AggregationState, Bucket, FillRateHistogram},
    record::{NormalizedRecord, QualityReport},
};

pub const TOP_WEBSITES: usize = 10;
pub const TOP_COUNTRIES: usize = 10;
pub const TOP_DEVICES: usize = 5;
pub const TOP_AD_FORMATS: usize = 5;
pub const TOP_ADVERTISERS: usize = 10;
pub const TOP_AD_UNITS: usize = 10;
pub const TOP_DOMAINS: usize = 10;
pub const TOP_BROWSERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_rows: u64,
    pub total_revenue: f64,
    pub total_impressions: u64,
    pub total_clicks: u64,
    pub total_requests: u64,
    pub avg_ecpm: f64,
    pub avg_ctr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopItem {
    pub name: String,
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub requests: u64,
    pub avg_ecpm: f64,
    pub ctr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub requests: u64,
    pub avg_ecpm: f64,
    pub ctr: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRateDistribution {
    #[serde(rename = "0-20%")]
    pub p0_20: u64,
    #[serde(rename = "20-40%")]
    pub p20_40: u64,
    #[serde(rename = "40-60%")]
    pub p40_60: u64,
    #[serde(rename = "60-80%")]
    pub p60_80: u64,
    #[serde(rename = "80-100%")]
    pub p80_100: u64,
}

impl From<&FillRateHistogram> for FillRateDistribution {
    fn from(histogram: &FillRateHistogram) -> Self {
        let [p0_20, p20_40, p40_60, p60_80, p80_100] = histogram.counts();
        Self {
            p0_20,
            p20_40,
            p40_60,
            p60_80,
            p80_100,
        }
    }
}

/// Cross-tabulations for the dimension pairs the dashboard consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinationBreakdown {
    pub country_device_combination: Vec<TopItem>,
    pub country_ad_format_combination: Vec<TopItem>,
    pub device_ad_format_combination: Vec<TopItem>,
    pub website_country_combination: Vec<TopItem>,
    pub ad_unit_ad_format_combination: Vec<TopItem>,
}

/// The durable per-file analysis artifact. Created once at end of stream,
/// immutable afterward; a later upload under a new identifier supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub file_id: String,
    pub file_name: String,
    pub summary: Summary,
    pub top_websites: Vec<TopItem>,
    pub top_countries: Vec<TopItem>,
    pub devices: Vec<TopItem>,
    pub ad_formats: Vec<TopItem>,
    pub advertisers: Vec<TopItem>,
    pub ad_units: Vec<TopItem>,
    pub domains: Vec<TopItem>,
    pub browsers: Vec<TopItem>,
    pub daily_trend: Vec<TrendPoint>,
    pub detailed_analytics: CombinationBreakdown,
    pub fill_rate_distribution: FillRateDistribution,
    pub sample_preview: Vec<NormalizedRecord>,
    pub data_quality: QualityReport,
    pub processed_at: DateTime<Utc>,
}

fn safe_ecpm(revenue: f64, impressions: u64) -> f64 {
    if impressions > 0 {
        revenue / impressions as f64 * 1000.0
    } else {
        0.0
    }
}

fn safe_ctr(clicks: u64, impressions: u64) -> f64 {
    if impressions > 0 {
        clicks as f64 / impressions as f64 * 100.0
    } else {
        0.0
    }
}

/// Highest-revenue entries of one aggregate map, ties broken by bucket
/// creation order. Zero-revenue entities carry no ranking signal and are
/// dropped.
pub fn top_items(map: &HashMap<String, Bucket>, limit: usize) -> Vec<TopItem> {
    map.iter()
        .filter(|(_, bucket)| bucket.revenue > 0.0)
        .sorted_by(|a, b| {
            b.1.revenue
                .total_cmp(&a.1.revenue)
                .then_with(|| a.1.order().cmp(&b.1.order()))
        })
        .take(limit)
        .map(|(name, bucket)| TopItem {
            name: name.clone(),
            revenue: bucket.revenue,
            impressions: bucket.impressions,
            clicks: bucket.clicks,
            requests: bucket.requests,
            avg_ecpm: safe_ecpm(bucket.revenue, bucket.impressions),
            ctr: safe_ctr(bucket.clicks, bucket.impressions),
        })
        .collect()
}

pub fn create_summary(
    rows: u64,
    revenue: f64,
    impressions: u64,
    clicks: u64,
    requests: u64,
) -> Summary {
    Summary {
        total_rows: rows,
        total_revenue: revenue,
        total_impressions: impressions,
        total_clicks: clicks,
        total_requests: requests,
        avg_ecpm: safe_ecpm(revenue, impressions),
        avg_ctr: safe_ctr(clicks, impressions),
    }
}

/// One point per observed date, ascending.
pub fn daily_trend(dates: &BTreeMap<NaiveDate, Bucket>) -> Vec<TrendPoint> {
    dates
        .iter()
        .map(|(date, bucket)| TrendPoint {
            date: *date,
            revenue: bucket.revenue,
            impressions: bucket.impressions,
            clicks: bucket.clicks,
            requests: bucket.requests,
            avg_ecpm: safe_ecpm(bucket.revenue, bucket.impressions),
            ctr: safe_ctr(bucket.clicks, bucket.impressions),
        })
        .collect()
}

pub fn build_result(
    file_id: &str,
    file_name: &str,
    state: &AggregationState,
    data_quality: QualityReport,
) -> AnalysisResult {
    AnalysisResult {
        file_id: file_id.to_string(),
        file_name: file_name.to_string(),
        summary: create_summary(
            state.totals.rows,
            state.totals.revenue,
            state.totals.impressions,
            state.totals.clicks,
            state.totals.requests,
        ),
        top_websites: top_items(&state.websites, TOP_WEBSITES),
        top_countries: top_items(&state.countries, TOP_COUNTRIES),
        devices: top_items(&state.devices, TOP_DEVICES),
        ad_formats: top_items(&state.ad_formats, TOP_AD_FORMATS),
        advertisers: top_items(&state.advertisers, TOP_ADVERTISERS),
        ad_units: top_items(&state.ad_units, TOP_AD_UNITS),
        domains: top_items(&state.domains, TOP_DOMAINS),
        browsers: top_items(&state.browsers, TOP_BROWSERS),
        daily_trend: daily_trend(&state.dates),
        detailed_analytics: CombinationBreakdown {
            country_device_combination: top_items(&state.country_device, usize::MAX),
            country_ad_format_combination: top_items(&state.country_ad_format, usize::MAX),
            device_ad_format_combination: top_items(&state.device_ad_format, usize::MAX),
            website_country_combination: top_items(&state.website_country, usize::MAX),
            ad_unit_ad_format_combination: top_items(&state.ad_unit_ad_format, usize::MAX),
        },
        fill_rate_distribution: FillRateDistribution::from(&state.fill_rates),
        sample_preview: state.sample.clone(),
        data_quality,
        processed_at: Utc::now(),
    }
}
