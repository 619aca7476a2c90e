//! Multi-key incremental aggregation over the normalized record stream.
//!
//! One [`AggregationState`] exists per ingested file and is folded in record
//! order, one map lookup-or-insert per tracked dimension. Buckets hold
//! additive sums only; eCPM/CTR are computed when buckets are read so
//! rounding never compounds across folds. Only five dimension pairs are
//! materialized; the full cross-product would defeat the point of keeping
//! memory bounded by observed entity cardinality rather than row count.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::record::{NormalizedRecord, UNKNOWN};

/// Additive accumulator for one group key. Created lazily on first sight of
/// the key; `order` is the creation sequence, used to keep top-N ties stable.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub requests: u64,
    order: usize,
}

impl Bucket {
    fn new(order: usize) -> Self {
        Self {
            revenue: 0.0,
            impressions: 0,
            clicks: 0,
            requests: 0,
            order,
        }
    }

    fn add(&mut self, record: &NormalizedRecord) {
        self.revenue += record.revenue.unwrap_or(0.0);
        self.impressions += record.impressions.unwrap_or(0);
        self.clicks += record.clicks.unwrap_or(0);
        self.requests += record.requests.unwrap_or(0);
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// The additive sums, without the creation sequence.
    pub fn sums(&self) -> (f64, u64, u64, u64) {
        (self.revenue, self.impressions, self.clicks, self.requests)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub rows: u64,
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub requests: u64,
}

/// Fixed five-bucket fill-rate histogram over [0, 100] percent. Half-open
/// intervals: a boundary value belongs to the upper bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillRateHistogram {
    counts: [u64; 5],
}

impl FillRateHistogram {
    pub fn record(&mut self, fill_rate: f64) {
        let idx = if fill_rate < 20.0 {
            0
        } else if fill_rate < 40.0 {
            1
        } else if fill_rate < 60.0 {
            2
        } else if fill_rate < 80.0 {
            3
        } else {
            4
        };
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> [u64; 5] {
        self.counts
    }
}

pub struct AggregationState {
    pub totals: Totals,
    pub websites: HashMap<String, Bucket>,
    pub countries: HashMap<String, Bucket>,
    pub devices: HashMap<String, Bucket>,
    pub ad_formats: HashMap<String, Bucket>,
    pub advertisers: HashMap<String, Bucket>,
    pub ad_units: HashMap<String, Bucket>,
    pub domains: HashMap<String, Bucket>,
    pub browsers: HashMap<String, Bucket>,
    pub dates: BTreeMap<NaiveDate, Bucket>,
    pub country_device: HashMap<String, Bucket>,
    pub country_ad_format: HashMap<String, Bucket>,
    pub device_ad_format: HashMap<String, Bucket>,
    pub website_country: HashMap<String, Bucket>,
    pub ad_unit_ad_format: HashMap<String, Bucket>,
    pub fill_rates: FillRateHistogram,
    pub sample: Vec<NormalizedRecord>,
    sample_limit: usize,
    next_order: usize,
}

impl AggregationState {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            totals: Totals::default(),
            websites: HashMap::new(),
            countries: HashMap::new(),
            devices: HashMap::new(),
            ad_formats: HashMap::new(),
            advertisers: HashMap::new(),
            ad_units: HashMap::new(),
            domains: HashMap::new(),
            browsers: HashMap::new(),
            dates: BTreeMap::new(),
            country_device: HashMap::new(),
            country_ad_format: HashMap::new(),
            device_ad_format: HashMap::new(),
            website_country: HashMap::new(),
            ad_unit_ad_format: HashMap::new(),
            fill_rates: FillRateHistogram::default(),
            sample: Vec::new(),
            sample_limit,
            next_order: 0,
        }
    }

    /// Fold one record into every tracked aggregate. O(1) amortized per
    /// dimension; no return value.
    pub fn fold(&mut self, record: &NormalizedRecord) {
        self.totals.rows += 1;
        self.totals.revenue += record.revenue.unwrap_or(0.0);
        self.totals.impressions += record.impressions.unwrap_or(0);
        self.totals.clicks += record.clicks.unwrap_or(0);
        self.totals.requests += record.requests.unwrap_or(0);

        upsert(
            &mut self.websites,
            &mut self.next_order,
            record.website.clone(),
            record,
        );
        upsert(
            &mut self.countries,
            &mut self.next_order,
            record.country.clone(),
            record,
        );
        upsert(
            &mut self.devices,
            &mut self.next_order,
            record.device.clone(),
            record,
        );
        upsert(
            &mut self.ad_formats,
            &mut self.next_order,
            record.ad_format.clone(),
            record,
        );
        upsert(
            &mut self.advertisers,
            &mut self.next_order,
            record.advertiser.clone(),
            record,
        );
        upsert(
            &mut self.domains,
            &mut self.next_order,
            record.domain.clone(),
            record,
        );
        upsert(
            &mut self.browsers,
            &mut self.next_order,
            record.browser.clone(),
            record,
        );
        if record.ad_unit != UNKNOWN {
            upsert(
                &mut self.ad_units,
                &mut self.next_order,
                record.ad_unit.clone(),
                record,
            );
        }

        let date_bucket = match self.dates.entry(record.date) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let bucket = Bucket::new(self.next_order);
                self.next_order += 1;
                entry.insert(bucket)
            }
        };
        date_bucket.add(record);

        upsert(
            &mut self.country_device,
            &mut self.next_order,
            pair_key(&record.country, &record.device),
            record,
        );
        upsert(
            &mut self.country_ad_format,
            &mut self.next_order,
            pair_key(&record.country, &record.ad_format),
            record,
        );
        upsert(
            &mut self.device_ad_format,
            &mut self.next_order,
            pair_key(&record.device, &record.ad_format),
            record,
        );
        upsert(
            &mut self.website_country,
            &mut self.next_order,
            pair_key(&record.website, &record.country),
            record,
        );
        if record.ad_unit != UNKNOWN && record.ad_format != UNKNOWN {
            upsert(
                &mut self.ad_unit_ad_format,
                &mut self.next_order,
                pair_key(&record.ad_unit, &record.ad_format),
                record,
            );
        }

        if let Some(fill_rate) = record.fill_rate {
            self.fill_rates.record(fill_rate);
        }

        if self.sample.len() < self.sample_limit {
            self.sample.push(record.clone());
        }
    }
}

fn upsert(
    map: &mut HashMap<String, Bucket>,
    next_order: &mut usize,
    key: String,
    record: &NormalizedRecord,
) {
    let bucket = map.entry(key).or_insert_with(|| {
        let bucket = Bucket::new(*next_order);
        *next_order += 1;
        bucket
    });
    bucket.add(record);
}

fn pair_key(a: &str, b: &str) -> String {
    format!("{a}|{b}")
}
