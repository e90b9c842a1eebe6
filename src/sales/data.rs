//! Sales records and the read-only aggregation API over them.
//!
//! The CSV is loaded once at startup and never mutated afterwards. Header
//! names are accepted in Japanese or English; the date column is parsed to
//! a calendar date.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Quantity,
    Amount,
}

impl Metric {
    /// Accepts the fixed metric vocabulary; anything else is rejected.
    pub fn parse(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Metric::Amount),
            Some("amount") | Some("金額") => Ok(Metric::Amount),
            Some("quantity") | Some("数量") => Ok(Metric::Quantity),
            Some(other) => Err(ApiError::BadRequest(format!(
                "metric '{}' は使用できません。'amount' または 'quantity' を指定してください。",
                other
            ))),
        }
    }

    pub fn label_ja(&self) -> &'static str {
        match self {
            Metric::Quantity => "販売点数",
            Metric::Amount => "売上金額",
        }
    }

    pub fn format_value(&self, value: f64) -> String {
        match self {
            Metric::Quantity => format!("{:.0}点", value),
            Metric::Amount => format!("{:.0}円", value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub product: String,
    pub quantity: i64,
    pub amount: f64,
}

impl SalesRecord {
    pub fn metric_value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Quantity => self.quantity as f64,
            Metric::Amount => self.amount,
        }
    }
}

#[derive(Debug)]
pub struct SalesTable {
    records: Vec<SalesRecord>,
}

impl SalesTable {
    /// Loads the sales CSV. A missing or empty file is an error; rows that
    /// fail to parse are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ApiError::Internal(format!(
                "売上データファイル '{}' が見つかりません: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_csv(&contents)
    }

    pub fn from_csv(contents: &str) -> Result<Self, ApiError> {
        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| ApiError::BadRequest("売上データが空です".to_string()))?;
        let columns = ColumnMap::from_header(header)?;

        let mut records = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            match columns.parse_record(&fields) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!("skipping sales row {}: {}", line_no + 2, err);
                }
            }
        }

        if records.is_empty() {
            return Err(ApiError::BadRequest(
                "売上データに有効な行がありません".to_string(),
            ));
        }

        Ok(Self { records })
    }

    #[cfg(test)]
    pub fn from_records(records: Vec<SalesRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records_in(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> impl Iterator<Item = &SalesRecord> {
        self.records
            .iter()
            .filter(move |r| match range {
                Some((start, end)) => r.date >= start && r.date <= end,
                None => true,
            })
    }

    pub fn total(&self, metric: Metric, range: Option<(NaiveDate, NaiveDate)>) -> f64 {
        self.records_in(range).map(|r| r.metric_value(metric)).sum()
    }

    /// Per-product totals, highest first.
    pub fn totals_by_product(
        &self,
        metric: Metric,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Vec<(String, f64)> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for record in self.records_in(range) {
            *totals.entry(record.product.clone()).or_insert(0.0) += record.metric_value(metric);
        }

        let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// Daily amount totals in date order.
    pub fn daily_totals(&self) -> Vec<(NaiveDate, f64)> {
        let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for record in &self.records {
            *totals.entry(record.date).or_insert(0.0) += record.amount;
        }
        totals.into_iter().collect()
    }

    /// Monthly amount totals keyed as `YYYY-MM`, in month order.
    pub fn monthly_totals(&self) -> Vec<(String, f64)> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for record in &self.records {
            let key = format!("{:04}-{:02}", record.date.year(), record.date.month());
            *totals.entry(key).or_insert(0.0) += record.amount;
        }
        totals.into_iter().collect()
    }
}

struct ColumnMap {
    date: usize,
    product: usize,
    quantity: Option<usize>,
    amount: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &str) -> Result<Self, ApiError> {
        let names = split_csv_line(header);
        let find = |candidates: &[&str]| {
            names
                .iter()
                .position(|name| candidates.contains(&name.trim()))
        };

        let date = find(&["日付", "date", "Date"])
            .ok_or_else(|| ApiError::BadRequest("売上データに日付列がありません".to_string()))?;
        let product = find(&["商品名", "product", "item"])
            .ok_or_else(|| ApiError::BadRequest("売上データに商品名列がありません".to_string()))?;
        let quantity = find(&["数量", "quantity", "qty"]);
        let amount = find(&["金額", "amount", "sales"]);

        if quantity.is_none() && amount.is_none() {
            return Err(ApiError::BadRequest(
                "売上データに数量列も金額列もありません".to_string(),
            ));
        }

        Ok(Self {
            date,
            product,
            quantity,
            amount,
        })
    }

    fn parse_record(&self, fields: &[String]) -> Result<SalesRecord, ApiError> {
        let field = |idx: usize| fields.get(idx).map(|s| s.trim()).unwrap_or("");

        let date = parse_date(field(self.date))?;
        let product = field(self.product).to_string();
        if product.is_empty() {
            return Err(ApiError::BadRequest("商品名が空です".to_string()));
        }

        let quantity = match self.quantity {
            Some(idx) => field(idx)
                .parse::<i64>()
                .map_err(|e| ApiError::BadRequest(format!("数量が不正です: {}", e)))?,
            None => 0,
        };
        let amount = match self.amount {
            Some(idx) => field(idx)
                .parse::<f64>()
                .map_err(|e| ApiError::BadRequest(format!("金額が不正です: {}", e)))?,
            None => 0.0,
        };

        Ok(SalesRecord {
            date,
            product,
            quantity,
            amount,
        })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, ApiError> {
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    Err(ApiError::BadRequest(format!("日付が不正です: '{}'", value)))
}

/// Minimal CSV field splitting with double-quote support.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(date: &str, product: &str, quantity: i64, amount: f64) -> SalesRecord {
        SalesRecord {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date"),
            product: product.to_string(),
            quantity,
            amount,
        }
    }

    pub(crate) fn fixture_table() -> SalesTable {
        SalesTable::from_records(vec![
            record("2023-01-02", "アウター", 2, 400.0),
            record("2023-01-05", "シャツ", 3, 600.0),
            record("2023-01-09", "アウター", 1, 700.0),
            record("2023-01-12", "パンツ", 4, 800.0),
            record("2023-06-01", "アウターA", 2, 8000.0),
            record("2023-06-14", "アウターB", 1, 5000.0),
            record("2023-06-15", "シャツ", 5, 2500.0),
        ])
    }

    #[test]
    fn parses_japanese_headers() {
        let table = SalesTable::from_csv(
            "日付,商品名,数量,金額\n2023-06-01,アウター,2,8000\n2023/06/02,シャツ,1,1500\n",
        )
        .expect("parse");
        assert_eq!(table.len(), 2);
        assert_eq!(table.total(Metric::Amount, None), 9500.0);
        assert_eq!(table.total(Metric::Quantity, None), 3.0);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let table = SalesTable::from_csv(
            "date,product,quantity,amount\n2023-06-01,outer,2,8000\nnot-a-date,shirt,1,1500\n",
        )
        .expect("parse");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn missing_metric_columns_is_an_error() {
        let err = SalesTable::from_csv("日付,商品名\n2023-06-01,アウター\n")
            .expect_err("must fail");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn totals_by_product_rank_descending() {
        let table = fixture_table();
        let ranked = table.totals_by_product(Metric::Amount, None);
        assert_eq!(ranked[0].0, "アウターA");
        assert!(ranked[0].1 >= ranked[1].1);
    }

    #[test]
    fn range_filter_is_inclusive() {
        let table = fixture_table();
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 9).unwrap();
        let total = table.total(Metric::Amount, Some((start, end)));
        assert_eq!(total, 400.0 + 600.0 + 700.0);
    }

    #[test]
    fn quoted_fields_are_supported() {
        let fields = split_csv_line(r#"2023-06-01,"コート, 冬物",1,9800"#);
        assert_eq!(fields[1], "コート, 冬物");
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        assert!(Metric::parse(Some("revenue")).is_err());
        assert_eq!(Metric::parse(None).unwrap(), Metric::Amount);
    }
}
