//! The fixed tool surface over the sales table.
//!
//! Four pure read functions, each independently invocable by the agent.
//! Argument structs deserialize straight from the model's JSON tool_args;
//! every function returns formatted Japanese text (the chart tool returns
//! an inline data URI).

use chrono::NaiveDate;
use serde::Deserialize;

use super::chart;
use super::data::{Metric, SalesTable};
use super::period::Period;
use crate::core::errors::ApiError;

fn default_top_n() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct TopSellingArgs {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendChartArgs {
    /// "daily" or "monthly".
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ComparePeriodsArgs {
    pub start_date1: String,
    pub end_date1: String,
    pub start_date2: String,
    pub end_date2: String,
    #[serde(default)]
    pub metric: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductDetailsArgs {
    pub product_name: String,
    #[serde(default)]
    pub period: Option<String>,
}

/// Top N products for a period, ranked by the chosen metric.
pub fn top_selling_products(
    table: &SalesTable,
    today: NaiveDate,
    args: TopSellingArgs,
) -> Result<String, ApiError> {
    let metric = Metric::parse(args.metric.as_deref())?;
    let period = Period::parse_opt(args.period.as_deref())?;
    let top_n = args.top_n.max(1);

    let ranked = table.totals_by_product(metric, period.date_range(today));
    if ranked.is_empty() {
        return Ok(format!(
            "{}の売上データはありませんでした。",
            period.label_ja()
        ));
    }

    let mut out = format!(
        "{}の{}上位{}商品:\n",
        period.label_ja(),
        metric.label_ja(),
        top_n.min(ranked.len())
    );
    for (rank, (product, value)) in ranked.into_iter().take(top_n).enumerate() {
        out.push_str(&format!(
            "{}. {}: {}\n",
            rank + 1,
            product,
            metric.format_value(value)
        ));
    }
    Ok(out.trim_end().to_string())
}

/// Sales trend as an inline-embeddable line chart.
pub fn sales_trend_chart(table: &SalesTable, args: TrendChartArgs) -> Result<String, ApiError> {
    let bucket = args.period.as_deref().map(str::trim).unwrap_or("daily");

    let points: Vec<(String, f64)> = match bucket {
        "daily" | "" => table
            .daily_totals()
            .into_iter()
            .map(|(date, total)| (date.format("%Y-%m-%d").to_string(), total))
            .collect(),
        "monthly" => table.monthly_totals(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "期間 '{}' は使用できません。'daily' または 'monthly' を指定してください。",
                other
            )))
        }
    };

    if points.is_empty() {
        return Ok("グラフを作成できる売上データがありませんでした。".to_string());
    }

    let title = if bucket == "monthly" {
        "売上トレンド（月次）"
    } else {
        "売上トレンド（日次）"
    };
    Ok(chart::render_line_chart(title, &points))
}

/// Totals for two explicit date ranges and their delta (range2 - range1).
pub fn compare_sales_periods(
    table: &SalesTable,
    args: ComparePeriodsArgs,
) -> Result<String, ApiError> {
    let metric = Metric::parse(args.metric.as_deref())?;
    let range1 = parse_range(&args.start_date1, &args.end_date1)?;
    let range2 = parse_range(&args.start_date2, &args.end_date2)?;

    let total1 = table.total(metric, Some(range1));
    let total2 = table.total(metric, Some(range2));
    let delta = total2 - total1;

    let direction = if delta > 0.0 {
        "増加"
    } else if delta < 0.0 {
        "減少"
    } else {
        "変化なし"
    };
    let sign = if delta > 0.0 { "+" } else { "" };

    Ok(format!(
        "期間1（{}〜{}）の{}合計: {}\n期間2（{}〜{}）の{}合計: {}\n差分: {}{}（{}）",
        range1.0,
        range1.1,
        metric.label_ja(),
        metric.format_value(total1),
        range2.0,
        range2.1,
        metric.label_ja(),
        metric.format_value(total2),
        sign,
        metric.format_value(delta),
        direction
    ))
}

/// Detail rows for products whose name contains the query string.
pub fn product_sales_details(
    table: &SalesTable,
    today: NaiveDate,
    args: ProductDetailsArgs,
) -> Result<String, ApiError> {
    let query = args.product_name.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest(
            "product_name を指定してください。".to_string(),
        ));
    }
    let period = Period::parse_opt(args.period.as_deref())?;
    let range = period.date_range(today);

    let mut quantity_total = 0i64;
    let mut amount_total = 0.0f64;
    let mut lines = Vec::new();
    for record in table.records_in(range) {
        if !record.product.contains(query) {
            continue;
        }
        quantity_total += record.quantity;
        amount_total += record.amount;
        lines.push(format!(
            "{} {} 数量{} 金額{:.0}円",
            record.date, record.product, record.quantity, record.amount
        ));
    }

    if lines.is_empty() {
        return Ok(format!(
            "商品「{}」に該当する{}の売上データは見つかりませんでした。",
            query,
            period.label_ja()
        ));
    }

    Ok(format!(
        "商品「{}」の{}の売上明細:\n{}\n合計: 数量{} 金額{:.0}円",
        query,
        period.label_ja(),
        lines.join("\n"),
        quantity_total,
        amount_total
    ))
}

fn parse_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if end_date < start_date {
        return Err(ApiError::BadRequest(format!(
            "終了日 {} が開始日 {} より前になっています。",
            end, start
        )));
    }
    Ok((start_date, end_date))
}

fn parse_date(value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "日付 '{}' が不正です。'YYYY-MM-DD' 形式で指定してください。",
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sales::data::tests::fixture_table;
    use crate::sales::period::PERIOD_KEYWORDS;

    fn today() -> NaiveDate {
        // A Thursday; the fixture has rows on 2023-06-14 and 2023-06-15.
        NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
    }

    #[test]
    fn top_selling_ranks_by_amount_by_default() {
        let table = fixture_table();
        let out = top_selling_products(
            &table,
            today(),
            TopSellingArgs {
                top_n: 3,
                metric: None,
                period: None,
            },
        )
        .unwrap();

        assert!(out.contains("売上金額"));
        assert!(out.contains("1. アウターA: 8000円"));
    }

    #[test]
    fn top_selling_respects_quantity_metric_and_period() {
        let table = fixture_table();
        let out = top_selling_products(
            &table,
            today(),
            TopSellingArgs {
                top_n: 5,
                metric: Some("quantity".to_string()),
                period: Some("this_month".to_string()),
            },
        )
        .unwrap();

        // June rows only; the shirt sold 5 units this month.
        assert!(out.contains("販売点数"));
        assert!(out.contains("1. シャツ: 5点"));
        assert!(!out.contains("パンツ"));
    }

    #[test]
    fn every_period_keyword_filters_rows_to_its_range() {
        let table = fixture_table();
        for keyword in PERIOD_KEYWORDS {
            let period = Period::parse(keyword).unwrap();
            let range = period.date_range(today());
            let out = top_selling_products(
                &table,
                today(),
                TopSellingArgs {
                    top_n: 100,
                    metric: None,
                    period: Some(keyword.to_string()),
                },
            )
            .unwrap();

            for record in table.records_in(None) {
                let in_range = match range {
                    Some((start, end)) => record.date >= start && record.date <= end,
                    None => true,
                };
                if !in_range {
                    // Products sold only outside the range must not show up.
                    let sold_in_range = table
                        .records_in(range)
                        .any(|r| r.product == record.product);
                    if !sold_in_range {
                        assert!(
                            !out.contains(&format!("{}:", record.product)),
                            "{} leaked into period {}",
                            record.product,
                            keyword
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn unknown_period_is_rejected() {
        let table = fixture_table();
        let err = top_selling_products(
            &table,
            today(),
            TopSellingArgs {
                top_n: 5,
                metric: None,
                period: Some("past_decade".to_string()),
            },
        )
        .expect_err("must reject");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn comparison_reports_the_delta_between_disjoint_ranges() {
        // Week 1 totals 1000, week 2 totals 1500.
        let table = fixture_table();
        let out = compare_sales_periods(
            &table,
            ComparePeriodsArgs {
                start_date1: "2023-01-01".to_string(),
                end_date1: "2023-01-07".to_string(),
                start_date2: "2023-01-08".to_string(),
                end_date2: "2023-01-14".to_string(),
                metric: Some("amount".to_string()),
            },
        )
        .unwrap();

        assert!(out.contains("期間1（2023-01-01〜2023-01-07）の売上金額合計: 1000円"));
        assert!(out.contains("期間2（2023-01-08〜2023-01-14）の売上金額合計: 1500円"));
        assert!(out.contains("差分: +500円（増加）"));
    }

    #[test]
    fn comparison_rejects_inverted_ranges() {
        let table = fixture_table();
        let err = compare_sales_periods(
            &table,
            ComparePeriodsArgs {
                start_date1: "2023-01-07".to_string(),
                end_date1: "2023-01-01".to_string(),
                start_date2: "2023-01-08".to_string(),
                end_date2: "2023-01-14".to_string(),
                metric: None,
            },
        )
        .expect_err("must reject");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn product_details_match_substrings_within_period() {
        let table = fixture_table();
        let out = product_sales_details(
            &table,
            today(),
            ProductDetailsArgs {
                product_name: "アウター".to_string(),
                period: Some("this_month".to_string()),
            },
        )
        .unwrap();

        assert!(out.contains("アウターA"));
        assert!(out.contains("アウターB"));
        // January outer sales fall outside this_month.
        assert!(!out.contains("2023-01-02"));
        assert!(out.contains("合計: 数量3 金額13000円"));
    }

    #[test]
    fn product_details_without_match_say_so() {
        let table = fixture_table();
        let out = product_sales_details(
            &table,
            today(),
            ProductDetailsArgs {
                product_name: "靴下".to_string(),
                period: None,
            },
        )
        .unwrap();
        assert!(out.contains("見つかりませんでした"));
    }

    #[test]
    fn trend_chart_returns_a_data_uri() {
        let table = fixture_table();
        let out = sales_trend_chart(
            &table,
            TrendChartArgs {
                period: Some("monthly".to_string()),
            },
        )
        .unwrap();
        assert!(out.starts_with(chart::DATA_URI_PREFIX));
    }

    #[test]
    fn trend_chart_rejects_unknown_bucket() {
        let table = fixture_table();
        let err = sales_trend_chart(
            &table,
            TrendChartArgs {
                period: Some("hourly".to_string()),
            },
        )
        .expect_err("must reject");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
