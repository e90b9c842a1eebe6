//! Registry mapping tool names to typed functions over the sales table.
//!
//! The reasoning loop only sees names and JSON arguments; argument structs
//! are deserialized here so type errors become ordinary tool failures the
//! model can react to.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::core::errors::ApiError;
use crate::sales::tools::{
    compare_sales_periods, product_sales_details, sales_trend_chart, top_selling_products,
};
use crate::sales::SalesTable;

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOL_SPECS: [ToolSpec; 4] = [
    ToolSpec {
        name: "get_top_selling_products",
        description: "売上データから最も売れている商品を抽出します。引数: top_n (上位何件か、デフォルト5)、\
                      metric ('amount' または 'quantity')、period ('today', 'yesterday', 'last_week', \
                      'this_month', 'last_month', 'all'、省略時は 'all')。",
    },
    ToolSpec {
        name: "create_sales_chart",
        description: "売上トレンドの線グラフを作成し、埋め込み可能な画像データURI (data:image/...) として\
                      返します。引数: period ('daily' または 'monthly'、省略時は 'daily')。",
    },
    ToolSpec {
        name: "compare_sales_periods",
        description: "指定された2つの期間の売上を比較し、その結果をテキストで返します。引数: start_date1, \
                      end_date1, start_date2, end_date2 ('YYYY-MM-DD' 形式)、metric ('amount' または 'quantity')。",
    },
    ToolSpec {
        name: "get_product_sales_details",
        description: "指定された商品の詳細な売上データを返します。商品名の一部でも検索可能です。引数: \
                      product_name、period ('today', 'yesterday', 'last_week', 'this_month', 'last_month', \
                      'all'、省略時は 'all')。",
    },
];

#[derive(Clone)]
pub struct ToolRegistry {
    table: Arc<SalesTable>,
}

impl ToolRegistry {
    pub fn new(table: Arc<SalesTable>) -> Self {
        Self { table }
    }

    pub fn specs(&self) -> &'static [ToolSpec] {
        &TOOL_SPECS
    }

    pub fn invoke(&self, name: &str, args: &Value, today: NaiveDate) -> Result<String, ApiError> {
        match name {
            "get_top_selling_products" => {
                top_selling_products(&self.table, today, parse_args(args)?)
            }
            "create_sales_chart" => sales_trend_chart(&self.table, parse_args(args)?),
            "compare_sales_periods" => compare_sales_periods(&self.table, parse_args(args)?),
            "get_product_sales_details" => {
                product_sales_details(&self.table, today, parse_args(args)?)
            }
            _ => Err(ApiError::BadRequest(format!("Unknown tool: {}", name))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ApiError> {
    serde_json::from_value(args.clone())
        .map_err(|e| ApiError::BadRequest(format!("ツール引数が不正です: {}", e)))
}
