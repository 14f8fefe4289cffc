// Business Metrics Collector
// Sales, order status, customers, product rankings, inventory and monthly revenue from the shop schema

use crate::config::BusinessConfig;
use crate::database::{self, round2, Database, Row};
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::Result;
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Order states excluded from sales and revenue figures
const EXCLUDED_STATUSES: &str = "('cancelled', 'failed')";

/// A half-open reporting window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub name: &'static str,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    fn params(&self) -> [Value; 2] {
        [json!(sql_timestamp(self.start)), json!(sql_timestamp(self.end))]
    }
}

fn sql_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn month_start(year: i32, month: i32) -> Option<NaiveDate> {
    let (year, month) = match month {
        0 => (year - 1, 12),
        13 => (year + 1, 1),
        m => (year, m),
    };
    NaiveDate::from_ymd_opt(year, month as u32, 1)
}

/// Today, yesterday, this week (from Monday), this month and last month
pub fn sales_periods(now: DateTime<Utc>) -> Option<Vec<Period>> {
    let today = now.date_naive();
    let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN);

    let yesterday = today.checked_sub_days(Days::new(1))?;
    let tomorrow = today.checked_add_days(Days::new(1))?;
    let week_start =
        today.checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())))?;
    let week_end = week_start.checked_add_days(Days::new(7))?;

    let month = today.month() as i32;
    let this_month = month_start(today.year(), month)?;
    let next_month = month_start(today.year(), month + 1)?;
    let last_month = month_start(today.year(), month - 1)?;

    Some(vec![
        Period { name: "today", start: midnight(today), end: midnight(tomorrow) },
        Period { name: "yesterday", start: midnight(yesterday), end: midnight(today) },
        Period { name: "this_week", start: midnight(week_start), end: midnight(week_end) },
        Period { name: "this_month", start: midnight(this_month), end: midnight(next_month) },
        Period { name: "last_month", start: midnight(last_month), end: midnight(this_month) },
    ])
}

/// Percentage change, `None` when there is no prior value to compare with
pub fn growth_rate(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some(round2((current - previous) / previous * 100.0))
    }
}

/// Values of one section, with the failures of its individual queries
#[derive(Default)]
struct Section {
    values: Map<String, Value>,
    errors: Vec<String>,
}

impl Section {
    fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Keep the query's value, or the fallback plus the error text
    fn take<T: Into<Value>>(&mut self, key: &str, result: Result<T>, fallback: T) {
        match result {
            Ok(value) => self.put(key, value),
            Err(e) => {
                warn!(collector = "business", metric = %key, error = %e, "Business query failed");
                self.errors.push(format!("{}: {}", key, e));
                self.put(key, fallback);
            }
        }
    }

    fn finish(mut self) -> Value {
        if !self.errors.is_empty() {
            self.values
                .insert("error".to_string(), Value::String(self.errors.join("; ")));
        }
        Value::Object(self.values)
    }
}

/// Shop-schema collector
pub struct BusinessCollector {
    database: Arc<dyn Database>,
    config: BusinessConfig,
}

impl BusinessCollector {
    pub fn new(database: Arc<dyn Database>, config: BusinessConfig) -> Self {
        Self { database, config }
    }

    async fn scalar(&self, sql: &str, params: &[Value]) -> Result<f64> {
        let rows = self.database.query(sql, params).await?;
        Ok(database::first_value(&rows)
            .and_then(database::as_f64)
            .unwrap_or(0.0))
    }

    async fn rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>> {
        let rows: Vec<Row> = self.database.query(sql, params).await?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    fn limit(&self) -> Value {
        json!(self.config.ranking_limit)
    }

    async fn sales(&self, periods: &[Period]) -> Value {
        let mut section = Section::default();
        let mut revenue_by_period = std::collections::HashMap::new();

        for period in periods {
            let sql = format!(
                "SELECT COUNT(*) AS orders, COALESCE(SUM(total), 0) AS revenue, \
                 COALESCE(AVG(total), 0) AS average_order FROM orders \
                 WHERE created_at >= ? AND created_at < ? AND status NOT IN {}",
                EXCLUDED_STATUSES
            );
            let result = self.database.query(&sql, &period.params()).await.map(|rows| {
                let revenue = round2(database::scalar_f64(&rows, "revenue"));
                revenue_by_period.insert(period.name, revenue);
                json!({
                    "orders": database::scalar_i64(&rows, "orders"),
                    "revenue": revenue,
                    "average_order": round2(database::scalar_f64(&rows, "average_order")),
                })
            });
            section.take(
                period.name,
                result,
                json!({"orders": 0, "revenue": 0.0, "average_order": 0.0}),
            );
        }

        let growth = |current: &str, previous: &str| match (
            revenue_by_period.get(current),
            revenue_by_period.get(previous),
        ) {
            (Some(c), Some(p)) => growth_rate(*c, *p),
            _ => None,
        };
        section.put(
            "growth",
            json!({
                "daily_percent": growth("today", "yesterday"),
                "monthly_percent": growth("this_month", "last_month"),
            }),
        );

        section.finish()
    }

    async fn order_status(&self, since: &Value) -> Value {
        let mut section = Section::default();
        let result = self
            .database
            .query(
                "SELECT status, COUNT(*) AS count FROM orders WHERE created_at >= ? GROUP BY status",
                &[since.clone()],
            )
            .await
            .map(|rows| {
                let mut by_status = Map::new();
                let mut total = 0i64;
                for row in &rows {
                    let status = row
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let count = row.get("count").and_then(database::as_f64).unwrap_or(0.0) as i64;
                    total += count;
                    by_status.insert(status, json!(count));
                }
                json!({"by_status": by_status, "total": total})
            });

        match result {
            Ok(Value::Object(map)) => section.values = map,
            other => section.take("by_status", other, json!({})),
        }
        section.finish()
    }

    async fn customers(&self, month_start: &Value, since: &Value) -> Value {
        let mut section = Section::default();

        let total = self.scalar("SELECT COUNT(*) AS count FROM customers", &[]).await;
        let total_value = *total.as_ref().unwrap_or(&0.0);
        section.take("total", total, 0.0);

        section.take(
            "new_this_month",
            self.scalar(
                "SELECT COUNT(*) AS count FROM customers WHERE created_at >= ?",
                &[month_start.clone()],
            )
            .await,
            0.0,
        );
        section.take(
            "active_30d",
            self.scalar(
                "SELECT COUNT(DISTINCT customer_id) AS count FROM orders WHERE created_at >= ?",
                &[since.clone()],
            )
            .await,
            0.0,
        );

        let returning = self
            .scalar(
                "SELECT COUNT(*) AS count FROM (SELECT customer_id FROM orders \
                 GROUP BY customer_id HAVING COUNT(*) > 1) AS repeat_customers",
                &[],
            )
            .await;
        let returning_value = *returning.as_ref().unwrap_or(&0.0);
        section.take("returning", returning, 0.0);
        section.put(
            "repeat_rate_percent",
            if total_value > 0.0 {
                round2(returning_value / total_value * 100.0)
            } else {
                0.0
            },
        );

        let lifetime_sql = format!(
            "SELECT COALESCE(AVG(customer_total), 0) AS value FROM (SELECT SUM(total) AS customer_total \
             FROM orders WHERE status NOT IN {} GROUP BY customer_id) AS lifetime",
            EXCLUDED_STATUSES
        );
        section.take(
            "average_lifetime_value",
            self.scalar(&lifetime_sql, &[]).await.map(round2),
            0.0,
        );

        section.finish()
    }

    async fn products(&self, since: &Value) -> Value {
        let mut section = Section::default();

        let bestsellers_sql = format!(
            "SELECT p.id, p.name, SUM(oi.quantity) AS units_sold, SUM(oi.quantity * oi.price) AS revenue \
             FROM order_items oi JOIN products p ON p.id = oi.product_id JOIN orders o ON o.id = oi.order_id \
             WHERE o.created_at >= ? AND o.status NOT IN {} \
             GROUP BY p.id, p.name ORDER BY units_sold DESC LIMIT ?",
            EXCLUDED_STATUSES
        );
        section.take(
            "bestsellers",
            self.rows(&bestsellers_sql, &[since.clone(), self.limit()]).await.map(Value::Array),
            json!([]),
        );

        let categories_sql = format!(
            "SELECT c.id, c.name, SUM(oi.quantity * oi.price) AS revenue, COUNT(DISTINCT o.id) AS orders \
             FROM order_items oi JOIN products p ON p.id = oi.product_id \
             JOIN categories c ON c.id = p.category_id JOIN orders o ON o.id = oi.order_id \
             WHERE o.created_at >= ? AND o.status NOT IN {} \
             GROUP BY c.id, c.name ORDER BY revenue DESC LIMIT ?",
            EXCLUDED_STATUSES
        );
        section.take(
            "top_categories",
            self.rows(&categories_sql, &[since.clone(), self.limit()]).await.map(Value::Array),
            json!([]),
        );

        section.finish()
    }

    async fn inventory(&self) -> Value {
        let mut section = Section::default();
        let threshold = json!(self.config.low_stock_threshold);

        section.take(
            "total_products",
            self.scalar("SELECT COUNT(*) AS count FROM products", &[]).await,
            0.0,
        );
        section.take(
            "low_stock",
            self.scalar(
                "SELECT COUNT(*) AS count FROM products WHERE stock > 0 AND stock <= ?",
                &[threshold.clone()],
            )
            .await,
            0.0,
        );
        section.take(
            "out_of_stock",
            self.scalar("SELECT COUNT(*) AS count FROM products WHERE stock <= 0", &[])
                .await,
            0.0,
        );
        section.take(
            "low_stock_items",
            self.rows(
                "SELECT id, name, stock FROM products WHERE stock <= ? ORDER BY stock ASC LIMIT ?",
                &[threshold, self.limit()],
            )
            .await
            .map(Value::Array),
            json!([]),
        );
        section.put("threshold", self.config.low_stock_threshold);

        section.finish()
    }

    async fn revenue(&self, month: &Period) -> Value {
        let mut section = Section::default();

        let totals_sql = format!(
            "SELECT COALESCE(SUM(total), 0) AS gross, COALESCE(SUM(tax_total), 0) AS tax, \
             COALESCE(SUM(shipping_total), 0) AS shipping, COALESCE(SUM(discount_total), 0) AS discounts \
             FROM orders WHERE created_at >= ? AND created_at < ? AND status NOT IN {}",
            EXCLUDED_STATUSES
        );
        let totals = self.database.query(&totals_sql, &month.params()).await;
        let gross = match &totals {
            Ok(rows) => round2(database::scalar_f64(rows, "gross")),
            Err(_) => 0.0,
        };
        section.take(
            "totals",
            totals.map(|rows| {
                json!({
                    "gross": gross,
                    "tax": round2(database::scalar_f64(&rows, "tax")),
                    "shipping": round2(database::scalar_f64(&rows, "shipping")),
                    "discounts": round2(database::scalar_f64(&rows, "discounts")),
                })
            }),
            json!({"gross": 0.0, "tax": 0.0, "shipping": 0.0, "discounts": 0.0}),
        );

        let refunds = self
            .scalar(
                "SELECT COALESCE(SUM(total), 0) AS refunded FROM orders \
                 WHERE created_at >= ? AND created_at < ? AND status = 'refunded'",
                &month.params(),
            )
            .await
            .map(round2);
        let refunded = *refunds.as_ref().unwrap_or(&0.0);
        section.take("refunds", refunds, 0.0);
        section.put("net", round2(gross - refunded));
        section.put("period_start", sql_timestamp(month.start));

        section.finish()
    }
}

#[async_trait::async_trait]
impl MetricsCollector for BusinessCollector {
    fn name(&self) -> &str {
        "business"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let now = Utc::now();
        let periods = sales_periods(now).unwrap_or_default();
        let since = json!(sql_timestamp(now.naive_utc() - chrono::Duration::days(30)));
        let this_month = periods.iter().find(|p| p.name == "this_month").copied();
        let month_start = this_month
            .map(|p| json!(sql_timestamp(p.start)))
            .unwrap_or_else(|| since.clone());

        let mut bundle = Map::new();
        bundle.insert("sales".to_string(), self.sales(&periods).await);
        bundle.insert("orders".to_string(), self.order_status(&since).await);
        bundle.insert("customers".to_string(), self.customers(&month_start, &since).await);
        bundle.insert("products".to_string(), self.products(&since).await);
        bundle.insert("inventory".to_string(), self.inventory().await);
        if let Some(month) = this_month {
            bundle.insert("revenue".to_string(), self.revenue(&month).await);
        }
        bundle.insert("generated_at".to_string(), json!(now.to_rfc3339()));

        Ok(bundle)
    }
}
