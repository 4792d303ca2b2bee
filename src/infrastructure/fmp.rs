use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use std::time::Duration;
use tracing::debug;

use crate::domain::ports::{CandleRecord, MarketDataClient};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::validation::StrictCandleValidator;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DATE_QUERY_LAYOUT: &str = "%Y-%m-%d";

/// Financial Modeling Prep intraday history client.
pub struct FmpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FmpClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl MarketDataClient for FmpClient {
    async fn fetch_index_intraday_historical(
        &self,
        market: &str,
        timeframe: Timeframe,
        from: DateTime<Tz>,
        to: Option<DateTime<Tz>>,
    ) -> Result<Vec<CandleRecord>> {
        let url = format!(
            "{}/historical-chart/{}/{}",
            self.base_url,
            timeframe.vendor_str(),
            market
        );

        let mut query = vec![
            ("from", from.format(DATE_QUERY_LAYOUT).to_string()),
            ("apikey", self.api_key.clone()),
        ];
        if let Some(to) = to {
            query.push(("to", to.format(DATE_QUERY_LAYOUT).to_string()));
        }

        debug!(market, %timeframe, %from, "fetching intraday history");
        let mut records: Vec<CandleRecord> = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("requesting {market} {timeframe} history"))?
            .error_for_status()
            .with_context(|| format!("{market} {timeframe} history rejected"))?
            .json()
            .await
            .with_context(|| format!("decoding {market} {timeframe} history"))?;

        // The vendor serves newest-first; the pipeline wants oldest-first.
        // The fixed date layout sorts correctly as text.
        records.sort_by(|a, b| a.date.cmp(&b.date));
        records.retain(|r| StrictCandleValidator::validate_record(market, r));
        Ok(records)
    }
}
