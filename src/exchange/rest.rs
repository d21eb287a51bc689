//! REST gateway for a Bitget-style USDT-margined futures API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::models::{Candle, PositionSide};

use super::gateway::{AccountInfo, ExchangeGateway, ExchangePosition, FeeRates, OrderReceipt};

const DEFAULT_API_BASE: &str = "https://api.bitget.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";
const API_OK: &str = "00000";

/// Envelope every endpoint wraps its payload in.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: String,
    msg: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_data(self, op: &str) -> Result<T> {
        if self.code != API_OK {
            anyhow::bail!("{} rejected: {} - {}", op, self.code, self.msg);
        }
        self.data
            .with_context(|| format!("{} returned no data", op))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    margin_coin: String,
    account_equity: String,
    available: String,
    locked: String,
    unrealized_pl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    hold_side: String,
    total: String,
    open_price_avg: String,
    unrealized_pl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractData {
    symbol: String,
    maker_fee_rate: String,
    taker_fee_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    order_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderRequest<'a> {
    symbol: &'a str,
    product_type: &'a str,
    margin_coin: &'a str,
    margin_mode: &'a str,
    size: String,
    side: &'a str,
    order_type: &'a str,
    reduce_only: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLeverageRequest<'a> {
    symbol: &'a str,
    product_type: &'a str,
    margin_coin: &'a str,
    leverage: String,
}

/// REST-backed gateway. Credentials are optional; market-data endpoints work
/// without them.
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_passphrase: Option<String>,
}

impl RestGateway {
    /// Create a gateway against the production API, pulling credentials from
    /// `BITGET_API_KEY` / `BITGET_API_PASSPHRASE` when present.
    pub fn from_env() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE.to_string())
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: std::env::var("BITGET_API_KEY").ok(),
            api_passphrase: std::env::var("BITGET_API_PASSPHRASE").ok(),
        })
    }

    fn auth_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut req = req;
        if let Some(key) = &self.api_key {
            req = req.header("ACCESS-KEY", key);
        }
        if let Some(passphrase) = &self.api_passphrase {
            req = req.header("ACCESS-PASSPHRASE", passphrase);
        }
        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, op: &str, url: String) -> Result<T> {
        debug!(url = %url, "exchange request");

        let response = self
            .auth_headers(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("{} request failed", op))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed: {} - {}", op, status, body);
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("failed to parse {} response", op))?;
        envelope.into_data(op)
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        op: &str,
        url: String,
        body: &B,
    ) -> Result<T> {
        debug!(url = %url, "exchange request");

        let response = self
            .auth_headers(self.client.post(&url).json(body))
            .send()
            .await
            .with_context(|| format!("{} request failed", op))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed: {} - {}", op, status, body);
        }

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("failed to parse {} response", op))?;
        envelope.into_data(op)
    }
}

impl ExchangeGateway for RestGateway {
    fn name(&self) -> &str {
        "bitget"
    }

    async fn fetch_candles(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v2/mix/market/candles?symbol={}&productType={}&granularity={}&limit={}",
            self.base_url,
            market_id(symbol),
            PRODUCT_TYPE,
            granularity(timeframe)?,
            limit
        );

        let rows: Vec<Vec<String>> = self.get_json("fetch_candles", url).await?;
        let mut candles: Vec<Candle> = rows.iter().filter_map(|r| parse_candle_row(r)).collect();
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let url = format!(
            "{}/api/v2/mix/account/accounts?productType={}",
            self.base_url, PRODUCT_TYPE
        );

        let accounts: Vec<AccountData> = self.get_json("account_info", url).await?;
        let account = accounts
            .into_iter()
            .find(|a| a.margin_coin == MARGIN_COIN)
            .context("no USDT futures account returned")?;

        Ok(AccountInfo {
            equity: parse_f64(&account.account_equity)?,
            available: parse_f64(&account.available)?,
            used_margin: parse_f64(&account.locked)?,
            unrealized_pnl: parse_f64(&account.unrealized_pl)?,
        })
    }

    async fn position_for(&self, symbol: &str) -> Result<Option<ExchangePosition>> {
        let url = format!(
            "{}/api/v2/mix/position/single-position?symbol={}&productType={}&marginCoin={}",
            self.base_url,
            market_id(symbol),
            PRODUCT_TYPE,
            MARGIN_COIN
        );

        let positions: Vec<PositionData> = self.get_json("position_for", url).await?;
        let Some(pos) = positions.into_iter().next() else {
            return Ok(None);
        };

        let contracts = parse_f64(&pos.total)?;
        if contracts == 0.0 {
            return Ok(None);
        }

        let side = match pos.hold_side.as_str() {
            "long" => PositionSide::Long,
            "short" => PositionSide::Short,
            other => anyhow::bail!("unknown hold side: {}", other),
        };
        let entry_price = parse_f64(&pos.open_price_avg)?;

        Ok(Some(ExchangePosition {
            symbol: symbol.to_string(),
            side,
            contracts,
            entry_price,
            notional: contracts * entry_price,
            unrealized_pnl: parse_f64(&pos.unrealized_pl)?,
        }))
    }

    async fn fee_rates(&self, symbol: &str) -> Result<FeeRates> {
        let id = market_id(symbol);
        let url = format!(
            "{}/api/v2/mix/market/contracts?productType={}&symbol={}",
            self.base_url, PRODUCT_TYPE, id
        );

        let contracts: Vec<ContractData> = self.get_json("fee_rates", url).await?;
        let contract = contracts
            .into_iter()
            .find(|c| c.symbol == id)
            .with_context(|| format!("no contract metadata for {}", symbol))?;

        Ok(FeeRates {
            maker: parse_f64(&contract.maker_fee_rate)?,
            taker: parse_f64(&contract.taker_fee_rate)?,
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<()> {
        let id = market_id(symbol);
        let body = SetLeverageRequest {
            symbol: &id,
            product_type: PRODUCT_TYPE,
            margin_coin: MARGIN_COIN,
            leverage: format!("{}", leverage),
        };
        let url = format!("{}/api/v2/mix/account/set-leverage", self.base_url);
        let _: serde_json::Value = self.post_json("set_leverage", url, &body).await?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: PositionSide,
        qty: f64,
        reduce_only: bool,
    ) -> Result<OrderReceipt> {
        let id = market_id(symbol);
        let body = PlaceOrderRequest {
            symbol: &id,
            product_type: PRODUCT_TYPE,
            margin_coin: MARGIN_COIN,
            margin_mode: "crossed",
            size: format!("{}", qty),
            side: match side {
                PositionSide::Long => "buy",
                PositionSide::Short => "sell",
            },
            order_type: "market",
            reduce_only: if reduce_only { "YES" } else { "NO" },
        };

        let url = format!("{}/api/v2/mix/order/place-order", self.base_url);
        let order: OrderData = self.post_json("place_market_order", url, &body).await?;

        Ok(OrderReceipt {
            order_id: order.order_id,
            symbol: symbol.to_string(),
            side,
            qty,
            fill_price: None,
        })
    }
}

/// Exchange market id for a unified symbol: "IP/USDT:USDT" -> "IPUSDT".
pub fn market_id(symbol: &str) -> String {
    symbol
        .split(':')
        .next()
        .unwrap_or(symbol)
        .replace('/', "")
}

/// Map a unified timeframe to the API's granularity token.
pub fn granularity(timeframe: &str) -> Result<String> {
    match timeframe {
        "1m" | "5m" | "15m" | "30m" => Ok(timeframe.to_string()),
        "1h" => Ok("1H".to_string()),
        "4h" => Ok("4H".to_string()),
        "1d" => Ok("1D".to_string()),
        other => anyhow::bail!("unsupported timeframe: {}", other),
    }
}

/// Parse one raw candle row: [ts_ms, open, high, low, close, base_vol, ...].
fn parse_candle_row(row: &[String]) -> Option<Candle> {
    let fields: Vec<f64> = row.iter().filter_map(|s| s.parse().ok()).collect();
    if fields.len() < row.len() {
        return None;
    }
    Candle::from_raw(&fields)
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .with_context(|| format!("invalid numeric field: {:?}", s))
}
