use pnlwatch_domain::repositories::snapshot_source::{FetchError, SnapshotSource};
use pnlwatch_domain::value_objects::balance::BalanceSnapshot;
use pnlwatch_domain::value_objects::snapshot::PositionSnapshot;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

// Bybit v5 ret codes that no retry can fix: invalid key, bad signature,
// missing permission, expired key.
const AUTH_RET_CODES: &[i64] = &[10003, 10004, 10005, 33004];

/// Blocking snapshot source against the Bybit v5 REST API (unified
/// account, linear positions). Request signing is handled outside this
/// process; the adapter sends the configured key header and classifies
/// the server's auth rejections so the poller can stop.
pub struct BybitSnapshotSource {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    settle_asset: String,
}

impl BybitSnapshotSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_ms: u64,
        settle_asset: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .map_err(|err| format!("failed to build http client: {err}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            settle_asset: settle_asset.into(),
        })
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("X-BAPI-API-KEY", key);
        }

        let response = request
            .send()
            .map_err(|err| FetchError::Transient(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("{url} returned {status}")));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .map_err(|err| FetchError::Transient(format!("invalid response from {url}: {err}")))?;
        envelope.into_result(&url)
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self, url: &str) -> Result<T, FetchError> {
        if AUTH_RET_CODES.contains(&self.ret_code) {
            return Err(FetchError::Auth(format!(
                "{url} rejected credentials (retCode={}): {}",
                self.ret_code, self.ret_msg
            )));
        }
        if self.ret_code != 0 {
            return Err(FetchError::Transient(format!(
                "{url} returned retCode={}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        self.result.ok_or_else(|| {
            FetchError::Transient(format!("{url} returned retCode=0 without a result"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct WalletResult {
    #[serde(default)]
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(rename = "totalMarginBalance", default)]
    total_margin_balance: String,
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
struct WalletCoin {
    #[serde(default)]
    coin: String,
    #[serde(rename = "usdValue", default)]
    usd_value: String,
    #[serde(rename = "totalOrderIM", default)]
    total_order_im: String,
    #[serde(rename = "totalPositionIM", default)]
    total_position_im: String,
}

#[derive(Debug, Deserialize)]
struct PositionResult {
    #[serde(default)]
    list: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(rename = "unrealisedPnl", default)]
    unrealised_pnl: String,
    #[serde(rename = "curRealisedPnl", default)]
    cur_realised_pnl: String,
}

// Bybit encodes numbers as strings; absent values come through empty.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

fn balance_from_account(account: &WalletAccount, settle_asset: &str) -> BalanceSnapshot {
    let settle_coin = account.coin.iter().find(|c| c.coin == settle_asset);
    let available_balance = settle_coin.and_then(|c| {
        let usd_value = parse_number(&c.usd_value)?;
        let order_im = parse_number(&c.total_order_im).unwrap_or(0.0);
        let position_im = parse_number(&c.total_position_im).unwrap_or(0.0);
        Some(usd_value - (order_im + position_im))
    });
    BalanceSnapshot {
        total_margin_balance: parse_number(&account.total_margin_balance),
        available_balance,
        has_settlement_asset: settle_coin.is_some(),
    }
}

fn snapshot_from_raw(raw: &RawPosition) -> PositionSnapshot {
    let size = parse_number(&raw.size).unwrap_or(0.0);
    let quantity = if raw.side.eq_ignore_ascii_case("sell") {
        -size
    } else {
        size
    };
    PositionSnapshot {
        symbol: raw.symbol.clone(),
        quantity,
        average_price: parse_number(&raw.avg_price),
        unrealized_pnl: parse_number(&raw.unrealised_pnl),
        realized_pnl: parse_number(&raw.cur_realised_pnl),
    }
}

impl SnapshotSource for BybitSnapshotSource {
    fn fetch_balance(&self) -> Result<BalanceSnapshot, FetchError> {
        let result: WalletResult = self.get(
            "/v5/account/wallet-balance",
            &[("accountType", "UNIFIED")],
        )?;
        Ok(result
            .list
            .first()
            .map(|account| balance_from_account(account, &self.settle_asset))
            .unwrap_or_default())
    }

    fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, FetchError> {
        let result: PositionResult = self.get(
            "/v5/position/list",
            &[
                ("category", "linear"),
                ("settleCoin", self.settle_asset.as_str()),
            ],
        )?;
        Ok(result.list.iter().map(snapshot_from_raw).collect())
    }
}
