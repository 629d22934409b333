use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use common::{
    Error, ExecutionVenue, OptionType, OrderConfirmation, OrderSide, Result,
};

/// REST client for the live broker. Token-header auth; every call is
/// fallible and an unusable response surfaces as "no data this tick".
pub struct BrokerClient {
    base_url: String,
    access_token: String,
    client_id: String,
    http: Client,
}

impl BrokerClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            client_id: client_id.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("HTTP {status}: {body}")));
        }
        resp.json::<T>().await.map_err(|e| Error::Http(e.to_string()))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("HTTP {status}: {text}")));
        }
        resp.json::<T>().await.map_err(|e| Error::Http(e.to_string()))
    }
}

#[async_trait]
impl ExecutionVenue for BrokerClient {
    async fn place_order(
        &self,
        security_id: &str,
        side: OrderSide,
        qty: i64,
        index_name: &str,
    ) -> Result<OrderConfirmation> {
        debug!(security = %security_id, side = %side, qty, "submitting order to broker");
        let body = json!({
            "clientId": self.client_id,
            "securityId": security_id,
            "transactionType": side.to_string(),
            "quantity": qty,
            "orderType": "MARKET",
            "productType": "INTRADAY",
            "exchangeSegment": exchange_segment(index_name),
        });
        let resp: OrderResponse = self.post_json("/v2/orders", &body).await?;

        match resp.order_id {
            Some(order_id) if !order_id.is_empty() => Ok(OrderConfirmation {
                order_id,
                fill_price: resp.average_price.filter(|p| *p > 0.0),
            }),
            _ => Err(Error::Execution(format!(
                "order not accepted: {}",
                resp.status.unwrap_or_else(|| "unknown".into())
            ))),
        }
    }

    async fn index_ltp(&self, index_name: &str) -> Result<f64> {
        let resp: LtpResponse = self
            .get_json(&format!("/v2/marketfeed/index/{index_name}/ltp"))
            .await?;
        positive_price(resp.ltp, index_name)
    }

    async fn option_ltp(&self, security_id: &str) -> Result<f64> {
        let resp: LtpResponse = self
            .get_json(&format!("/v2/marketfeed/security/{security_id}/ltp"))
            .await?;
        positive_price(resp.ltp, security_id)
    }

    async fn atm_option_security_id(
        &self,
        index_name: &str,
        strike: i64,
        option_type: OptionType,
        expiry: &str,
    ) -> Result<String> {
        let resp: SecurityLookupResponse = self
            .get_json(&format!(
                "/v2/optionchain/{index_name}/security?strike={strike}&type={option_type}&expiry={expiry}"
            ))
            .await?;
        match resp.security_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(Error::MarketData(format!(
                "no security id for {index_name} {strike} {option_type} {expiry}"
            ))),
        }
    }

    async fn nearest_expiry(&self, index_name: &str) -> Result<String> {
        let resp: ExpiryResponse = self
            .get_json(&format!("/v2/optionchain/{index_name}/expiries"))
            .await?;
        resp.expiries
            .into_iter()
            .next()
            .ok_or_else(|| Error::MarketData(format!("no expiries for {index_name}")))
    }
}

fn exchange_segment(index_name: &str) -> &'static str {
    // SENSEX options trade on BSE; the NSE indices on NFO.
    if index_name.eq_ignore_ascii_case("SENSEX") {
        "BFO"
    } else {
        "NFO"
    }
}

fn positive_price(ltp: Option<f64>, what: &str) -> Result<f64> {
    match ltp {
        Some(p) if p > 0.0 => Ok(p),
        _ => Err(Error::MarketData(format!("no usable price for {what}"))),
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    average_price: Option<f64>,
}

#[derive(Deserialize)]
struct LtpResponse {
    ltp: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityLookupResponse {
    security_id: Option<String>,
}

#[derive(Deserialize)]
struct ExpiryResponse {
    #[serde(default)]
    expiries: Vec<String>,
}
