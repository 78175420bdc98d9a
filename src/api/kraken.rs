use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::models::venue::{
    OhlcResult, OrderAction, SystemStatusResult, TickerResult, VenueResponse,
};

pub const KRAKEN_API_BASE: &str = "https://api.kraken.com";
const PUBLIC_PATH: &str = "/0/public/";
const PRIVATE_PATH: &str = "/0/private/";
const USER_AGENT: &str = "orderbot";
const RATE_LIMIT_RPM: u32 = 60;

type HmacSha512 = Hmac<Sha512>;

type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key pair for private endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    /// Base64 encoded private key as issued by Kraken
    pub api_secret: String,
}

impl Credentials {
    /// Read `KRAKEN_API_KEY` / `KRAKEN_API_SECRET`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("KRAKEN_API_KEY").ok()?;
        let api_secret = std::env::var("KRAKEN_API_SECRET").ok()?;
        Some(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

/// Kraken REST client: public quotes plus signed order endpoints
///
/// Cloneable; all clones share the rate limiter and the nonce counter.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<KrakenRateLimiter>,
    last_nonce: Arc<AtomicU64>,
}

impl KrakenClient {
    pub fn new(credentials: Option<Credentials>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: KRAKEN_API_BASE.to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            last_nonce: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Point the client somewhere else (mock servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn ticker(&self, pair: &str) -> Result<VenueResponse<TickerResult>> {
        self.public("Ticker", &[("pair", pair.to_string())]).await
    }

    /// Candles newer than `since` (0 fetches the venue's default window)
    pub async fn ohlc(&self, pair: &str, since: u64) -> Result<VenueResponse<OhlcResult>> {
        self.public(
            "OHLC",
            &[("pair", pair.to_string()), ("since", since.to_string())],
        )
        .await
    }

    pub async fn system_status(&self) -> Result<VenueResponse<SystemStatusResult>> {
        self.public("SystemStatus", &[]).await
    }

    /// Call the private endpoint behind `action`
    pub async fn submit<T: DeserializeOwned>(
        &self,
        action: OrderAction,
        params: &[(&str, String)],
    ) -> Result<VenueResponse<T>> {
        self.private(action.endpoint(), params).await
    }

    async fn public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<VenueResponse<T>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}{}", self.base_url, PUBLIC_PATH, endpoint);
        let response = self.client.get(&url).query(query).send().await?;
        let body = response.text().await?;

        tracing::debug!(endpoint, "public response: {}", body);
        Ok(serde_json::from_str(&body)?)
    }

    async fn private<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<VenueResponse<T>> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(BotError::MissingCredentials)?;

        self.rate_limiter.until_ready().await;

        let nonce = self.next_nonce();
        let mut form: Vec<(&str, String)> = vec![("nonce", nonce.to_string())];
        form.extend(params.iter().cloned());
        let post_data =
            serde_urlencoded::to_string(&form).map_err(|e| BotError::Signing(e.to_string()))?;

        let path = format!("{}{}", PRIVATE_PATH, endpoint);
        let signature = sign(&path, nonce, &post_data, &credentials.api_secret)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", &credentials.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post_data.clone())
            .send()
            .await?;
        let body = response.text().await?;

        tracing::debug!(endpoint, post_data = %post_data, "private response: {}", body);
        Ok(serde_json::from_str(&body)?)
    }

    /// Millisecond nonce, strictly increasing across calls
    fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// `API-Sign` = base64(HMAC-SHA512(path + SHA256(nonce + post_data), base64decode(secret)))
pub fn sign(path: &str, nonce: u64, post_data: &str, secret: &str) -> Result<String> {
    let key = BASE64
        .decode(secret)
        .map_err(|e| BotError::Signing(format!("invalid API secret: {}", e)))?;

    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(post_data.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(&key)
        .map_err(|e| BotError::Signing(format!("failed to create signing key: {}", e)))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Kraken's legacy name for a pair, e.g. `XBTUSD` -> `XXBTZUSD`
pub fn alternate_pair_name(pair: &str) -> String {
    if pair.len() <= 3 {
        return pair.to_string();
    }
    let (base, quote) = pair.split_at(pair.len() - 3);
    format!("X{}Z{}", base, quote)
}

/// Look up a pair in a result keyed by pair name, trying the legacy name too
pub fn pair_entry<'a, V>(result: &'a HashMap<String, V>, pair: &str) -> Option<&'a V> {
    result
        .get(pair)
        .or_else(|| result.get(&alternate_pair_name(pair)))
        .or_else(|| {
            let mut others = result.iter().filter(|(key, _)| key.as_str() != "last");
            match (others.next(), others.next()) {
                (Some((_, value)), None) => Some(value),
                _ => None,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::venue::{AddOrderResult, OhlcField, SystemStatus};
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn credentials() -> Credentials {
        Credentials {
            api_key: "test-key".into(),
            api_secret: BASE64.encode(b"super-secret-signing-key"),
        }
    }

    #[test]
    fn test_signature_matches_documented_example() {
        let secret = "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";
        let nonce = 1616492376594;
        let post_data =
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";

        let signature = sign("/0/private/AddOrder", nonce, post_data, secret).unwrap();
        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_sign_rejects_invalid_secret() {
        let result = sign("/0/private/AddOrder", 1, "nonce=1", "not base64!");
        assert!(matches!(result, Err(BotError::Signing(_))));
    }

    #[test]
    fn test_alternate_pair_name() {
        assert_eq!(alternate_pair_name("XBTUSD"), "XXBTZUSD");
        assert_eq!(alternate_pair_name("ETHEUR"), "XETHZEUR");
        assert_eq!(alternate_pair_name("USD"), "USD");
    }

    #[test]
    fn test_pair_entry_fallbacks() {
        let mut result = HashMap::new();
        result.insert("XXBTZUSD".to_string(), 1);
        assert_eq!(pair_entry(&result, "XBTUSD"), Some(&1));

        let mut single = HashMap::new();
        single.insert("AVAX/USD".to_string(), 2);
        assert_eq!(pair_entry(&single, "AVAXUSD"), Some(&2));
    }

    #[test]
    fn test_nonce_strictly_increases() {
        let client = KrakenClient::new(None, Duration::from_secs(5)).unwrap();
        let a = client.next_nonce();
        let b = client.next_nonce();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_ticker_decodes_bid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::UrlEncoded("pair".into(), "AVAXUSD".into()))
            .with_status(200)
            .with_body(
                r#"{"error":[],"result":{"AVAXUSD":{"a":["15.10","12","12.000"],"b":["15.05","3","3.000"],"c":["15.07","0.5"]}}}"#,
            )
            .create_async()
            .await;

        let client = KrakenClient::new(None, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());
        let response = client.ticker("AVAXUSD").await.unwrap();

        mock.assert_async().await;
        let result = response.result.unwrap();
        assert_eq!(pair_entry(&result, "AVAXUSD").unwrap().b[0], dec!(15.05));
    }

    #[tokio::test]
    async fn test_ohlc_passes_since_cursor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/OHLC")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pair".into(), "AVAXUSD".into()),
                Matcher::UrlEncoded("since".into(), "1688671200".into()),
            ]))
            .with_body(
                r#"{"error":[],"result":{"AVAXUSD":[[1688671260,"14.2","14.6","14.2","14.55","14.4","80.0",17]],"last":1688671260}}"#,
            )
            .create_async()
            .await;

        let client = KrakenClient::new(None, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());
        let response = client.ohlc("AVAXUSD", 1688671200).await.unwrap();

        mock.assert_async().await;
        let result = response.result.unwrap();
        assert!(matches!(pair_entry(&result, "AVAXUSD"), Some(OhlcField::Rows(rows)) if rows.len() == 1));
    }

    #[tokio::test]
    async fn test_system_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/0/public/SystemStatus")
            .with_body(r#"{"error":[],"result":{"status":"maintenance","timestamp":"2023-07-06T18:52:00Z"}}"#)
            .create_async()
            .await;

        let client = KrakenClient::new(None, Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());
        let response = client.system_status().await.unwrap();

        let status = SystemStatus::parse(&response.result.unwrap().status);
        assert_eq!(status, SystemStatus::Maintenance);
    }

    #[tokio::test]
    async fn test_private_call_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .match_header("API-Key", "test-key")
            .match_header("API-Sign", Matcher::Any)
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("nonce=\\d+".into()),
                Matcher::Regex("ordertype=stop-loss".into()),
            ]))
            .with_body(r#"{"error":[],"result":{"descr":{"order":"sell 2 AVAXUSD @ stop loss 14"},"txid":["OUF4EM-FRGI2-MQMWZD"]}}"#)
            .create_async()
            .await;

        let client = KrakenClient::new(Some(credentials()), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());
        let params = vec![
            ("ordertype", "stop-loss".to_string()),
            ("pair", "AVAXUSD".to_string()),
        ];
        let response: VenueResponse<AddOrderResult> =
            client.submit(OrderAction::Add, &params).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.result.unwrap().txid, vec!["OUF4EM-FRGI2-MQMWZD"]);
    }

    #[tokio::test]
    async fn test_private_call_without_credentials() {
        let client = KrakenClient::new(None, Duration::from_secs(5)).unwrap();
        let result: Result<VenueResponse<AddOrderResult>> =
            client.submit(OrderAction::Add, &[]).await;
        assert!(matches!(result, Err(BotError::MissingCredentials)));
    }
}
