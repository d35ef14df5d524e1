//! HTTP client for a prime-token card gateway.

use std::time::Duration;

use async_trait::async_trait;
use domain::{IdempotencyKey, Money, PaymentRecord, PaymentStatus};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument, warn};

use super::{CaptureRequest, Cardholder, PaymentGateway};
use crate::error::PaymentError;

const PAY_BY_PRIME_PATH: &str = "/tpc/payment/pay-by-prime";
const REFUND_PATH: &str = "/tpc/transaction/refund";
const QUERY_PATH: &str = "/tpc/transaction/query";

/// Connection settings for [`HttpPaymentGateway`].
#[derive(Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub partner_key: SecretString,
    pub merchant_id: String,
    /// Applied to every request. Expiry means the outcome is unknown.
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGatewayConfig")
            .field("base_url", &self.base_url)
            .field("partner_key", &"[REDACTED]")
            .field("merchant_id", &self.merchant_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct PayByPrimeRequest<'a> {
    prime: &'a str,
    partner_key: &'a str,
    merchant_id: &'a str,
    details: &'a str,
    amount: i64,
    order_number: &'a str,
    cardholder: &'a Cardholder,
    remember: bool,
}

#[derive(Debug, Deserialize)]
struct PayByPrimeResponse {
    status: i64,
    #[serde(default)]
    msg: String,
    rec_trade_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    partner_key: &'a str,
    rec_trade_id: &'a str,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    partner_key: &'a str,
    records_per_page: u32,
    filters: QueryFilters<'a>,
}

#[derive(Debug, Serialize)]
struct QueryFilters<'a> {
    order_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    trade_records: Vec<TradeRecord>,
}

#[derive(Debug, Deserialize)]
struct TradeRecord {
    rec_trade_id: String,
    amount: i64,
    record_status: i64,
    #[serde(default)]
    order_number: Option<String>,
}

/// Gateway reached over HTTPS with a partner key.
///
/// Amounts travel in minor units. The idempotency key is sent as the order
/// number, which the gateway uses to reject duplicate captures.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    config: HttpGatewayConfig,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    /// Builds a client with the configured request timeout.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, PaymentError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(url)
            .header("x-api-key", self.config.partner_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PaymentError::Unavailable {
                reason: format!("gateway returned HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(PaymentError::Protocol(format!(
                "gateway returned HTTP {status}"
            )));
        }

        response.json::<R>().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::Timeout
            } else {
                PaymentError::Protocol(e.to_string())
            }
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Timeout
    } else {
        PaymentError::Unavailable {
            reason: err.to_string(),
        }
    }
}

fn interpret_capture(
    response: PayByPrimeResponse,
    request: &CaptureRequest,
) -> Result<PaymentRecord, PaymentError> {
    if response.status != 0 {
        return Err(PaymentError::Declined {
            message: response.msg,
        });
    }
    let transaction_id = response
        .rec_trade_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PaymentError::Protocol("capture succeeded without rec_trade_id".into()))?;
    Ok(PaymentRecord::captured(
        transaction_id,
        request.idempotency_key.clone(),
        request.amount,
    ))
}

fn interpret_query(
    response: QueryResponse,
    key: &IdempotencyKey,
) -> Result<Option<PaymentRecord>, PaymentError> {
    if response.status != 0 {
        return Err(PaymentError::Protocol(format!(
            "query failed with status {}: {}",
            response.status, response.msg
        )));
    }

    // Record status: 0 authorized, 1 captured, 2 partially refunded, 3 refunded.
    let found = response
        .trade_records
        .into_iter()
        .filter(|record| {
            record
                .order_number
                .as_deref()
                .is_none_or(|number| number == key.as_str())
        })
        .find_map(|record| {
            let status = match record.record_status {
                0 | 1 => PaymentStatus::Captured,
                2 | 3 => PaymentStatus::Refunded,
                _ => return None,
            };
            let mut found = PaymentRecord::captured(
                record.rec_trade_id,
                key.clone(),
                Money::from_cents(record.amount),
            );
            if status == PaymentStatus::Refunded {
                found.mark_refunded();
            }
            Some(found)
        });
    Ok(found)
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key, amount = %request.amount))]
    async fn capture(&self, request: &CaptureRequest) -> Result<PaymentRecord, PaymentError> {
        let body = PayByPrimeRequest {
            prime: &request.token,
            partner_key: self.config.partner_key.expose_secret(),
            merchant_id: &self.config.merchant_id,
            details: &request.details,
            amount: request.amount.cents(),
            order_number: request.idempotency_key.as_str(),
            cardholder: &request.cardholder,
            remember: false,
        };

        let response: PayByPrimeResponse = self.post(PAY_BY_PRIME_PATH, &body).await?;
        let record = interpret_capture(response, request)?;
        debug!(transaction_id = %record.transaction_id, "capture accepted");
        Ok(record)
    }

    #[instrument(skip(self, amount), fields(amount = %amount))]
    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<(), PaymentError> {
        let body = RefundRequest {
            partner_key: self.config.partner_key.expose_secret(),
            rec_trade_id: transaction_id,
            amount: amount.cents(),
        };

        let response: StatusResponse = self.post(REFUND_PATH, &body).await?;
        if response.status != 0 {
            warn!(status = response.status, msg = %response.msg, "refund rejected");
            return Err(PaymentError::Declined {
                message: response.msg,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, key), fields(idempotency_key = %key))]
    async fn query(&self, key: &IdempotencyKey) -> Result<Option<PaymentRecord>, PaymentError> {
        let body = QueryRequest {
            partner_key: self.config.partner_key.expose_secret(),
            records_per_page: 10,
            filters: QueryFilters {
                order_number: key.as_str(),
            },
        };

        let response: QueryResponse = self.post(QUERY_PATH, &body).await?;
        interpret_query(response, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CaptureRequest {
        CaptureRequest {
            token: "prime-abc".to_string(),
            amount: Money::from_cents(85900),
            idempotency_key: IdempotencyKey::from_string("0123456789abcdef0123456789abcdef"),
            details: "Dress x1".to_string(),
            cardholder: Cardholder {
                phone_number: "0987654321".to_string(),
                name: "Luke".to_string(),
                email: "luke@example.com".to_string(),
                address: "Taipei".to_string(),
            },
        }
    }

    #[test]
    fn test_capture_body_shape() {
        let request = request();
        let body = PayByPrimeRequest {
            prime: &request.token,
            partner_key: "partner",
            merchant_id: "merchant",
            details: &request.details,
            amount: request.amount.cents(),
            order_number: request.idempotency_key.as_str(),
            cardholder: &request.cardholder,
            remember: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["prime"], "prime-abc");
        assert_eq!(json["amount"], 85900);
        assert_eq!(json["order_number"], "0123456789abcdef0123456789abcdef");
        assert_eq!(json["cardholder"]["phone_number"], "0987654321");
        assert_eq!(json["remember"], false);
    }

    #[test]
    fn test_successful_capture() {
        let response: PayByPrimeResponse = serde_json::from_str(
            r#"{"status":0,"msg":"Success","rec_trade_id":"D20240101ABC","amount":85900}"#,
        )
        .unwrap();
        let record = interpret_capture(response, &request()).unwrap();
        assert_eq!(record.transaction_id, "D20240101ABC");
        assert_eq!(record.amount, Money::from_cents(85900));
        assert_eq!(record.order_id, request().idempotency_key.order_id());
    }

    #[test]
    fn test_declined_capture() {
        let response: PayByPrimeResponse =
            serde_json::from_str(r#"{"status":10003,"msg":"Card Error"}"#).unwrap();
        let err = interpret_capture(response, &request()).unwrap_err();
        assert_eq!(
            err,
            PaymentError::Declined {
                message: "Card Error".to_string()
            }
        );
    }

    #[test]
    fn test_capture_without_trade_id_is_protocol_error() {
        let response: PayByPrimeResponse =
            serde_json::from_str(r#"{"status":0,"msg":"Success"}"#).unwrap();
        assert!(matches!(
            interpret_capture(response, &request()),
            Err(PaymentError::Protocol(_))
        ));
    }

    #[test]
    fn test_query_finds_capture() {
        let key = request().idempotency_key;
        let response: QueryResponse = serde_json::from_str(
            r#"{"status":0,"msg":"","trade_records":[
                {"rec_trade_id":"D1","amount":85900,"record_status":1,"order_number":"0123456789abcdef0123456789abcdef"}
            ]}"#,
        )
        .unwrap();
        let record = interpret_query(response, &key).unwrap().unwrap();
        assert_eq!(record.transaction_id, "D1");
        assert!(record.is_captured());
    }

    #[test]
    fn test_query_without_records() {
        let key = request().idempotency_key;
        let response: QueryResponse =
            serde_json::from_str(r#"{"status":0,"msg":"","trade_records":[]}"#).unwrap();
        assert!(interpret_query(response, &key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_unavailable() {
        let gateway = HttpPaymentGateway::new(HttpGatewayConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            partner_key: SecretString::from("partner".to_string()),
            merchant_id: "merchant".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = gateway.capture(&request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Unavailable { .. }), "{err:?}");
    }

    #[test]
    fn test_debug_redacts_partner_key() {
        let config = HttpGatewayConfig {
            base_url: "https://sandbox.example.com".to_string(),
            partner_key: SecretString::from("super-secret".to_string()),
            merchant_id: "merchant".to_string(),
            timeout: Duration::from_secs(5),
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("[REDACTED]"));
    }
}
