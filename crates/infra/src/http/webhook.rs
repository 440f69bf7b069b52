//! `WebhookSender`: delivers one payload over HTTP POST (§4.4).

use std::time::Duration;

use async_trait::async_trait;
use poller_core::WebhookSender;
use poller_domain::constants::ERROR_BODY_PREFIX_LEN;
use poller_domain::{PollerError, Result, WebhookPayload};
use reqwest::Client;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ReqwestWebhookSender {
    http: Client,
}

impl ReqwestWebhookSender {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| PollerError::Transport(err.to_string()))?;
        Ok(Self { http })
    }
}

impl Default for ReqwestWebhookSender {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self { http: Client::new() })
    }
}

#[async_trait]
impl WebhookSender for ReqwestWebhookSender {
    async fn send(
        &self,
        url: &str,
        payload: &WebhookPayload,
        secret: &str,
        connection_id: i64,
    ) -> Result<()> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Odoo-Connection-Id", connection_id.to_string());

        if !secret.is_empty() {
            request = request.header("X-Webhook-Secret", secret);
        }

        let response = request.json(payload).send().await.map_err(|err| PollerError::Send {
            status: None,
            body_prefix: err.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body_prefix: String = body.chars().take(ERROR_BODY_PREFIX_LEN).collect();

        Err(PollerError::Send { status: Some(status.as_u16()), body_prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poller_domain::{Address, Item, OrderSummary, Party};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_payload() -> WebhookPayload {
        WebhookPayload {
            source: "odoo".to_string(),
            connection_id: 1,
            odoo_db: "testdb".to_string(),
            order: OrderSummary {
                id: 1,
                name: "SO001".to_string(),
                state: "sale".to_string(),
                date_order: String::new(),
                write_date: "2024-01-01 00:00:00".to_string(),
                amount_untaxed: 100.0,
                amount_tax: 10.0,
                amount_total: 110.0,
                currency: "USD".to_string(),
                note: String::new(),
            },
            customer: Party { name: "Acme".to_string(), address: Address::default(), ..Party::default() },
            shipping_address: Party::default(),
            items: vec![Item {
                sku: "SKU1".to_string(),
                name: "Widget".to_string(),
                quantity: 1.0,
                unit_price: 100.0,
                subtotal: 100.0,
                total: 110.0,
                discount_percent: 0.0,
                odoo_product_id: 10,
            }],
        }
    }

    #[tokio::test]
    async fn success_on_any_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Odoo-Connection-Id", "1"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let sender = ReqwestWebhookSender::new().expect("sender");
        let url = format!("{}/hook", server.uri());
        sender.send(&url, &sample_payload(), "", 1).await.expect("send ok");
    }

    #[tokio::test]
    async fn sends_secret_header_only_when_non_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Webhook-Secret", "shh"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = ReqwestWebhookSender::new().expect("sender");
        let url = format!("{}/hook", server.uri());
        sender.send(&url, &sample_payload(), "shh", 1).await.expect("send ok");
    }

    #[tokio::test]
    async fn captures_body_prefix_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let sender = ReqwestWebhookSender::new().expect("sender");
        let url = format!("{}/hook", server.uri());
        match sender.send(&url, &sample_payload(), "", 1).await {
            Err(PollerError::Send { status, body_prefix }) => {
                assert_eq!(status, Some(500));
                assert_eq!(body_prefix, "boom");
            }
            other => panic!("expected Send error, got {other:?}"),
        }
    }
}
