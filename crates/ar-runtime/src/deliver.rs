use std::time::Duration;

use async_trait::async_trait;

use ar_core::publish::{Deliverer, DeliveryOutcome, WirePayload};
use ar_core::queue::{ErrorClass, classify_http_status};
use ar_core::target::PublishingTarget;

/// Per-request delivery timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// HttpDeliverer
// ---------------------------------------------------------------------------

/// HTTP POST deliverer shared by every target kind: the adapter already
/// rendered the wire format, so delivery is a uniform JSON POST with the
/// target's extra headers.
pub struct HttpDeliverer {
    client: reqwest::Client,
}

impl HttpDeliverer {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, payload: &WirePayload, target: &PublishingTarget) -> DeliveryOutcome {
        let mut request = self.client.post(&target.url).json(&payload.body);
        for (name, value) in &target.headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    return DeliveryOutcome::Delivered;
                }
                let reason = format!("{}: HTTP {status}", target.name);
                match classify_http_status(status) {
                    ErrorClass::Transient => DeliveryOutcome::Transient(reason),
                    ErrorClass::Permanent => DeliveryOutcome::Permanent(reason),
                    ErrorClass::Unknown => DeliveryOutcome::Unknown(reason),
                }
            }
            Err(e) => classify_request_error(&target.name, &e),
        }
    }
}

/// Network-level classification: timeouts and refused connections retry;
/// certificate validation failures and malformed requests do not.
fn classify_request_error(target: &str, e: &reqwest::Error) -> DeliveryOutcome {
    let reason = format!("{target}: {e}");
    let chain = format!("{e:?}");
    if chain.contains("certificate") || chain.contains("Certificate") {
        return DeliveryOutcome::Permanent(reason);
    }
    if e.is_timeout() || e.is_connect() {
        return DeliveryOutcome::Transient(reason);
    }
    if e.is_builder() {
        return DeliveryOutcome::Permanent(reason);
    }
    if e.is_request() {
        return DeliveryOutcome::Transient(reason);
    }
    DeliveryOutcome::Unknown(reason)
}
