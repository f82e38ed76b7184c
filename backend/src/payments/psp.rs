//! Mock payment service provider
//!
//! Simulates gateway behaviour per payment method with bounded latency and
//! a configurable card success probability. In production this module would
//! be replaced with real PSP integrations behind the same interface.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use std::time::Duration;

use crate::models::PaymentMethod;

/// Charge outcome reported by the mock gateway
#[derive(Debug, Clone)]
pub struct PspOutcome {
    pub success: bool,
    pub reference: Option<String>,
    pub error_code: Option<String>,
    pub response: serde_json::Value,
}

/// Mock PSP with a configurable card decline rate
#[derive(Debug, Clone)]
pub struct MockPsp {
    card_success_rate: f64,
}

impl MockPsp {
    pub fn new(card_success_rate: f64) -> Self {
        Self {
            card_success_rate: card_success_rate.clamp(0.0, 1.0),
        }
    }

    /// Process a charge for `amount`. Latency and outcome depend on the
    /// method: cash settles immediately, card sleeps 50-150 ms and succeeds
    /// with the configured probability, wallet sleeps 30-100 ms and always
    /// succeeds.
    pub async fn charge(&self, method: PaymentMethod, amount: f64) -> PspOutcome {
        match method {
            PaymentMethod::Cash => {
                let reference = format!("CASH-{}", Utc::now().timestamp_millis());
                PspOutcome {
                    success: true,
                    reference: Some(reference.clone()),
                    error_code: None,
                    response: json!({
                        "gateway": "cash",
                        "reference": reference,
                        "amount": amount,
                    }),
                }
            }
            PaymentMethod::Card => {
                let (delay_ms, approved, suffix) = {
                    let mut rng = rand::thread_rng();
                    (
                        rng.gen_range(50..=150u64),
                        rng.gen_bool(self.card_success_rate),
                        rng.gen::<u32>(),
                    )
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                if approved {
                    let reference = format!("CARD-{:08x}", suffix);
                    PspOutcome {
                        success: true,
                        reference: Some(reference.clone()),
                        error_code: None,
                        response: json!({
                            "gateway": "card",
                            "reference": reference,
                            "amount": amount,
                            "latency_ms": delay_ms,
                        }),
                    }
                } else {
                    tracing::info!(amount, "Mock card charge declined");
                    PspOutcome {
                        success: false,
                        reference: None,
                        error_code: Some("CARD_DECLINED".to_string()),
                        response: json!({
                            "gateway": "card",
                            "error": "CARD_DECLINED",
                            "amount": amount,
                            "latency_ms": delay_ms,
                        }),
                    }
                }
            }
            PaymentMethod::Wallet => {
                let delay_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(30..=100u64)
                };
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                let reference = format!("WALLET-{}", Utc::now().timestamp_millis());
                PspOutcome {
                    success: true,
                    reference: Some(reference.clone()),
                    error_code: None,
                    response: json!({
                        "gateway": "wallet",
                        "reference": reference,
                        "amount": amount,
                        "latency_ms": delay_ms,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cash_always_settles() {
        let psp = MockPsp::new(0.95);
        let outcome = psp.charge(PaymentMethod::Cash, 147.0).await;
        assert!(outcome.success);
        assert!(outcome.reference.unwrap().starts_with("CASH-"));
    }

    #[tokio::test]
    async fn test_wallet_always_settles() {
        let psp = MockPsp::new(0.0);
        let outcome = psp.charge(PaymentMethod::Wallet, 99.0).await;
        assert!(outcome.success);
        assert!(outcome.reference.unwrap().starts_with("WALLET-"));
    }

    #[tokio::test]
    async fn test_card_declines_at_zero_success_rate() {
        let psp = MockPsp::new(0.0);
        let outcome = psp.charge(PaymentMethod::Card, 250.0).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("CARD_DECLINED"));
        assert!(outcome.reference.is_none());
    }

    #[tokio::test]
    async fn test_card_approves_at_full_success_rate() {
        let psp = MockPsp::new(1.0);
        let outcome = psp.charge(PaymentMethod::Card, 250.0).await;
        assert!(outcome.success);
        assert!(outcome.reference.unwrap().starts_with("CARD-"));
    }
}
