use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::MfaMethod;

/// Delivers SMS and email challenge codes.
#[async_trait]
pub trait ChallengeDispatcher: Send + Sync {
    async fn deliver(
        &self,
        method: MfaMethod,
        destination: &str,
        code: &str,
    ) -> Result<(), anyhow::Error>;
}

/// Keeps the first and last two characters of a destination.
pub fn mask_destination(destination: &str) -> String {
    let chars: Vec<char> = destination.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 4), tail)
}

/// Records the delivery without sending anything. Codes are never logged.
pub struct LogDispatcher;

#[async_trait]
impl ChallengeDispatcher for LogDispatcher {
    async fn deliver(
        &self,
        method: MfaMethod,
        destination: &str,
        _code: &str,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(
            method = %method,
            destination = %mask_destination(destination),
            "Challenge code dispatched"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub method: MfaMethod,
    pub destination: String,
    pub code: String,
}

/// Captures delivered codes so tests can complete a challenge.
#[derive(Default)]
pub struct MockDispatcher {
    sent: Mutex<Vec<SentCode>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentCode> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Most recent code sent to `destination`, waiting briefly for the
    /// background delivery task.
    pub async fn latest_code(&self, destination: &str) -> Option<String> {
        for _ in 0..50 {
            let found = self
                .sent()
                .into_iter()
                .rev()
                .find(|s| s.destination == destination)
                .map(|s| s.code);
            if found.is_some() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl ChallengeDispatcher for MockDispatcher {
    async fn deliver(
        &self,
        method: MfaMethod,
        destination: &str,
        code: &str,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock dispatcher mutex poisoned: {}", e))?
            .push(SentCode {
                method,
                destination: destination.to_string(),
                code: code.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_destination() {
        assert_eq!(mask_destination("+14155550123"), "+1********23");
        assert_eq!(mask_destination("abc"), "***");
    }
}
