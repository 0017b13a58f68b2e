//! Authentication handling for Azure DevOps.
//!
//! Two strategies reach the remote service:
//! - a managed credential, an access token brokered by the platform (the OS
//!   keyring by default) and sent as a Bearer header;
//! - a shared secret, a personal access token sent as Basic auth with an
//!   empty username.
//!
//! `AuthResolver` turns a connection into an ordered `AuthChain`. The chain
//! tries the managed strategy first and falls back to the shared secret
//! exactly once when the first attempt fails to authenticate.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, info, warn};

use super::client::{HttpRequest, HttpResponse, Transport};
use crate::config::ConnectionConfig;
use crate::error::{Result, ServiceError};

/// The keyring service name for Workbridge credentials.
const KEYRING_SERVICE: &str = "workbridge";

/// Which strategy produced a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Platform-brokered access token.
    ManagedCredential,
    /// Personal access token.
    SharedSecret,
}

impl StrategyKind {
    /// Label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::ManagedCredential => "managed credential",
            StrategyKind::SharedSecret => "shared secret",
        }
    }
}

/// Source of managed access tokens, keyed by channel name.
pub trait CredentialBroker: Send + Sync + fmt::Debug {
    /// Fetch the current token for `channel`.
    ///
    /// Failures are reported as `ServiceError::Authentication`.
    fn token(&self, channel: &str) -> Result<String>;
}

/// Broker reading tokens from the OS keyring.
#[derive(Debug, Clone, Default)]
pub struct KeyringBroker;

impl CredentialBroker for KeyringBroker {
    fn token(&self, channel: &str) -> Result<String> {
        get_token(channel)
    }
}

/// One way of producing an `Authorization` header.
pub trait AuthStrategy: Send + Sync + fmt::Debug {
    /// The strategy kind.
    fn kind(&self) -> StrategyKind;

    /// Produce the header value.
    fn authorization(&self) -> Result<String>;
}

/// Bearer token fetched from a broker on each use.
#[derive(Debug)]
pub struct ManagedCredentialStrategy {
    channel: String,
    broker: Arc<dyn CredentialBroker>,
}

impl ManagedCredentialStrategy {
    /// Create a strategy for `channel`.
    pub fn new(channel: &str, broker: Arc<dyn CredentialBroker>) -> Self {
        Self {
            channel: channel.to_string(),
            broker,
        }
    }
}

impl AuthStrategy for ManagedCredentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ManagedCredential
    }

    fn authorization(&self) -> Result<String> {
        let token = self.broker.token(&self.channel)?;
        if token.trim().is_empty() {
            return Err(ServiceError::authentication(format!(
                "managed credential '{}' is empty",
                self.channel
            )));
        }
        Ok(format!("Bearer {}", token.trim()))
    }
}

/// Basic auth built from a personal access token.
///
/// The token is encoded immediately and the raw value is not stored.
pub struct SharedSecretStrategy {
    auth_header: String,
}

impl SharedSecretStrategy {
    /// Create a strategy from a personal access token.
    pub fn new(token: &str) -> Self {
        Self {
            auth_header: build_basic_header(token),
        }
    }
}

impl fmt::Debug for SharedSecretStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretStrategy")
            .field("auth_header", &"<redacted>")
            .finish()
    }
}

impl AuthStrategy for SharedSecretStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SharedSecret
    }

    fn authorization(&self) -> Result<String> {
        Ok(self.auth_header.clone())
    }
}

/// Build the Basic Auth header value.
///
/// Encodes ":token" (empty username) in Base64 and prepends "Basic ".
fn build_basic_header(token: &str) -> String {
    let credentials = format!(":{}", token);
    let encoded = BASE64.encode(credentials.as_bytes());
    format!("Basic {}", encoded)
}

/// Whether a response means the credential was refused.
///
/// Azure DevOps answers a bad token either with 401 or with a 203 carrying
/// its HTML sign-in page.
fn is_auth_failure(status: u16) -> bool {
    status == 401 || status == 203
}

/// A response together with the strategy that obtained it.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// The raw response.
    pub response: HttpResponse,
    /// The strategy whose header was accepted.
    pub strategy: StrategyKind,
}

/// Ordered strategies for one connection, never empty.
#[derive(Debug, Clone)]
pub struct AuthChain {
    strategies: Vec<Arc<dyn AuthStrategy>>,
}

impl AuthChain {
    /// Build a chain; `None` when no strategy is given.
    pub fn new(strategies: Vec<Arc<dyn AuthStrategy>>) -> Option<Self> {
        if strategies.is_empty() {
            None
        } else {
            Some(Self { strategies })
        }
    }

    /// The strategy kinds, in attempt order.
    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// A chain holding only `kind`, for follow-up calls once it has worked.
    pub fn pinned_to(&self, kind: StrategyKind) -> Self {
        let strategies: Vec<Arc<dyn AuthStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect();
        if strategies.is_empty() {
            self.clone()
        } else {
            Self { strategies }
        }
    }

    /// Send `request`, falling back to the next strategy on an authentication
    /// failure.
    ///
    /// Each strategy is tried at most once, strictly one after the other.
    /// Errors other than authentication failures propagate immediately, and
    /// the last strategy's error is final.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        request: &HttpRequest,
    ) -> Result<Authenticated> {
        let last = self.strategies.len() - 1;
        let mut outcome = Err(ServiceError::authentication(
            "no authentication strategy available",
        ));

        for (index, strategy) in self.strategies.iter().enumerate() {
            outcome = Self::attempt(strategy.as_ref(), transport, request).await;
            match &outcome {
                Ok(_) => {
                    if index > 0 {
                        info!(strategy = strategy.kind().label(), "Authenticated via fallback");
                    }
                    break;
                }
                Err(ServiceError::Authentication(msg)) if index < last => {
                    warn!(
                        strategy = strategy.kind().label(),
                        "Authentication failed, trying next strategy: {}", msg
                    );
                }
                Err(_) => break,
            }
        }

        outcome
    }

    async fn attempt(
        strategy: &dyn AuthStrategy,
        transport: &dyn Transport,
        request: &HttpRequest,
    ) -> Result<Authenticated> {
        let kind = strategy.kind();
        debug!(strategy = kind.label(), "Attempting request");

        let header = strategy.authorization()?;
        let response = transport
            .execute(request.clone().with_authorization(header))
            .await?;

        if is_auth_failure(response.status) {
            return Err(ServiceError::authentication(format!(
                "{} was rejected (HTTP {})",
                kind.label(),
                response.status
            )));
        }

        Ok(Authenticated {
            response,
            strategy: kind,
        })
    }
}

/// Decides which strategies a connection can use.
#[derive(Debug, Clone)]
pub struct AuthResolver {
    broker: Arc<dyn CredentialBroker>,
}

impl AuthResolver {
    /// Create a resolver using `broker` for managed credentials.
    pub fn new(broker: Arc<dyn CredentialBroker>) -> Self {
        Self { broker }
    }

    /// A resolver backed by the OS keyring.
    pub fn with_keyring() -> Self {
        Self::new(Arc::new(KeyringBroker))
    }

    /// Build the strategy chain for `connection`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Configuration` when the connection declares
    /// neither a managed credential nor a secret token. No network call is
    /// made in that case.
    pub fn authenticate(&self, connection: &ConnectionConfig) -> Result<AuthChain> {
        let mut strategies: Vec<Arc<dyn AuthStrategy>> = Vec::new();

        if let Some(channel) = connection.managed_channel() {
            strategies.push(Arc::new(ManagedCredentialStrategy::new(
                channel,
                Arc::clone(&self.broker),
            )));
        }
        if let Some(token) = connection.secret() {
            strategies.push(Arc::new(SharedSecretStrategy::new(token)));
        }

        AuthChain::new(strategies).ok_or_else(|| {
            ServiceError::configuration(format!(
                "connection '{}' has neither a managed credential nor a secret token",
                connection.name
            ))
        })
    }
}

fn keyring_entry(channel: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, channel).map_err(|e| {
        ServiceError::authentication(format!("failed to access keyring for '{}': {}", channel, e))
    })
}

/// Store a managed access token in the OS keyring.
///
/// # Errors
///
/// Returns an error if the token cannot be stored in the keyring.
pub fn store_token(channel: &str, token: &str) -> Result<()> {
    keyring_entry(channel)?.set_password(token).map_err(|e| {
        ServiceError::authentication(format!("failed to store token for '{}': {}", channel, e))
    })
}

/// Retrieve a managed access token from the OS keyring.
///
/// # Errors
///
/// Returns an error if the token cannot be retrieved from the keyring.
pub fn get_token(channel: &str) -> Result<String> {
    keyring_entry(channel)?.get_password().map_err(|e| {
        ServiceError::authentication(format!("failed to retrieve token for '{}': {}", channel, e))
    })
}

/// Delete a managed access token from the OS keyring.
///
/// # Errors
///
/// Returns an error if the token cannot be deleted from the keyring.
pub fn delete_token(channel: &str) -> Result<()> {
    keyring_entry(channel)?.delete_password().map_err(|e| {
        ServiceError::authentication(format!("failed to delete token for '{}': {}", channel, e))
    })
}

/// Check if a token exists in the OS keyring for a channel.
pub fn has_token(channel: &str) -> bool {
    get_token(channel).is_ok()
}
