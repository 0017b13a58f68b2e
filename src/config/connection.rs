//! Azure DevOps connection configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

/// Default Azure DevOps services host.
pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// One organization/project pairing and the credentials that reach it.
///
/// Either credential mechanism may be absent, but a connection with neither
/// cannot perform writes.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// The name callers use to select this connection.
    pub name: String,

    /// The Azure DevOps organization.
    pub organization: String,

    /// The project within the organization.
    pub project: String,

    /// Service root, without organization.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Keyring channel holding a platform-managed access token.
    #[serde(default)]
    pub managed_credential: Option<String>,

    /// Personal access token used for Basic authentication.
    #[serde(default)]
    pub secret_token: Option<String>,
}

impl ConnectionConfig {
    /// Create a connection without credentials.
    pub fn new(name: &str, organization: &str, project: &str) -> Self {
        Self {
            name: name.to_string(),
            organization: organization.to_string(),
            project: project.to_string(),
            base_url: default_base_url(),
            managed_credential: None,
            secret_token: None,
        }
    }

    /// Attach a managed credential channel.
    pub fn with_managed_credential(mut self, channel: &str) -> Self {
        self.managed_credential = Some(channel.to_string());
        self
    }

    /// Attach a personal access token.
    pub fn with_secret_token(mut self, token: &str) -> Self {
        self.secret_token = Some(token.to_string());
        self
    }

    /// Validate this connection.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError::ValidationError` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connection name cannot be empty".to_string(),
            ));
        }

        if self.name.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "connection name '{}' cannot contain whitespace",
                self.name
            )));
        }

        if self.organization.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "connection '{}': organization cannot be empty",
                self.name
            )));
        }

        if self.project.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "connection '{}': project cannot be empty",
                self.name
            )));
        }

        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(ConfigError::ValidationError(format!(
                "connection '{}': base_url must start with http:// or https://",
                self.name
            )));
        }

        Ok(())
    }

    /// The managed credential channel, ignoring blank values.
    pub fn managed_channel(&self) -> Option<&str> {
        self.managed_credential
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The secret token, ignoring blank values.
    pub fn secret(&self) -> Option<&str> {
        self.secret_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether at least one authentication mechanism is present.
    pub fn has_credentials(&self) -> bool {
        self.managed_channel().is_some() || self.secret().is_some()
    }

    /// `<base>/<organization>/<project>` with path segments encoded.
    pub fn project_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(self.organization.trim()),
            urlencoding::encode(self.project.trim())
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("base_url", &self.base_url)
            .field("managed_credential", &self.managed_credential)
            .field(
                "secret_token",
                &self.secret_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contoso() -> ConnectionConfig {
        ConnectionConfig::new("contoso", "contoso", "Web")
    }

    #[test]
    fn test_valid_connection() {
        assert!(contoso().validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let conn = ConnectionConfig::new("", "contoso", "Web");
        let err = conn.validate().unwrap_err();
        assert!(err.to_string().contains("name cannot be empty"));
    }

    #[test]
    fn test_whitespace_name_rejected() {
        let conn = ConnectionConfig::new("my org", "contoso", "Web");
        let err = conn.validate().unwrap_err();
        assert!(err.to_string().contains("cannot contain whitespace"));
    }

    #[test]
    fn test_empty_project_rejected() {
        let conn = ConnectionConfig::new("contoso", "contoso", "  ");
        let err = conn.validate().unwrap_err();
        assert!(err.to_string().contains("project cannot be empty"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut conn = contoso();
        conn.base_url = "dev.azure.com".to_string();
        let err = conn.validate().unwrap_err();
        assert!(err.to_string().contains("must start with http"));
    }

    #[test]
    fn test_blank_credentials_ignored() {
        let conn = contoso().with_secret_token("  ").with_managed_credential("");
        assert!(!conn.has_credentials());
        assert_eq!(conn.secret(), None);
        assert_eq!(conn.managed_channel(), None);
    }

    #[test]
    fn test_has_credentials() {
        assert!(contoso().with_secret_token("pat").has_credentials());
        assert!(contoso().with_managed_credential("entra").has_credentials());
        assert!(!contoso().has_credentials());
    }

    #[test]
    fn test_project_url_encodes_segments() {
        let mut conn = ConnectionConfig::new("fab", "fabrikam", "Mobile App");
        conn.base_url = "https://dev.azure.com/".to_string();
        assert_eq!(
            conn.project_url(),
            "https://dev.azure.com/fabrikam/Mobile%20App"
        );
    }

    #[test]
    fn test_debug_does_not_expose_token() {
        let conn = contoso().with_secret_token("super-secret-pat");
        let debug_output = format!("{:?}", conn);
        assert!(!debug_output.contains("super-secret-pat"));
        assert!(debug_output.contains("<redacted>"));
    }

    #[test]
    fn test_connection_serialization() {
        let conn = contoso().with_managed_credential("entra");
        let toml_str = toml::to_string(&conn).unwrap();
        let parsed: ConnectionConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, conn);
    }
}
