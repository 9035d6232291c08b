//! Identity-provider login handshake.
//!
//! Navigate to the application, fill the provider's form, then wait for the
//! redirect back to the application origin and check the landing title.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::Result;
use crate::catalog;
use crate::config::{Config, CredentialsConfig};
use crate::error::AuthError;
use crate::page::Page;
use crate::resolver::ElementResolver;
use crate::wait::{Backoff, wait_until};

/// Actor roles in the approval chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Coordinator,
    Acceptor,
    Owner,
    Approver,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Requester,
        Self::Coordinator,
        Self::Acceptor,
        Self::Owner,
        Self::Approver,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Coordinator => "coordinator",
            Self::Acceptor => "acceptor",
            Self::Owner => "owner",
            Self::Approver => "approver",
        }
    }

    /// `MOCRUN_<ROLE>_USER`
    #[must_use]
    pub fn user_variable(self) -> String {
        format!("MOCRUN_{}_USER", self.as_str().to_ascii_uppercase())
    }

    /// `MOCRUN_<ROLE>_PASS`
    #[must_use]
    pub fn password_variable(self) -> String {
        format!("MOCRUN_{}_PASS", self.as_str().to_ascii_uppercase())
    }

    /// Configured default username.
    #[must_use]
    pub fn default_user(self, credentials: &CredentialsConfig) -> &str {
        match self {
            Self::Requester => &credentials.requester_user,
            Self::Coordinator => &credentials.coordinator_user,
            Self::Acceptor => &credentials.acceptor_user,
            Self::Owner => &credentials.owner_user,
            Self::Approver => &credentials.approver_user,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown role: {s}. Expected one of: requester, coordinator, acceptor, owner, approver"
                )
            })
    }
}

/// Username and password for one actor. `Debug` never prints the password.
#[derive(Clone)]
pub struct ActorCredential {
    pub role: Role,
    pub username: String,
    password: String,
}

impl ActorCredential {
    #[must_use]
    pub fn new(role: Role, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            role,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `MOCRUN_<ROLE>_USER` (falling back to `default_user`) and
    /// `MOCRUN_<ROLE>_PASS` from the process environment.
    pub fn from_env(role: Role, default_user: &str) -> Result<Self> {
        Self::from_lookup(role, default_user, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        role: Role,
        default_user: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let username = lookup(&role.user_variable())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| default_user.to_string());
        let password_variable = role.password_variable();
        let password = lookup(&password_variable)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::MissingCredential {
                role: role.to_string(),
                variable: password_variable,
            })?;
        Ok(Self::new(role, username, password))
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ActorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorCredential")
            .field("role", &self.role)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A page that completed the login handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSession {
    pub role: Role,
    pub username: String,
    pub landed_url: String,
    pub title: String,
}

/// Performs the login handshake for one actor.
#[derive(Debug, Clone)]
pub struct SessionAuthenticator {
    login_url: String,
    origin: String,
    expected_title: String,
    redirect_timeout: Duration,
    title_timeout: Duration,
}

impl SessionAuthenticator {
    #[must_use]
    pub fn new(login_url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            origin: origin.into(),
            expected_title: "Host App".to_string(),
            redirect_timeout: Duration::from_secs(60),
            title_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.app.login_url(), config.app.origin())
            .expected_title(config.app.expected_title.clone())
            .redirect_timeout(config.timeouts.login_redirect())
            .title_timeout(config.timeouts.element())
    }

    #[must_use]
    pub fn expected_title(mut self, title: impl Into<String>) -> Self {
        self.expected_title = title.into();
        self
    }

    #[must_use]
    pub fn redirect_timeout(mut self, timeout: Duration) -> Self {
        self.redirect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn title_timeout(mut self, timeout: Duration) -> Self {
        self.title_timeout = timeout;
        self
    }

    #[instrument(level = "info", skip_all, fields(role = %credential.role, username = %credential.username))]
    pub async fn login<P: Page>(
        &self,
        resolver: &ElementResolver<'_, P>,
        credential: &ActorCredential,
    ) -> Result<AuthenticatedSession> {
        let page = resolver.page();
        page.goto(&self.login_url).await?;

        resolver.fill(&catalog::login::username(), credential.username.clone()).await?;
        resolver.fill(&catalog::login::password(), credential.password()).await?;
        resolver.click(&catalog::login::submit()).await?;

        let backoff = Backoff::default();
        let origin = self.origin.as_str();
        let redirected = wait_until(
            format!("redirect to {origin}"),
            || async move { page.url().await.is_ok_and(|url| url.starts_with(origin)) },
            self.redirect_timeout,
            &backoff,
        )
        .await;
        let landed_url = page.url().await?;
        if redirected.is_err() {
            return Err(AuthError::RedirectTimeout {
                expected_origin: self.origin.clone(),
                last_url: landed_url,
            }
            .into());
        }

        let expected = self.expected_title.as_str();
        let titled = wait_until(
            format!("title containing '{expected}'"),
            || async move { page.title().await.is_ok_and(|t| t.contains(expected)) },
            self.title_timeout,
            &backoff,
        )
        .await;
        let title = page.title().await?;
        if titled.is_err() {
            return Err(AuthError::TitleMismatch {
                expected: self.expected_title.clone(),
                actual: title,
            }
            .into());
        }

        info!(landed_url = %landed_url, "Login complete");
        Ok(AuthenticatedSession {
            role: credential.role,
            username: credential.username.clone(),
            landed_url,
            title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::page::memory::{MemoryPage, NodeSpec, Reaction};
    use std::collections::HashMap;

    const APP: &str = "https://moc.test";
    const IDP: &str = "https://idp.test/auth/realms/moc";

    fn login_page(title_after: &str) -> MemoryPage {
        let page = MemoryPage::new("about:blank");
        page.on_goto(APP, Reaction::SetUrl(IDP.to_string()));
        page.add(NodeSpec::role("textbox").id("username"));
        page.add(NodeSpec::role("textbox").id("password"));
        let submit = page.add(NodeSpec::role("button").id("kc-login").name("Sign In"));
        page.on_click(submit, Reaction::SetUrl(format!("{APP}/tabs/dashboard")));
        page.on_click(submit, Reaction::SetTitle(title_after.to_string()));
        page
    }

    fn authenticator() -> SessionAuthenticator {
        SessionAuthenticator::new(format!("{APP}/tabs/dashboard"), APP)
            .redirect_timeout(Duration::from_secs(2))
            .title_timeout(Duration::from_millis(200))
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Owner".parse::<Role>().unwrap(), Role::Owner);
        assert_eq!(" approver ".parse::<Role>().unwrap(), Role::Approver);
        assert!("auditor".parse::<Role>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn login_lands_on_application() {
        let page = login_page("Host App");
        let resolver = ElementResolver::new(&page);
        let credential = ActorCredential::new(Role::Coordinator, "moc_coordinator1", "pw");

        let session = authenticator().login(&resolver, &credential).await.unwrap();
        assert_eq!(session.role, Role::Coordinator);
        assert_eq!(session.landed_url, format!("{APP}/tabs/dashboard"));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_title_is_reported() {
        let page = login_page("Access denied");
        let resolver = ElementResolver::new(&page);
        let credential = ActorCredential::new(Role::Owner, "moc_owner1", "pw");

        let err = authenticator().login(&resolver, &credential).await.unwrap_err();
        match err {
            Error::Auth(AuthError::TitleMismatch { expected, actual }) => {
                assert_eq!(expected, "Host App");
                assert_eq!(actual, "Access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_on_provider_times_out() {
        let page = MemoryPage::new("about:blank");
        page.on_goto(APP, Reaction::SetUrl(IDP.to_string()));
        page.add(NodeSpec::role("textbox").id("username"));
        page.add(NodeSpec::role("textbox").id("password"));
        page.add(NodeSpec::role("button").id("kc-login"));
        let resolver = ElementResolver::new(&page);
        let credential = ActorCredential::new(Role::Acceptor, "moc_acceptor1", "bad");

        let err = authenticator().login(&resolver, &credential).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::RedirectTimeout { ref last_url, .. }) if last_url == IDP
        ));
    }

    #[test]
    fn credential_lookup_prefers_env_user() {
        let env: HashMap<&str, &str> = [
            ("MOCRUN_APPROVER_USER", "approver7"),
            ("MOCRUN_APPROVER_PASS", "s3cret"),
        ]
        .into_iter()
        .collect();
        let credential = ActorCredential::from_lookup(Role::Approver, "moc_approver1", |k| {
            env.get(k).map(|v| (*v).to_string())
        })
        .unwrap();
        assert_eq!(credential.username, "approver7");
        assert_eq!(credential.password(), "s3cret");
        assert!(!format!("{credential:?}").contains("s3cret"));
    }

    #[test]
    fn missing_password_names_the_variable() {
        let err = ActorCredential::from_lookup(Role::Requester, "moc_requester1", |_| None)
            .unwrap_err();
        match err {
            Error::Auth(AuthError::MissingCredential { role, variable }) => {
                assert_eq!(role, "requester");
                assert_eq!(variable, "MOCRUN_REQUESTER_PASS");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn default_users_come_from_config() {
        let credentials = CredentialsConfig::default();
        assert_eq!(Role::Owner.default_user(&credentials), "moc_owner1");
        assert_eq!(Role::ALL.len(), 5);
    }
}
