//! Backend credentials.

use std::fmt;

use reqwest::header::COOKIE;
use reqwest::RequestBuilder;

/// Variable holding a bearer token.
pub const TOKEN_ENV: &str = "KUBEFLOW_TOKEN";

/// Variable holding a session cookie.
pub const COOKIE_ENV: &str = "KUBEFLOW_COOKIE";

/// Optional bearer token and session cookie. Both absent means anonymous
/// access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Sent as `Authorization: Bearer`.
    pub token: Option<String>,
    /// Sent as a raw `Cookie` header.
    pub cookie: Option<String>,
}

impl Credentials {
    /// No credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the session cookie.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Reads [`TOKEN_ENV`] and [`COOKIE_ENV`]; empty values count as absent.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            token: read(TOKEN_ENV),
            cookie: read(COOKIE_ENV),
        }
    }

    /// Returns true if nothing is sent.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.token.is_none() && self.cookie.is_none()
    }

    /// Attaches the credentials to a request.
    pub fn apply(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }
        request
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials::anonymous().with_token("secret-token");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_apply_sets_headers() {
        let credentials = Credentials::anonymous()
            .with_token("abc")
            .with_cookie("session=1");
        let request = credentials
            .apply(reqwest::Client::new().get("http://localhost/apis"))
            .build()
            .unwrap();

        assert_eq!(request.headers()["authorization"], "Bearer abc");
        assert_eq!(request.headers()["cookie"], "session=1");
    }

    #[test]
    fn test_anonymous_sends_nothing() {
        let request = Credentials::anonymous()
            .apply(reqwest::Client::new().get("http://localhost/apis"))
            .build()
            .unwrap();
        assert!(request.headers().is_empty());
        assert!(Credentials::anonymous().is_anonymous());
    }
}
