use std::fmt;

use base64::Engine;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("authorization header must be '<scheme> <token>'")]
    Shape,
    #[error("unsupported authorization scheme {0:?}")]
    Scheme(String),
    #[error("credential payload is not valid base64")]
    Base64,
    #[error("credential payload is not valid utf-8")]
    Utf8,
    #[error("credential payload has no user/password separator")]
    Separator,
    #[error("credential payload has an empty user id")]
    EmptyUser,
}

/// The raw presented credential, used verbatim as the session cache key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey(String);

impl CredentialKey {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }

    /// Key for a fixed identity (single-tenant service account): the Basic
    /// header that identity would have presented.
    pub fn for_identity(identity: &Identity) -> Self {
        let payload = format!("{}:{}", identity.email, identity.password);
        Self(format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(payload)))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn decode(&self) -> Result<Identity, CredentialError> { decode_basic(&self.0) }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = self.0.split(' ').next().unwrap_or("");
        write!(f, "CredentialKey({} <redacted>)", scheme)
    }
}

/// Upstream login inputs.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub password: String,
}

impl Identity {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("email", &self.email).field("password", &"<redacted>").finish()
    }
}

/// Decode an HTTP Basic `Authorization` value into an [`Identity`].
///
/// The user/password split happens at the first `:` only, so passwords may
/// contain colons.
pub fn decode_basic(header: &str) -> Result<Identity, CredentialError> {
    let parts: Vec<&str> = header.split(' ').collect();
    let [scheme, token] = parts.as_slice() else { return Err(CredentialError::Shape); };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(CredentialError::Scheme(scheme.to_string()));
    }
    let data = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|_| CredentialError::Base64)?;
    let text = String::from_utf8(data).map_err(|_| CredentialError::Utf8)?;
    let (email, password) = text.split_once(':').ok_or(CredentialError::Separator)?;
    if email.is_empty() {
        return Err(CredentialError::EmptyUser);
    }
    Ok(Identity::new(email, password))
}
