//! Token acquisition for the `microsoft` credential.
//!
//! Three kinds of material are accepted, checked in this order:
//!
//! 1. `access_token`: used as-is.
//! 2. `tenant_id` + `client_id` + `client_secret`: OAuth2 client credentials
//!    grant against `{authority}/{tenant}/oauth2/v2.0/token`.
//! 3. `tenant_id` + `client_id` + `certificate_pem` + `certificate_thumbprint`:
//!    the same grant authenticated by an RS256 client assertion.
//!
//! Tokens are acquired once per invocation and never cached.

use base64::Engine;
use graphops::define_credential;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GraphError;

define_credential! {
    /// Microsoft identity platform credential used for Graph calls
    MicrosoftCredential("microsoft") {
        /// Pre-issued bearer token
        #[optional]
        #[secret]
        access_token: Option<String>,
        /// Directory (tenant) id
        #[optional]
        tenant_id: Option<String>,
        /// Application (client) id
        #[optional]
        client_id: Option<String>,
        /// Client secret for the client credentials grant
        #[optional]
        #[secret]
        client_secret: Option<String>,
        /// PEM-encoded RSA private key of the application certificate
        #[optional]
        #[secret]
        certificate_pem: Option<String>,
        /// Hex SHA-1 thumbprint of the application certificate
        #[optional]
        certificate_thumbprint: Option<String>,
        /// Graph base URL override
        #[optional]
        endpoint: Option<String>,
        /// Identity platform authority override
        #[optional]
        authority: Option<String>,
    }
}

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Authentication material selected from a [`MicrosoftCredential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    AccessToken(&'a str),
    ClientSecret {
        tenant_id: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
    },
    ClientCertificate {
        tenant_id: &'a str,
        client_id: &'a str,
        private_key_pem: &'a str,
        thumbprint: &'a str,
    },
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl MicrosoftCredential {
    /// Picks the authentication method, rejecting missing or contradictory
    /// material.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidInput`] when no usable method is present,
    /// when both a token and app secrets are given, or when both a secret and
    /// a certificate are given.
    pub fn method(&self) -> Result<AuthMethod<'_>, GraphError> {
        let secret = present(self.client_secret.as_ref());
        let certificate = present(self.certificate_pem.as_ref());

        if let Some(token) = present(self.access_token.as_ref()) {
            if secret.is_some() || certificate.is_some() {
                return Err(GraphError::InvalidInput(
                    "credential sets access_token together with client_secret or certificate_pem"
                        .to_string(),
                ));
            }
            return Ok(AuthMethod::AccessToken(token));
        }

        let (Some(tenant_id), Some(client_id)) = (
            present(self.tenant_id.as_ref()),
            present(self.client_id.as_ref()),
        ) else {
            return Err(GraphError::InvalidInput(
                "credential needs access_token, or tenant_id and client_id with a client_secret \
                 or certificate"
                    .to_string(),
            ));
        };

        match (secret, certificate) {
            (Some(client_secret), None) => Ok(AuthMethod::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            }),
            (None, Some(private_key_pem)) => {
                let thumbprint = present(self.certificate_thumbprint.as_ref()).ok_or_else(|| {
                    GraphError::InvalidInput(
                        "certificate_thumbprint is required with certificate_pem".to_string(),
                    )
                })?;
                Ok(AuthMethod::ClientCertificate {
                    tenant_id,
                    client_id,
                    private_key_pem,
                    thumbprint,
                })
            }
            (Some(_), Some(_)) => Err(GraphError::InvalidInput(
                "credential sets both client_secret and certificate_pem".to_string(),
            )),
            (None, None) => Err(GraphError::InvalidInput(
                "credential needs client_secret or certificate_pem with tenant_id and client_id"
                    .to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// The `.default` scope for the Graph resource behind `endpoint`.
pub fn default_scope(endpoint: &Url) -> String {
    format!("{}/.default", endpoint.origin().ascii_serialization())
}

/// Returns a bearer token for `method`, calling the token endpoint unless a
/// token was supplied directly.
///
/// # Errors
///
/// Returns [`GraphError::InvalidInput`] for unusable certificate material and
/// [`GraphError::Auth`] when the identity platform rejects the request.
pub async fn acquire_token(
    http: &reqwest::Client,
    method: AuthMethod<'_>,
    authority: &str,
    scope: &str,
) -> Result<String, GraphError> {
    let (tenant_id, client_id) = match method {
        AuthMethod::AccessToken(token) => return Ok(token.to_string()),
        AuthMethod::ClientSecret {
            tenant_id,
            client_id,
            ..
        }
        | AuthMethod::ClientCertificate {
            tenant_id,
            client_id,
            ..
        } => (tenant_id, client_id),
    };

    let token_url = format!(
        "{}/{tenant_id}/oauth2/v2.0/token",
        authority.trim_end_matches('/')
    );

    let mut form = vec![
        ("grant_type", "client_credentials".to_string()),
        ("client_id", client_id.to_string()),
        ("scope", scope.to_string()),
    ];
    if let AuthMethod::ClientCertificate {
        private_key_pem,
        thumbprint,
        ..
    } = method
    {
        debug!(tenant_id, client_id, "requesting token with client certificate");
        let assertion = client_assertion(&token_url, client_id, private_key_pem, thumbprint)?;
        form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
        form.push(("client_assertion", assertion));
    } else if let AuthMethod::ClientSecret { client_secret, .. } = method {
        debug!(tenant_id, client_id, "requesting token with client secret");
        form.push(("client_secret", client_secret.to_string()));
    }

    let response = http
        .post(&token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| GraphError::Auth(format!("token request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GraphError::Auth(format!("token response unreadable: {e}")))?;

    if !status.is_success() {
        let err: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        return Err(GraphError::Auth(format!(
            "identity platform returned {status}: {} {}",
            err.error, err.error_description
        )));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| GraphError::Auth(format!("malformed token response: {e}")))?;
    Ok(token.access_token)
}

/// Signs the client assertion JWT for the certificate flow.
fn client_assertion(
    audience: &str,
    client_id: &str,
    private_key_pem: &str,
    thumbprint: &str,
) -> Result<String, GraphError> {
    let thumbprint: String = thumbprint
        .chars()
        .filter(|c| !matches!(c, ':' | ' '))
        .collect();
    let digest = hex::decode(&thumbprint).map_err(|e| {
        GraphError::InvalidInput(format!("certificate_thumbprint is not hex: {e}"))
    })?;
    if digest.len() != 20 {
        return Err(GraphError::InvalidInput(
            "certificate_thumbprint must be a SHA-1 digest (40 hex characters)".to_string(),
        ));
    }

    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| GraphError::InvalidInput(format!("certificate_pem is not an RSA key: {e}")))?;

    let mut header = Header::new(Algorithm::RS256);
    header.x5t = Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest));

    let now = chrono::Utc::now().timestamp();
    let claims = AssertionClaims {
        aud: audience,
        iss: client_id,
        sub: client_id,
        jti: uuid::Uuid::new_v4().to_string(),
        iat: now,
        nbf: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|e| GraphError::Auth(format!("failed to sign client assertion: {e}")))
}
