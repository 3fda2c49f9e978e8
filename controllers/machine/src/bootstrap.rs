//! Bootstrap credential issuer.
//!
//! Joining nodes authenticate to the cluster with a short-lived bootstrap
//! token. The token is persisted as a `bootstrap.kubernetes.io/token` Secret
//! and returned in its `<id>.<secret>` form for embedding in user data.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use tracing::info;

use crate::error::ControllerError;
use crate::store::ClusterClient;

/// Secret type of bootstrap token secrets.
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Group granted to joining nodes.
pub const BOOTSTRAP_TOKEN_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;

/// A generated bootstrap token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub id: String,
    pub secret: String,
    pub expiration: DateTime<Utc>,
}

fn random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())]))
        .collect()
}

impl BootstrapToken {
    /// Generate a token valid for `ttl` from now.
    pub fn generate(ttl: Duration) -> Result<Self, ControllerError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid bootstrap token TTL: {}", e)))?;
        Ok(Self {
            id: random_string(TOKEN_ID_LEN),
            secret: random_string(TOKEN_SECRET_LEN),
            expiration: Utc::now() + ttl,
        })
    }

    /// `<id>.<secret>`
    pub fn token(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    pub fn secret_name(&self) -> String {
        format!("bootstrap-token-{}", self.id)
    }

    /// Secret persisting this token in `namespace`.
    pub fn to_secret(&self, namespace: &str) -> Secret {
        let data: BTreeMap<String, ByteString> = [
            ("token-id", self.id.clone()),
            ("token-secret", self.secret.clone()),
            (
                "expiration",
                self.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("usage-bootstrap-authentication", "true".to_string()),
            ("usage-bootstrap-signing", "true".to_string()),
            ("auth-extra-groups", BOOTSTRAP_TOKEN_GROUP.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), ByteString(value.into_bytes())))
        .collect();

        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Issue a bootstrap token and persist it; returns `<id>.<secret>`.
pub async fn issue_bootstrap_token(
    cluster: &dyn ClusterClient,
    namespace: &str,
    ttl: Duration,
) -> Result<String, ControllerError> {
    let token = BootstrapToken::generate(ttl)?;
    cluster.create_secret(&token.to_secret(namespace)).await?;
    info!(
        "Issued bootstrap token {} in {} (expires {})",
        token.id,
        namespace,
        token.expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    Ok(token.token())
}
