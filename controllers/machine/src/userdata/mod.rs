//! User data rendering.
//!
//! The startup script comes from a Secret referenced by the provider spec.
//! Unless templating is disabled it is rendered with a fixed set of
//! `{{ key }}` placeholders, then optionally handed to a post-processor.

pub mod postprocess;

use crds::OpenstackProviderSpec;
use k8s_openapi::api::core::v1::Secret;
use thiserror::Error;

pub use postprocess::{PostprocessError, Postprocessor};

/// Secret key holding the raw script.
pub const USER_DATA_KEY: &str = "userData";

/// Secret key whose presence disables templating.
pub const DISABLE_TEMPLATING_KEY: &str = "disableTemplating";

/// Secret key naming the post-processor.
pub const POSTPROCESSOR_KEY: &str = "postprocessor";

/// User data settings read from a Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataSource {
    /// Raw payload; only decoded when templating or post-processing runs
    pub data: Vec<u8>,
    pub disable_templating: bool,
    pub postprocessor: Option<String>,
}

impl UserDataSource {
    /// Read the settings from a Secret; `None` when `userData` is missing.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let user_data = data.get(USER_DATA_KEY)?;
        Some(Self {
            data: user_data.0.clone(),
            disable_templating: data.contains_key(DISABLE_TEMPLATING_KEY),
            postprocessor: data
                .get(POSTPROCESSOR_KEY)
                .map(|p| String::from_utf8_lossy(&p.0).trim().to_string()),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("unknown placeholder '{0}'")]
    UnknownKey(String),

    #[error("user data is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Text view of a payload that is about to be templated or post-processed.
pub fn user_data_text(data: &[u8]) -> Result<&str, RenderError> {
    Ok(std::str::from_utf8(data)?)
}

/// Values available to a template.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub machine_name: &'a str,
    pub machine_namespace: &'a str,
    pub cluster_name: &'a str,
    pub spec: &'a OpenstackProviderSpec,
    /// Set for joining nodes only
    pub bootstrap_token: Option<&'a str>,
}

impl RenderContext<'_> {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "machine.name" => Some(self.machine_name),
            "machine.namespace" => Some(self.machine_namespace),
            "cluster.name" => Some(self.cluster_name),
            "providerSpec.image" => Some(&self.spec.image),
            "providerSpec.flavor" => Some(&self.spec.flavor),
            "providerSpec.keyName" => Some(&self.spec.key_name),
            "bootstrap.token" => self.bootstrap_token,
            _ => None,
        }
    }
}

/// Substitute every `{{ key }}` placeholder in `template`.
pub fn render(template: &str, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(RenderError::Unterminated(offset + start))?;

        let key = after[..end].trim();
        let value = ctx
            .lookup(key)
            .ok_or_else(|| RenderError::UnknownKey(key.to_string()))?;
        out.push_str(value);

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn spec() -> OpenstackProviderSpec {
        OpenstackProviderSpec {
            image: "rhcos".to_string(),
            flavor: "m1.large".to_string(),
            key_name: "ops".to_string(),
            ..Default::default()
        }
    }

    fn ctx<'a>(spec: &'a OpenstackProviderSpec, token: Option<&'a str>) -> RenderContext<'a> {
        RenderContext {
            machine_name: "worker-0",
            machine_namespace: "machines",
            cluster_name: "cluster-1",
            spec,
            bootstrap_token: token,
        }
    }

    #[test]
    fn test_render_control_node() {
        let spec = spec();
        let rendered = render(
            "#!/bin/bash\nhostname {{ machine.name }}\necho {{cluster.name}}/{{ providerSpec.flavor }}",
            &ctx(&spec, None),
        )
        .unwrap();
        assert_eq!(rendered, "#!/bin/bash\nhostname worker-0\necho cluster-1/m1.large");
    }

    #[test]
    fn test_render_joining_node_token() {
        let spec = spec();
        let rendered = render("kubeadm join --token {{ bootstrap.token }}", &ctx(&spec, Some("abc123.0123456789abcdef")))
            .unwrap();
        assert_eq!(rendered, "kubeadm join --token abc123.0123456789abcdef");
    }

    #[test]
    fn test_token_unavailable_to_control_node() {
        let spec = spec();
        let err = render("{{ bootstrap.token }}", &ctx(&spec, None)).unwrap_err();
        assert_eq!(err, RenderError::UnknownKey("bootstrap.token".to_string()));
    }

    #[test]
    fn test_render_errors() {
        let spec = spec();
        assert_eq!(
            render("a {{ machine.name", &ctx(&spec, None)).unwrap_err(),
            RenderError::Unterminated(2)
        );
        assert_eq!(
            render("{{ machine.uid }}", &ctx(&spec, None)).unwrap_err(),
            RenderError::UnknownKey("machine.uid".to_string())
        );
    }

    #[test]
    fn test_plain_text_untouched() {
        let spec = spec();
        assert_eq!(render("no placeholders } {", &ctx(&spec, None)).unwrap(), "no placeholders } {");
    }

    #[test]
    fn test_source_from_secret() {
        let mut data = BTreeMap::new();
        data.insert(USER_DATA_KEY.to_string(), ByteString(b"#cloud-config".to_vec()));
        data.insert(DISABLE_TEMPLATING_KEY.to_string(), ByteString(Vec::new()));
        data.insert(POSTPROCESSOR_KEY.to_string(), ByteString(b"ct\n".to_vec()));
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };

        let source = UserDataSource::from_secret(&secret).unwrap();
        assert_eq!(source.data, b"#cloud-config");
        assert!(source.disable_templating);
        assert_eq!(source.postprocessor.as_deref(), Some("ct"));
    }

    #[test]
    fn test_source_keeps_binary_payload() {
        let payload = vec![0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe, 0x80];
        let mut data = BTreeMap::new();
        data.insert(USER_DATA_KEY.to_string(), ByteString(payload.clone()));
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };

        let source = UserDataSource::from_secret(&secret).unwrap();
        assert_eq!(source.data, payload);
        assert!(matches!(user_data_text(&source.data), Err(RenderError::InvalidUtf8(_))));
    }

    #[test]
    fn test_source_requires_user_data_key() {
        assert!(UserDataSource::from_secret(&Secret::default()).is_none());
    }
}
