//! User data post-processors.
//!
//! The set of post-processors is closed. The only one is `ct`, which
//! transpiles a Container Linux Config (YAML) into an Ignition 2.2.0 config
//! (JSON), covering the `ignition`, `passwd`, `storage.files` and `systemd`
//! sections.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ignition spec version produced by the `ct` transpiler.
pub const IGNITION_VERSION: &str = "2.2.0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostprocessError {
    #[error("unknown postprocessor: '{0}'")]
    UnknownPostprocessor(String),

    /// The transpiler rejected the input
    #[error("{0}")]
    Report(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postprocessor {
    /// Container Linux Config transpiler (`ct`)
    ContainerLinux,
}

impl FromStr for Postprocessor {
    type Err = PostprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ct" => Ok(Self::ContainerLinux),
            other => Err(PostprocessError::UnknownPostprocessor(other.to_string())),
        }
    }
}

impl Postprocessor {
    pub fn apply(self, user_data: &str) -> Result<String, PostprocessError> {
        match self {
            Self::ContainerLinux => transpile_container_linux(user_data),
        }
    }
}

// Container Linux Config input

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainerLinuxConfig {
    #[serde(default)]
    ignition: Option<ClcIgnition>,
    #[serde(default)]
    passwd: Option<ClcPasswd>,
    #[serde(default)]
    storage: Option<ClcStorage>,
    #[serde(default)]
    systemd: Option<ClcSystemd>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcIgnition {
    #[serde(default)]
    config: Option<ClcIgnitionConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcIgnitionConfig {
    #[serde(default)]
    append: Vec<ClcConfigReference>,
    #[serde(default)]
    replace: Option<ClcConfigReference>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcConfigReference {
    source: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcPasswd {
    #[serde(default)]
    users: Vec<ClcUser>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcUser {
    name: String,
    #[serde(default)]
    password_hash: Option<String>,
    #[serde(default)]
    ssh_authorized_keys: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcStorage {
    #[serde(default)]
    files: Vec<ClcFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcFile {
    path: String,
    #[serde(default = "default_filesystem")]
    filesystem: String,
    #[serde(default)]
    mode: Option<u32>,
    #[serde(default)]
    contents: Option<ClcFileContents>,
}

fn default_filesystem() -> String {
    "root".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcFileContents {
    #[serde(default)]
    inline: Option<String>,
    #[serde(default)]
    remote: Option<ClcRemote>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcRemote {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcSystemd {
    #[serde(default)]
    units: Vec<ClcUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcUnit {
    name: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    mask: Option<bool>,
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    dropins: Vec<ClcDropin>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClcDropin {
    name: String,
    #[serde(default)]
    contents: Option<String>,
}

// Ignition 2.2.0 output

#[derive(Debug, Default, Serialize)]
struct IgnitionConfig {
    ignition: Ignition,
    networkd: Empty,
    passwd: Passwd,
    storage: Storage,
    systemd: Systemd,
}

#[derive(Debug, Default, Serialize)]
struct Empty {}

#[derive(Debug, Default, Serialize)]
struct Ignition {
    config: IgnitionConfigRefs,
    timeouts: Empty,
    version: &'static str,
}

#[derive(Debug, Default, Serialize)]
struct IgnitionConfigRefs {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    append: Vec<ConfigReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replace: Option<ConfigReference>,
}

#[derive(Debug, Serialize)]
struct ConfigReference {
    source: String,
    verification: Empty,
}

#[derive(Debug, Default, Serialize)]
struct Passwd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct User {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    password_hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    groups: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct Storage {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<File>,
}

#[derive(Debug, Serialize)]
struct File {
    filesystem: String,
    path: String,
    contents: FileContents,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
}

#[derive(Debug, Serialize)]
struct FileContents {
    source: String,
    verification: Empty,
}

#[derive(Debug, Default, Serialize)]
struct Systemd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    units: Vec<Unit>,
}

#[derive(Debug, Serialize)]
struct Unit {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dropins: Vec<Dropin>,
}

#[derive(Debug, Serialize)]
struct Dropin {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    contents: Option<String>,
}

fn data_url(contents: &str) -> String {
    format!("data:,{}", urlencoding::encode(contents))
}

fn file_source(file: &ClcFile) -> Result<String, PostprocessError> {
    match &file.contents {
        None => Ok(data_url("")),
        Some(ClcFileContents {
            inline: Some(_),
            remote: Some(_),
        }) => Err(PostprocessError::Report(format!(
            "file {}: inline and remote contents are mutually exclusive",
            file.path
        ))),
        Some(ClcFileContents {
            inline: Some(inline),
            ..
        }) => Ok(data_url(inline)),
        Some(ClcFileContents {
            remote: Some(remote),
            ..
        }) => Ok(remote.url.clone()),
        Some(_) => Ok(data_url("")),
    }
}

/// Transpile a Container Linux Config into Ignition JSON.
pub fn transpile_container_linux(input: &str) -> Result<String, PostprocessError> {
    let clc: ContainerLinuxConfig = if input.trim().is_empty() {
        ContainerLinuxConfig::default()
    } else {
        serde_yaml::from_str(input)
            .map_err(|e| PostprocessError::Report(format!("error parsing Container Linux Config: {}", e)))?
    };

    let mut config = IgnitionConfig {
        ignition: Ignition {
            version: IGNITION_VERSION,
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(refs) = clc.ignition.and_then(|ignition| ignition.config) {
        config.ignition.config.append = refs
            .append
            .into_iter()
            .map(|reference| ConfigReference {
                source: reference.source,
                verification: Empty {},
            })
            .collect();
        config.ignition.config.replace = refs.replace.map(|reference| ConfigReference {
            source: reference.source,
            verification: Empty {},
        });
    }

    for user in clc.passwd.map(|passwd| passwd.users).unwrap_or_default() {
        if user.name.is_empty() {
            return Err(PostprocessError::Report("passwd user without a name".to_string()));
        }
        config.passwd.users.push(User {
            name: user.name,
            password_hash: user.password_hash,
            ssh_authorized_keys: user.ssh_authorized_keys,
            groups: user.groups,
        });
    }

    for file in clc.storage.map(|storage| storage.files).unwrap_or_default() {
        if !file.path.starts_with('/') {
            return Err(PostprocessError::Report(format!(
                "file path must be absolute: {}",
                file.path
            )));
        }
        let source = file_source(&file)?;
        config.storage.files.push(File {
            filesystem: file.filesystem,
            path: file.path,
            contents: FileContents {
                source,
                verification: Empty {},
            },
            mode: file.mode,
        });
    }

    for unit in clc.systemd.map(|systemd| systemd.units).unwrap_or_default() {
        if unit.name.is_empty() {
            return Err(PostprocessError::Report("systemd unit without a name".to_string()));
        }
        config.systemd.units.push(Unit {
            name: unit.name,
            enabled: unit.enabled,
            mask: unit.mask,
            contents: unit.contents,
            dropins: unit
                .dropins
                .into_iter()
                .map(|dropin| Dropin {
                    name: dropin.name,
                    contents: dropin.contents,
                })
                .collect(),
        });
    }

    serde_json::to_string(&config).map_err(|e| PostprocessError::Report(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_parse_postprocessor() {
        assert_eq!("ct".parse::<Postprocessor>().unwrap(), Postprocessor::ContainerLinux);
        assert_eq!(
            "fcct".parse::<Postprocessor>().unwrap_err(),
            PostprocessError::UnknownPostprocessor("fcct".to_string())
        );
    }

    #[test]
    fn test_transpile_full_config() {
        let clc = r#"
passwd:
  users:
    - name: core
      ssh_authorized_keys:
        - ssh-ed25519 AAAA ops
storage:
  files:
    - path: /etc/hostname
      mode: 420
      contents:
        inline: worker 0
systemd:
  units:
    - name: kubelet.service
      enabled: true
      contents: |
        [Service]
        ExecStart=/usr/bin/kubelet
      dropins:
        - name: 10-env.conf
          contents: "[Service]\nEnvironment=A=1\n"
"#;

        let json: Value = serde_json::from_str(&Postprocessor::ContainerLinux.apply(clc).unwrap()).unwrap();
        assert_eq!(json["ignition"]["version"], "2.2.0");
        assert_eq!(json["passwd"]["users"][0]["name"], "core");
        assert_eq!(json["passwd"]["users"][0]["sshAuthorizedKeys"][0], "ssh-ed25519 AAAA ops");

        let file = &json["storage"]["files"][0];
        assert_eq!(file["filesystem"], "root");
        assert_eq!(file["path"], "/etc/hostname");
        assert_eq!(file["mode"], 420);
        assert_eq!(file["contents"]["source"], "data:,worker%200");

        let unit = &json["systemd"]["units"][0];
        assert_eq!(unit["name"], "kubelet.service");
        assert_eq!(unit["enabled"], true);
        assert_eq!(unit["dropins"][0]["name"], "10-env.conf");
    }

    #[test]
    fn test_empty_input_yields_empty_config() {
        let json: Value = serde_json::from_str(&transpile_container_linux("").unwrap()).unwrap();
        assert_eq!(json["ignition"]["version"], "2.2.0");
        assert!(json["systemd"].get("units").is_none());
    }

    #[test]
    fn test_unknown_section_reported() {
        let err = transpile_container_linux("etcd:\n  version: 3.3.0\n").unwrap_err();
        assert!(matches!(err, PostprocessError::Report(_)));
    }

    #[test]
    fn test_relative_path_reported() {
        let err = transpile_container_linux("storage:\n  files:\n    - path: etc/motd\n").unwrap_err();
        assert!(matches!(err, PostprocessError::Report(ref msg) if msg.contains("absolute")));
    }

    #[test]
    fn test_shell_script_is_not_a_config() {
        assert!(transpile_container_linux("#!/bin/bash\necho hi\n").is_err());
    }
}
