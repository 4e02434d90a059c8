//! JSON channels configuration file support (spec §6).
//!
//! Mirrors the teacher's `ConfigFile::from_file`/`into_server_config` split,
//! swapped from TOML to JSON because spec §6 fixes the on-disk shape: a
//! top-level `defaultUser`/`defaultPassword` pair plus a `channels` array of
//! objects that already match `cmaf_ingest_core::ChannelConfig` field for
//! field.

use std::path::Path;

use cmaf_ingest_core::ChannelConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelsConfigFile {
    pub default_user: Option<String>,
    pub default_password: Option<String>,
    pub channels: Vec<ChannelConfig>,
}

impl ChannelsConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ChannelsConfigFile = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Per-channel configs with `defaultUser`/`defaultPassword` filled in
    /// wherever a channel entry left its own credentials unset, keyed by
    /// channel name for the channel manager's static lookup.
    pub fn into_channel_configs(self) -> Vec<ChannelConfig> {
        let ChannelsConfigFile {
            default_user,
            default_password,
            channels,
        } = self;

        channels
            .into_iter()
            .map(|mut cfg| {
                if cfg.auth_user.is_none() {
                    cfg.auth_user = default_user.clone();
                    cfg.auth_password = default_password.clone();
                }
                cfg
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_spec_shaped_json() {
        let json = r#"{
            "defaultUser": "enc",
            "defaultPassword": "secret",
            "channels": [
                { "name": "live1", "startNr": 0, "timeShiftBufferDepthS": 30,
                  "reps": [ { "name": "video", "bitrate": 4000000 } ] },
                { "name": "clear", "startNr": 1 }
            ]
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = ChannelsConfigFile::from_file(file.path()).unwrap();
        assert_eq!(loaded.channels.len(), 2);

        let configs = loaded.into_channel_configs();
        let live1 = configs.iter().find(|c| c.name == "live1").unwrap();
        assert_eq!(live1.auth_user.as_deref(), Some("enc"));
        assert_eq!(live1.time_shift_buffer_depth_s, 30);
        assert_eq!(live1.reps[0].bitrate, Some(4_000_000));
    }

    #[test]
    fn explicit_channel_credentials_override_defaults() {
        let json = r#"{
            "defaultUser": "enc", "defaultPassword": "secret",
            "channels": [ { "name": "protected", "authUser": "alice", "authPassword": "hunter2" } ]
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let configs = ChannelsConfigFile::from_file(file.path())
            .unwrap()
            .into_channel_configs();
        assert_eq!(configs[0].auth_user.as_deref(), Some("alice"));
        assert_eq!(configs[0].auth_password.as_deref(), Some("hunter2"));
    }
}
