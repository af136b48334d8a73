// Copyright 2025 Callflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration layering.
//!
//! Three layers, each a per-field override of the one below: library
//! defaults (applied by the protocol builders), deployment defaults
//! ([`RouterConfig`]), and per-call options passed to a session operation.
//! All option structs use `Option` fields so "unset" and "set to the
//! default value" stay distinguishable through the merge.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};

/// Deployment-level defaults for one [`CallRouter`](crate::CallRouter).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Router-wide default for how long a suspend waits for the next turn,
    /// in seconds. `None` falls through to `read.timeout_secs`.
    pub timeout_secs: Option<u64>,

    /// Reject characters the TTS cannot speak in text playables.
    pub remove_invalid_chars: bool,

    pub read: ReadDefaults,
    pub menu: MenuOptions,
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.menu.prepend_to_next_action.is_some() {
            bail!("prepend_to_next_action is not supported with the JSON module API");
        }
        Ok(())
    }
}

/// Defaults for the `read` operation, per collection mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadDefaults {
    /// Suspend deadline in seconds; 0 or unset means "do not wait".
    pub timeout_secs: Option<u64>,
    pub tap: TapOptions,
    pub stt: SttOptions,
    pub record: RecordOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapOptions {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub timeout_secs: Option<u32>,
    /// `"number"` | `"digits"` | `"no"` — how the typed answer is read back.
    pub confirm_type: Option<String>,
    pub skip_key: Option<String>,
    pub skip_value: Option<String>,
    pub set_music: Option<bool>,
}

impl TapOptions {
    pub fn layered_over(&self, base: &Self) -> Self {
        TapOptions {
            min: self.min.or(base.min),
            max: self.max.or(base.max),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            confirm_type: self.confirm_type.clone().or_else(|| base.confirm_type.clone()),
            skip_key: self.skip_key.clone().or_else(|| base.skip_key.clone()),
            skip_value: self.skip_value.clone().or_else(|| base.skip_value.clone()),
            set_music: self.set_music.or(base.set_music),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttOptions {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub file_name: Option<String>,
    pub save_folder: Option<String>,
    pub campaign_billing: Option<String>,
}

impl SttOptions {
    pub fn layered_over(&self, base: &Self) -> Self {
        SttOptions {
            min: self.min.or(base.min),
            max: self.max.or(base.max),
            file_name: self.file_name.clone().or_else(|| base.file_name.clone()),
            save_folder: self.save_folder.clone().or_else(|| base.save_folder.clone()),
            campaign_billing: self
                .campaign_billing
                .clone()
                .or_else(|| base.campaign_billing.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    pub min: Option<u32>,
    pub max: Option<u32>,
    /// `"confirmOnly"` | `"full"` | `"no"`.
    pub confirm: Option<String>,
    pub file_name: Option<String>,
    pub save_folder: Option<String>,
}

impl RecordOptions {
    pub fn layered_over(&self, base: &Self) -> Self {
        RecordOptions {
            min: self.min.or(base.min),
            max: self.max.or(base.max),
            confirm: self.confirm.clone().or_else(|| base.confirm.clone()),
            file_name: self.file_name.clone().or_else(|| base.file_name.clone()),
            save_folder: self.save_folder.clone().or_else(|| base.save_folder.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuOptions {
    pub name: Option<String>,
    pub times: Option<u32>,
    pub timeout_secs: Option<u32>,
    pub enabled_keys: Option<String>,
    pub set_music: Option<bool>,
    pub error_return: Option<String>,
    /// Navigate here automatically once the menu finished playing `times`
    /// rounds; non-empty turns the menu into a terminating operation.
    pub extension_change: Option<String>,
    pub remove_invalid_chars: Option<bool>,
    /// Legacy toggle with no JSON-API equivalent; rejected by
    /// [`RouterConfig::validate`].
    pub prepend_to_next_action: Option<bool>,
}

impl MenuOptions {
    pub fn layered_over(&self, base: &Self) -> Self {
        MenuOptions {
            name: self.name.clone().or_else(|| base.name.clone()),
            times: self.times.or(base.times),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            enabled_keys: self.enabled_keys.clone().or_else(|| base.enabled_keys.clone()),
            set_music: self.set_music.or(base.set_music),
            error_return: self.error_return.clone().or_else(|| base.error_return.clone()),
            extension_change: self
                .extension_change
                .clone()
                .or_else(|| base.extension_change.clone()),
            remove_invalid_chars: self.remove_invalid_chars.or(base.remove_invalid_chars),
            prepend_to_next_action: self.prepend_to_next_action.or(base.prepend_to_next_action),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialOptions {
    pub name: Option<String>,
    pub dial_phone: Option<String>,
    pub display_number: Option<String>,
    pub add_digits: Option<String>,
    pub routing_music: Option<bool>,
    pub ring_sec: Option<u32>,
    pub limit: Option<u32>,
    pub campaign_billing: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpDialOptions {
    pub name: Option<String>,
    pub dial_phone: Option<String>,
    pub dial_ip: Option<String>,
    pub display_number: Option<String>,
    pub routing_music: Option<bool>,
    pub ring_sec: Option<u32>,
    pub limit: Option<u32>,
}

/// Per-call options for [`CallSession::read`](crate::CallSession::read).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Suspend deadline override, seconds.
    pub timeout_secs: Option<u64>,
    /// Answer field name; auto-generated (`val_1`, `val_2`, ...) if unset.
    pub val_name: Option<String>,
    /// Accept an empty answer; the read then returns `empty_val`.
    pub allow_empty: bool,
    /// Stand-in value returned for an empty answer when `allow_empty` is
    /// set. Defaults to `"None"`.
    pub empty_val: Option<String>,
    pub remove_invalid_chars: Option<bool>,
    pub tap: TapOptions,
    pub stt: SttOptions,
    pub record: RecordOptions,
}

/// Option names from the pre-JSON API and their replacements. Seeing one is
/// a handler bug, not something to silently translate.
pub const DEPRECATED_READ_OPTIONS: &[(&str, &str)] = &[
    ("play_ok_mode", "confirm_type"),
    ("read_none", "allow_empty"),
    ("read_none_var", "empty_val"),
    ("block_change_type_lang", "block_change_keyboard"),
    ("block_zero", "skip_key / enabled_keys"),
    ("block_asterisk", "skip_key / enabled_keys"),
    ("record_ok", "confirm"),
    ("record_hangup", "save_on_hangup"),
    ("record_attach", "append_to_existing_file"),
    ("allow_typing", "confirm_type"),
    ("use_records_engine", "campaign_billing"),
    ("lenght_min", "min"),
    ("length_min", "min"),
    ("lenght_max", "max"),
    ("length_max", "max"),
    ("min", "tap.min"),
    ("max", "tap.max"),
];

impl ReadOptions {
    /// Decode options arriving as loose JSON (the untyped configuration
    /// path), rejecting deprecated names with a contract violation.
    pub fn from_json(value: &serde_json::Value) -> CallResult<Self> {
        for (old, new) in DEPRECATED_READ_OPTIONS {
            if value.get(old).is_some() {
                return Err(CallError::contract(format!(
                    "read option '{old}' is deprecated, use '{new}'"
                )));
            }
        }
        serde_json::from_value(value.clone())
            .map_err(|e| CallError::contract(format!("invalid read options: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn per_call_fields_win_over_deployment_defaults() {
        let deployment = TapOptions {
            min: Some(2),
            max: Some(8),
            confirm_type: Some("no".into()),
            ..Default::default()
        };
        let per_call = TapOptions {
            max: Some(4),
            ..Default::default()
        };

        let merged = per_call.layered_over(&deployment);
        assert_eq!(merged.max, Some(4));
        assert_eq!(merged.min, Some(2));
        assert_eq!(merged.confirm_type.as_deref(), Some("no"));
        assert_eq!(merged.timeout_secs, None);
    }

    #[test]
    fn deprecated_read_option_is_a_contract_violation() {
        let err = ReadOptions::from_json(&json!({"block_zero": true})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("block_zero"), "{msg}");
        assert!(msg.contains("deprecated"), "{msg}");
    }

    #[test]
    fn top_level_min_and_max_are_deprecated_read_options() {
        // Without the table entry these keys would be silently dropped:
        // ReadOptions has no top-level min/max field and serde ignores
        // unknown keys.
        let err = ReadOptions::from_json(&json!({"min": 4, "max": 8})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("tap.min") || msg.contains("tap.max"), "{msg}");

        let err = ReadOptions::from_json(&json!({"max": 8})).unwrap_err();
        assert!(err.to_string().contains("tap.max"), "{err}");
    }

    #[test]
    fn read_options_decode_from_json() {
        let ops = ReadOptions::from_json(&json!({
            "timeout_secs": 30,
            "val_name": "order_id",
            "tap": {"min": 4, "max": 4},
        }))
        .unwrap();
        assert_eq!(ops.timeout_secs, Some(30));
        assert_eq!(ops.val_name.as_deref(), Some("order_id"));
        assert_eq!(ops.tap.min, Some(4));
    }

    #[test]
    fn validate_rejects_prepend_to_next_action() {
        let config = RouterConfig {
            menu: MenuOptions {
                prepend_to_next_action: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn config_deserializes_with_partial_toml_like_json() {
        let config: RouterConfig = serde_json::from_value(json!({
            "timeout_secs": 45,
            "read": {"tap": {"confirm_type": "number"}},
        }))
        .unwrap();
        assert_eq!(config.timeout_secs, Some(45));
        assert_eq!(config.read.tap.confirm_type.as_deref(), Some("number"));
        assert!(!config.remove_invalid_chars);
    }
}
