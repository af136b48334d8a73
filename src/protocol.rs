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

//! Protocol encoder: pure builders that turn abstract action parameters and
//! a normalized list of playable items into the exact outbound JSON module.
//!
//! Wire quirks inherited from the PBX API: absent numeric fields serialize
//! as the empty string, and switch-like fields as `"yes"`/`"no"`.

use serde::{Deserialize, Serialize};

use crate::config::{DialOptions, IpDialOptions, MenuOptions, RecordOptions, SttOptions, TapOptions};
use crate::error::{CallError, CallResult};

/// Characters the PBX text-to-speech engine cannot speak.
const TTS_INVALID_CHARS: &[char] = &['.', '-', '"', '\'', '&', '|'];

/// One playable item as the handler describes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Playable {
    /// Reference to an uploaded audio file.
    File(String),
    /// Literal text for the TTS engine.
    Text(String),
    /// A number spoken as a quantity.
    Number(i64),
    /// A digit string spoken digit by digit.
    Digits(String),
    /// Internal system message identifier.
    SystemMessage(String),
}

/// One entry of a module's `files` array, in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayItem {
    #[serde(rename = "fileId")]
    FileId(String),
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "number")]
    Number(i64),
    #[serde(rename = "digits")]
    Digits(String),
    #[serde(rename = "system_message")]
    SystemMessage(String),
}

/// Normalize playable items into the `files` array.
///
/// With `reject_invalid_chars`, text items containing characters the TTS
/// cannot speak fail with a contract violation.
pub fn encode_playables(items: &[Playable], reject_invalid_chars: bool) -> CallResult<Vec<PlayItem>> {
    let mut files = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Playable::File(file_id) => {
                if file_id.is_empty() {
                    return Err(CallError::contract("file playable requires a file id"));
                }
                files.push(PlayItem::FileId(file_id.clone()));
            }
            Playable::Text(text) => {
                if reject_invalid_chars {
                    let bad: Vec<char> = text
                        .chars()
                        .filter(|c| TTS_INVALID_CHARS.contains(c))
                        .collect();
                    if !bad.is_empty() {
                        return Err(CallError::contract(format!(
                            "text '{}' has characters the TTS cannot speak: {}",
                            text,
                            bad.iter().collect::<String>()
                        )));
                    }
                }
                files.push(PlayItem::Text(text.clone()));
            }
            Playable::Number(n) => files.push(PlayItem::Number(*n)),
            Playable::Digits(d) => {
                if d.is_empty() || !d.chars().all(|c| c.is_ascii_digit()) {
                    return Err(CallError::contract(format!(
                        "digits playable must contain only digits, got '{d}'"
                    )));
                }
                files.push(PlayItem::Digits(d.clone()));
            }
            Playable::SystemMessage(id) => files.push(PlayItem::SystemMessage(id.clone())),
        }
    }
    Ok(files)
}

/// One outbound action module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Module {
    #[serde(rename = "getDTMF")]
    GetDtmf {
        name: String,
        #[serde(with = "num_or_empty")]
        max: Option<u32>,
        min: u32,
        timeout: u32,
        #[serde(rename = "skipKey")]
        skip_key: String,
        #[serde(rename = "skipValue")]
        skip_value: String,
        #[serde(rename = "confirmType")]
        confirm_type: String,
        #[serde(rename = "setMusic", with = "yes_no")]
        set_music: bool,
        files: Vec<PlayItem>,
    },
    #[serde(rename = "stt")]
    Stt {
        name: String,
        #[serde(with = "num_or_empty")]
        max: Option<u32>,
        #[serde(with = "num_or_empty")]
        min: Option<u32>,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "saveFolder")]
        save_folder: String,
        #[serde(rename = "campaignBilling")]
        campaign_billing: String,
        files: Vec<PlayItem>,
    },
    #[serde(rename = "record")]
    Record {
        name: String,
        #[serde(with = "num_or_empty")]
        max: Option<u32>,
        #[serde(with = "num_or_empty")]
        min: Option<u32>,
        confirm: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "saveFolder")]
        save_folder: String,
        files: Vec<PlayItem>,
    },
    #[serde(rename = "simpleMenu")]
    SimpleMenu {
        name: String,
        times: u32,
        timeout: u32,
        #[serde(rename = "enabledKeys")]
        enabled_keys: String,
        #[serde(rename = "setMusic", with = "yes_no")]
        set_music: bool,
        #[serde(rename = "errorReturn")]
        error_return: String,
        #[serde(rename = "extensionChange")]
        extension_change: String,
        files: Vec<PlayItem>,
    },
    #[serde(rename = "simpleRouting")]
    SimpleRouting {
        name: String,
        #[serde(rename = "dialPhone")]
        dial_phone: String,
        #[serde(rename = "displayNumber")]
        display_number: String,
        #[serde(rename = "addDigits")]
        add_digits: String,
        #[serde(rename = "routingMusic", with = "yes_no")]
        routing_music: bool,
        #[serde(rename = "ringSec", with = "num_or_empty")]
        ring_sec: Option<u32>,
        #[serde(with = "num_or_empty")]
        limit: Option<u32>,
        #[serde(rename = "campaignBilling")]
        campaign_billing: String,
    },
    #[serde(rename = "ipRouting")]
    IpRouting {
        name: String,
        #[serde(rename = "dialPhone")]
        dial_phone: String,
        #[serde(rename = "dialIP")]
        dial_ip: String,
        #[serde(rename = "displayNumber")]
        display_number: String,
        #[serde(rename = "routingMusic", with = "yes_no")]
        routing_music: bool,
        #[serde(rename = "ringSec", with = "num_or_empty")]
        ring_sec: Option<u32>,
        #[serde(with = "num_or_empty")]
        limit: Option<u32>,
    },
    #[serde(rename = "extensionChange")]
    ExtensionChange {
        #[serde(rename = "extensionIdChange")]
        extension_id_change: String,
        #[serde(rename = "extensionPathChange")]
        extension_path_change: String,
    },
}

impl Module {
    /// The field name that will carry the caller's answer on the next turn,
    /// for modules that collect one.
    pub fn answer_field(&self) -> Option<&str> {
        match self {
            Module::GetDtmf { name, .. }
            | Module::Stt { name, .. }
            | Module::Record { name, .. }
            | Module::SimpleMenu { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub fn build_get_dtmf(name: String, files: Vec<PlayItem>, ops: &TapOptions) -> Module {
    Module::GetDtmf {
        name,
        max: ops.max,
        min: ops.min.unwrap_or(1),
        timeout: ops.timeout_secs.unwrap_or(7),
        skip_key: ops.skip_key.clone().unwrap_or_default(),
        skip_value: ops.skip_value.clone().unwrap_or_default(),
        confirm_type: ops.confirm_type.clone().unwrap_or_else(|| "digits".into()),
        set_music: ops.set_music.unwrap_or(false),
        files,
    }
}

pub fn build_stt(name: String, files: Vec<PlayItem>, ops: &SttOptions) -> Module {
    Module::Stt {
        name,
        // The PBX caps an utterance at 10 seconds.
        max: ops.max.or(Some(10)),
        min: ops.min,
        file_name: ops.file_name.clone().unwrap_or_default(),
        save_folder: ops.save_folder.clone().unwrap_or_default(),
        campaign_billing: ops.campaign_billing.clone().unwrap_or_default(),
        files,
    }
}

pub fn build_record(name: String, files: Vec<PlayItem>, ops: &RecordOptions) -> Module {
    Module::Record {
        name,
        max: ops.max.or(Some(10)),
        min: ops.min.or(Some(2)),
        confirm: ops.confirm.clone().unwrap_or_else(|| "confirmOnly".into()),
        file_name: ops.file_name.clone().unwrap_or_default(),
        save_folder: ops.save_folder.clone().unwrap_or_default(),
        files,
    }
}

pub fn build_simple_menu(files: Vec<PlayItem>, ops: &MenuOptions) -> Module {
    Module::SimpleMenu {
        name: ops.name.clone().unwrap_or_else(|| "menu".into()),
        times: ops.times.unwrap_or(1),
        timeout: ops.timeout_secs.unwrap_or(5),
        enabled_keys: ops
            .enabled_keys
            .clone()
            .unwrap_or_else(|| "1,2,3,4,5,6,7,8,9,0,#,*".into()),
        set_music: ops.set_music.unwrap_or(false),
        error_return: ops.error_return.clone().unwrap_or_else(|| "ERROR".into()),
        extension_change: ops.extension_change.clone().unwrap_or_default(),
        files,
    }
}

pub fn build_simple_routing(ops: &DialOptions) -> CallResult<Module> {
    let dial_phone = ops
        .dial_phone
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CallError::contract("dial requires dial_phone"))?;
    Ok(Module::SimpleRouting {
        name: ops.name.clone().unwrap_or_else(|| "dial".into()),
        dial_phone,
        display_number: ops.display_number.clone().unwrap_or_default(),
        add_digits: ops.add_digits.clone().unwrap_or_default(),
        routing_music: ops.routing_music.unwrap_or(false),
        ring_sec: ops.ring_sec,
        limit: ops.limit,
        campaign_billing: ops.campaign_billing.clone().unwrap_or_default(),
    })
}

pub fn build_ip_routing(ops: &IpDialOptions) -> CallResult<Module> {
    let dial_phone = ops
        .dial_phone
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CallError::contract("ip dial requires dial_phone"))?;
    let dial_ip = ops
        .dial_ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| CallError::contract("ip dial requires dial_ip"))?;
    Ok(Module::IpRouting {
        name: ops.name.clone().unwrap_or_else(|| "dial".into()),
        dial_phone,
        dial_ip,
        display_number: ops.display_number.clone().unwrap_or_default(),
        routing_music: ops.routing_music.unwrap_or(false),
        ring_sec: ops.ring_sec,
        limit: ops.limit,
    })
}

/// Change-position module. Targets that look like a path (`/...`, `.`, `..`)
/// become a path change, anything else an id change.
pub fn build_extension_change(target: &str) -> Module {
    if target.starts_with('/') || target == "." || target == ".." {
        Module::ExtensionChange {
            extension_id_change: String::new(),
            extension_path_change: target.to_string(),
        }
    } else {
        Module::ExtensionChange {
            extension_id_change: target.to_string(),
            extension_path_change: String::new(),
        }
    }
}

/// Numeric wire fields where "unset" is the empty string.
mod num_or_empty {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<u32>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_u32(*n),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u32),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Num(n) => Ok(Some(n)),
            Raw::Text(t) if t.is_empty() => Ok(None),
            Raw::Text(t) => t.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// Switch-like wire fields carried as `"yes"` / `"no"`.
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *v { "yes" } else { "no" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(String::deserialize(d)? == "yes")
    }
}
