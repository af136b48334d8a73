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

//! One inbound/outbound exchange for a call.
//!
//! A [`Turn`] is decoded from the flat key/value pairs the PBX sends (query
//! string on GET, urlencoded body on POST). The PBX may repeat a key; the
//! last occurrence wins. Well-known fields come in a current (`PBX*`) and a
//! legacy (`Api*`) spelling.

use std::collections::HashMap;

use crate::protocol::Module;

/// Sentinel identifier for a turn that carries no call id at all.
pub const UNKNOWN_CALL_ID: &str = "UNKNOWN";

/// A decoded inbound turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub call_id: String,
    pub phone: String,
    pub did: String,
    pub extension: String,
    pub hangup: bool,
    /// Full field mapping, including the answer fields of the previous
    /// module. Replaces the session's mapping wholesale.
    pub values: HashMap<String, String>,
}

impl Turn {
    /// Build a turn from raw decoded pairs; for duplicated keys the last
    /// occurrence wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values: HashMap<String, String> = HashMap::new();
        for (k, v) in pairs {
            values.insert(k.into(), v.into());
        }

        let pick = |keys: &[&str]| -> String {
            keys.iter()
                .filter_map(|k| values.get(*k))
                .find(|v| !v.is_empty())
                .cloned()
                .unwrap_or_default()
        };

        let call_id = {
            let id = pick(&["PBXcallId", "ApiCallId"]);
            if id.is_empty() {
                UNKNOWN_CALL_ID.to_string()
            } else {
                id
            }
        };
        let hangup = values.get("PBXcallStatus").map(String::as_str) == Some("HANGUP")
            || values.get("hangup").map(String::as_str) == Some("yes");
        let phone = pick(&["PBXphone", "ApiPhone"]);
        let did = pick(&["PBXdid", "ApiDID"]);
        let extension = pick(&["PBXextensionId", "folder", "PBXextensionPath"]);

        Turn {
            call_id,
            phone,
            did,
            extension,
            hangup,
            values,
        }
    }
}

/// The outbound completion of one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnReply {
    /// The next action module for the PBX to run.
    Module(Module),
    /// Plain acknowledgement; `message: None` serializes as `{}`.
    Ack { message: Option<String> },
    /// Fatal condition surfaced on the transport's error channel.
    Error(String),
}

impl TurnReply {
    pub fn hangup_ack() -> Self {
        TurnReply::Ack {
            message: Some("hangup".to_string()),
        }
    }

    pub fn empty() -> Self {
        TurnReply::Ack { message: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_occurrence_wins_for_duplicated_keys() {
        let turn = Turn::from_pairs(vec![
            ("PBXcallId", "X1"),
            ("val_1", "first"),
            ("val_1", "second"),
        ]);
        assert_eq!(turn.values.get("val_1").unwrap(), "second");
    }

    #[test]
    fn call_id_falls_back_to_legacy_alias() {
        let turn = Turn::from_pairs(vec![("ApiCallId", "legacy-9")]);
        assert_eq!(turn.call_id, "legacy-9");

        let turn = Turn::from_pairs(vec![("PBXcallId", "new-1"), ("ApiCallId", "legacy-9")]);
        assert_eq!(turn.call_id, "new-1");
    }

    #[test]
    fn missing_call_id_yields_sentinel() {
        let turn = Turn::from_pairs(vec![("PBXphone", "0527000000")]);
        assert_eq!(turn.call_id, UNKNOWN_CALL_ID);

        // An empty id counts as absent, same as the legacy router.
        let turn = Turn::from_pairs(vec![("PBXcallId", "")]);
        assert_eq!(turn.call_id, UNKNOWN_CALL_ID);
    }

    #[test]
    fn hangup_detected_from_both_forms() {
        assert!(Turn::from_pairs(vec![("PBXcallStatus", "HANGUP")]).hangup);
        assert!(Turn::from_pairs(vec![("hangup", "yes")]).hangup);
        assert!(!Turn::from_pairs(vec![("PBXcallStatus", "ANSWER")]).hangup);
        assert!(!Turn::from_pairs(vec![("hangup", "no")]).hangup);
    }

    #[test]
    fn extension_aliases() {
        let turn = Turn::from_pairs(vec![("folder", "7")]);
        assert_eq!(turn.extension, "7");
        let turn = Turn::from_pairs(vec![("PBXextensionId", "3"), ("folder", "7")]);
        assert_eq!(turn.extension, "3");
    }
}
