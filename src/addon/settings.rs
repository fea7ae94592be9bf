/*
 *  addon/settings.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Typed settings transfer into an addon
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Settings transfer
//!
//! Every setting of an addon is declared in its schema with a type name.
//! The type decides which typed setter the value is pushed through:
//!
//! | type | setter |
//! |------|--------|
//! | `sep`, `lsep` | none |
//! | `text`, `ipaddress`, `video`, `audio`, `image`, `folder`, `executable`, `file`, `path`, `action`, `date`, `time`, `select`, `addon`, `labelenum`, `fileenum` | string |
//! | `enum`, `integer`, `rangeofnum` | int |
//! | `bool` | bool |
//! | `slider`, `number` | float, or floored int when `option: int` |
//!
//! Unrecognized types are logged and sent as strings.

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use super::services::{MessageKind, UserMessage};
use super::types::AddonStatus;

const STRING_TYPES: &[&str] = &[
    "text",
    "ipaddress",
    "video",
    "audio",
    "image",
    "folder",
    "executable",
    "file",
    "path",
    "action",
    "date",
    "time",
    "select",
    "addon",
    "labelenum",
    "fileenum",
];

const INT_TYPES: &[&str] = &["enum", "integer", "rangeofnum"];

const SEPARATOR_TYPES: &[&str] = &["sep", "lsep"];

const NUMERIC_TYPES: &[&str] = &["slider", "number"];

/// A group of settings as declared by the addon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsCategory {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub option: String,
    /// Used when no value has been stored yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl SettingDefinition {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn with_option(mut self, option: &str) -> Self {
        self.option = option.to_string();
        self
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// A value on its way into the addon
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Int(i32),
    Bool(bool),
    Float(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Skip,
    String,
    Int,
    Bool,
    Float,
    FlooredInt,
    Unrecognized,
}

pub fn classify(kind: &str, option: &str) -> TransferKind {
    if SEPARATOR_TYPES.contains(&kind) {
        TransferKind::Skip
    } else if STRING_TYPES.contains(&kind) {
        TransferKind::String
    } else if INT_TYPES.contains(&kind) {
        TransferKind::Int
    } else if kind == "bool" {
        TransferKind::Bool
    } else if NUMERIC_TYPES.contains(&kind) {
        if option.eq_ignore_ascii_case("int") {
            TransferKind::FlooredInt
        } else {
            TransferKind::Float
        }
    } else {
        TransferKind::Unrecognized
    }
}

/// Leading integer of a string, 0 when there is none
pub fn parse_int(raw: &str) -> i32 {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    if negative {
        value = -value;
    }
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Longest leading decimal number of a string, 0.0 when there is none
pub fn parse_float(raw: &str) -> f64 {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa = end > int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if mantissa || frac_end > frac_start {
            mantissa = true;
            end = frac_end;
        }
    }
    if !mantissa {
        return 0.0;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().unwrap_or(0.0)
}

/// What happened while pushing settings into an addon
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Setter calls made
    pub calls: usize,

    /// Some setting answered `NeedRestart`
    pub restart_required: bool,

    /// Settings of an unknown type, each logged once and sent as a string
    pub unrecognized: usize,

    /// Last setting answering anything other than `Ok` or `NeedRestart`
    pub last_failure: Option<(String, AddonStatus)>,

    /// The walk stopped early because the addon became unreachable
    pub aborted: bool,
}

/// Walk the schema and push every value through `set`
///
/// `value_of` yields the stored value for an id. `set` returns the addon's
/// answer or `None` when the addon can no longer be called, which ends the
/// walk.
pub fn transfer<V, F>(
    addon_id: &str,
    schema: &[SettingsCategory],
    value_of: V,
    mut set: F,
) -> TransferOutcome
where
    V: Fn(&str) -> Option<String>,
    F: FnMut(&str, SettingValue) -> Option<AddonStatus>,
{
    let mut outcome = TransferOutcome::default();

    for category in schema {
        for def in &category.settings {
            if def.id.is_empty() || def.kind.is_empty() {
                debug!("{}: skipping setting without id or type in {}", addon_id, category.label);
                continue;
            }

            let raw = value_of(&def.id)
                .or_else(|| def.default.clone())
                .unwrap_or_default();

            let value = match classify(&def.kind, &def.option) {
                TransferKind::Skip => continue,
                TransferKind::String => SettingValue::String(raw),
                TransferKind::Int => SettingValue::Int(parse_int(&raw)),
                TransferKind::Bool => SettingValue::Bool(raw == "true"),
                TransferKind::Float => SettingValue::Float(parse_float(&raw) as f32),
                TransferKind::FlooredInt => SettingValue::Int(parse_float(&raw).floor() as i32),
                TransferKind::Unrecognized => {
                    error!("{}: unknown setting type \"{}\" for {}", addon_id, def.kind, def.id);
                    outcome.unrecognized += 1;
                    SettingValue::String(raw)
                }
            };

            outcome.calls += 1;
            let Some(status) = set(&def.id, value) else {
                warn!("{}: settings transfer stopped at {}", addon_id, def.id);
                outcome.aborted = true;
                return outcome;
            };

            match status {
                AddonStatus::Ok => {}
                AddonStatus::NeedRestart => outcome.restart_required = true,
                other => outcome.last_failure = Some((def.id.clone(), other)),
            }
        }
    }

    outcome
}

/// One aggregated user message for a finished transfer, if anything needs saying
pub fn report(addon_name: &str, outcome: &TransferOutcome) -> Option<UserMessage> {
    let mut lines = Vec::new();
    if outcome.restart_required {
        lines.push("Settings changed; restart required to apply them".to_string());
    }
    if let Some((id, status)) = outcome.last_failure.as_ref() {
        lines.push(format!("Setting {} was rejected ({})", id, status));
    }
    if lines.is_empty() {
        return None;
    }

    Some(UserMessage {
        kind: MessageKind::SettingsOutcome,
        heading: addon_name.to_string(),
        body: lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn schema() -> Vec<SettingsCategory> {
        vec![
            SettingsCategory {
                label: "General".into(),
                settings: vec![
                    SettingDefinition::new("host", "text"),
                    SettingDefinition::new("", "sep"),
                    SettingDefinition::new("divider", "lsep"),
                    SettingDefinition::new("mode", "labelenum"),
                    SettingDefinition::new("port", "integer"),
                    SettingDefinition::new("enabled", "bool"),
                ],
            },
            SettingsCategory {
                label: "Audio".into(),
                settings: vec![
                    SettingDefinition::new("gain", "slider"),
                    SettingDefinition::new("buffer", "number").with_option("INT"),
                    SettingDefinition::new("colour", "colorbutton"),
                    SettingDefinition::new("untyped", ""),
                    SettingDefinition::new("fallback", "integer").with_default("12"),
                ],
            },
        ]
    }

    fn stored() -> HashMap<String, String> {
        [
            ("host", "10.0.0.1"),
            ("mode", "2"),
            ("port", "8080abc"),
            ("enabled", "TRUE"),
            ("gain", "0.75dB"),
            ("buffer", "3.9"),
            ("colour", "ff00ff"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_one_call_per_entry_with_typed_values() {
        let values = stored();
        let mut calls = Vec::new();
        let outcome = transfer(
            "test.addon",
            &schema(),
            |id| values.get(id).cloned(),
            |id, value| {
                calls.push((id.to_string(), value));
                Some(AddonStatus::Ok)
            },
        );

        assert_eq!(
            calls,
            vec![
                ("host".to_string(), SettingValue::String("10.0.0.1".into())),
                ("mode".to_string(), SettingValue::String("2".into())),
                ("port".to_string(), SettingValue::Int(8080)),
                ("enabled".to_string(), SettingValue::Bool(false)),
                ("gain".to_string(), SettingValue::Float(0.75)),
                ("buffer".to_string(), SettingValue::Int(3)),
                ("colour".to_string(), SettingValue::String("ff00ff".into())),
                ("fallback".to_string(), SettingValue::Int(12)),
            ]
        );
        assert_eq!(outcome.calls, 8);
        assert_eq!(outcome.unrecognized, 1);
        assert!(!outcome.restart_required);
        assert_eq!(outcome.last_failure, None);
        assert!(report("Test", &outcome).is_none());
    }

    #[test]
    fn test_aggregate_restart_and_failure() {
        let outcome = transfer(
            "test.addon",
            &schema(),
            |_| None,
            |id, _| match id {
                "port" => Some(AddonStatus::NeedRestart),
                "gain" => Some(AddonStatus::LostConnection),
                "buffer" => Some(AddonStatus::Unknown),
                _ => Some(AddonStatus::Ok),
            },
        );
        assert!(outcome.restart_required);
        assert_eq!(outcome.last_failure, Some(("buffer".to_string(), AddonStatus::Unknown)));

        let message = report("Tone Generator", &outcome).unwrap();
        assert_eq!(message.kind, MessageKind::SettingsOutcome);
        assert_eq!(message.heading, "Tone Generator");
        assert!(message.body.contains("restart"));
        assert!(message.body.contains("buffer"));
    }

    #[test]
    fn test_walk_stops_when_addon_unreachable() {
        let mut seen = 0;
        let outcome = transfer("test.addon", &schema(), |_| None, |_, _| {
            seen += 1;
            if seen == 2 { None } else { Some(AddonStatus::Ok) }
        });
        assert!(outcome.aborted);
        assert_eq!(outcome.calls, 2);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("labelenum", ""), TransferKind::String);
        assert_eq!(classify("enum", ""), TransferKind::Int);
        assert_eq!(classify("slider", "percent"), TransferKind::Float);
        assert_eq!(classify("slider", "Int"), TransferKind::FlooredInt);
        assert_eq!(classify("lsep", ""), TransferKind::Skip);
        assert_eq!(classify("colorbutton", ""), TransferKind::Unrecognized);
    }

    #[test]
    fn test_lenient_number_parsing() {
        assert_eq!(parse_int("  42"), 42);
        assert_eq!(parse_int("-7 apples"), -7);
        assert_eq!(parse_int("apples"), 0);
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int("99999999999"), i32::MAX);

        assert_eq!(parse_float("1.5e3x"), 1500.0);
        assert_eq!(parse_float("-.25"), -0.25);
        assert_eq!(parse_float("7."), 7.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert_eq!(parse_float("."), 0.0);
        assert_eq!(parse_float("abc"), 0.0);
        assert_eq!(parse_float("-3.7").floor() as i32, -4);
    }
}
