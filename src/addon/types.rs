/*
 *  addon/types.rs
 *
 *  AddonHost - keep the host standing
 *  (c) 2020-26 Stuart Hunter
 *
 *  Addon status codes and instance type identifiers
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

use std::fmt;
use std::os::raw::c_int;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of every lifecycle call into an addon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonStatus {
    Ok,
    LostConnection,
    NeedRestart,
    NeedSettings,
    Unknown,
    PermanentFailure,
    NotImplemented,
    NeedSavedSettings,
}

impl AddonStatus {
    /// Wire value used in the C ABI
    pub fn to_raw(self) -> c_int {
        match self {
            AddonStatus::Ok => 0,
            AddonStatus::LostConnection => 1,
            AddonStatus::NeedRestart => 2,
            AddonStatus::NeedSettings => 3,
            AddonStatus::Unknown => 4,
            AddonStatus::PermanentFailure => 5,
            AddonStatus::NotImplemented => 6,
            AddonStatus::NeedSavedSettings => 7,
        }
    }

    /// Decode a wire value; anything out of range is `Unknown`
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            0 => AddonStatus::Ok,
            1 => AddonStatus::LostConnection,
            2 => AddonStatus::NeedRestart,
            3 => AddonStatus::NeedSettings,
            5 => AddonStatus::PermanentFailure,
            6 => AddonStatus::NotImplemented,
            7 => AddonStatus::NeedSavedSettings,
            _ => AddonStatus::Unknown,
        }
    }

    pub fn is_ok(self) -> bool {
        self == AddonStatus::Ok
    }
}

impl fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddonStatus::Ok => "ok",
            AddonStatus::LostConnection => "lost connection",
            AddonStatus::NeedRestart => "needs restart",
            AddonStatus::NeedSettings => "needs settings",
            AddonStatus::Unknown => "unknown",
            AddonStatus::PermanentFailure => "permanent failure",
            AddonStatus::NotImplemented => "not implemented",
            AddonStatus::NeedSavedSettings => "needs saved settings",
        };
        write!(f, "{}", name)
    }
}

/// Interface groups an addon can be built against
///
/// `Global*` groups are process-wide interfaces; the rest are instance
/// kinds the addon can host. Wire values are fixed by the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    GlobalMain,
    GlobalGui,
    GlobalAudioEngine,
    GlobalGeneral,
    GlobalNetwork,
    GlobalFilesystem,
    GlobalTools,
    AudioDecoder,
    AudioEncoder,
    Game,
    InputStream,
    Peripheral,
    Pvr,
    Screensaver,
    Visualization,
    Vfs,
    ImageDecoder,
    VideoCodec,
}

/// Groups checked at every `create`, whatever instance type was requested
pub const REQUIRED_ON_ALL_TYPES: &[InstanceType] = &[InstanceType::GlobalMain];

impl InstanceType {
    pub const ALL: [InstanceType; 18] = [
        InstanceType::GlobalMain,
        InstanceType::GlobalGui,
        InstanceType::GlobalAudioEngine,
        InstanceType::GlobalGeneral,
        InstanceType::GlobalNetwork,
        InstanceType::GlobalFilesystem,
        InstanceType::GlobalTools,
        InstanceType::AudioDecoder,
        InstanceType::AudioEncoder,
        InstanceType::Game,
        InstanceType::InputStream,
        InstanceType::Peripheral,
        InstanceType::Pvr,
        InstanceType::Screensaver,
        InstanceType::Visualization,
        InstanceType::Vfs,
        InstanceType::ImageDecoder,
        InstanceType::VideoCodec,
    ];

    pub fn to_raw(self) -> c_int {
        match self {
            InstanceType::GlobalMain => 0,
            InstanceType::GlobalGui => 1,
            InstanceType::GlobalAudioEngine => 2,
            InstanceType::GlobalGeneral => 3,
            InstanceType::GlobalNetwork => 4,
            InstanceType::GlobalFilesystem => 5,
            InstanceType::GlobalTools => 6,
            InstanceType::AudioDecoder => 102,
            InstanceType::AudioEncoder => 103,
            InstanceType::Game => 104,
            InstanceType::InputStream => 105,
            InstanceType::Peripheral => 106,
            InstanceType::Pvr => 107,
            InstanceType::Screensaver => 108,
            InstanceType::Visualization => 109,
            InstanceType::Vfs => 110,
            InstanceType::ImageDecoder => 111,
            InstanceType::VideoCodec => 112,
        }
    }

    pub fn from_raw(raw: c_int) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.to_raw() == raw)
    }

    /// Interface version this host was built against
    pub fn host_version(self) -> &'static str {
        match self {
            InstanceType::GlobalMain => "2.0.0",
            InstanceType::GlobalGui => "5.15.0",
            InstanceType::GlobalAudioEngine => "1.1.1",
            InstanceType::GlobalGeneral => "1.0.5",
            InstanceType::GlobalNetwork => "1.0.4",
            InstanceType::GlobalFilesystem => "1.1.7",
            InstanceType::GlobalTools => "1.0.4",
            InstanceType::AudioDecoder => "3.0.0",
            InstanceType::AudioEncoder => "2.1.0",
            InstanceType::Game => "3.0.0",
            InstanceType::InputStream => "3.2.0",
            InstanceType::Peripheral => "2.0.0",
            InstanceType::Pvr => "8.0.2",
            InstanceType::Screensaver => "2.2.0",
            InstanceType::Visualization => "3.0.0",
            InstanceType::Vfs => "3.0.1",
            InstanceType::ImageDecoder => "3.0.0",
            InstanceType::VideoCodec => "1.0.1",
        }
    }

    pub fn is_global(self) -> bool {
        self.to_raw() < 100
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceType::GlobalMain => "global_main",
            InstanceType::GlobalGui => "global_gui",
            InstanceType::GlobalAudioEngine => "global_audio_engine",
            InstanceType::GlobalGeneral => "global_general",
            InstanceType::GlobalNetwork => "global_network",
            InstanceType::GlobalFilesystem => "global_filesystem",
            InstanceType::GlobalTools => "global_tools",
            InstanceType::AudioDecoder => "audio_decoder",
            InstanceType::AudioEncoder => "audio_encoder",
            InstanceType::Game => "game",
            InstanceType::InputStream => "input_stream",
            InstanceType::Peripheral => "peripheral",
            InstanceType::Pvr => "pvr",
            InstanceType::Screensaver => "screensaver",
            InstanceType::Visualization => "visualization",
            InstanceType::Vfs => "vfs",
            InstanceType::ImageDecoder => "image_decoder",
            InstanceType::VideoCodec => "video_codec",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown instance type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_raw_values() {
        for status in [
            AddonStatus::Ok,
            AddonStatus::NeedRestart,
            AddonStatus::NeedSavedSettings,
            AddonStatus::NotImplemented,
        ] {
            assert_eq!(AddonStatus::from_raw(status.to_raw()), status);
        }
        assert_eq!(AddonStatus::from_raw(42), AddonStatus::Unknown);
        assert_eq!(AddonStatus::from_raw(-1), AddonStatus::Unknown);
    }

    #[test]
    fn test_instance_type_wire_values_are_unique() {
        let mut raws: Vec<c_int> = InstanceType::ALL.iter().map(|t| t.to_raw()).collect();
        raws.sort();
        raws.dedup();
        assert_eq!(raws.len(), InstanceType::ALL.len());
        assert_eq!(InstanceType::from_raw(102), Some(InstanceType::AudioDecoder));
        assert_eq!(InstanceType::from_raw(99), None);
    }

    #[test]
    fn test_instance_type_parse() {
        assert_eq!("audio-decoder".parse::<InstanceType>(), Ok(InstanceType::AudioDecoder));
        assert_eq!("PVR".parse::<InstanceType>(), Ok(InstanceType::Pvr));
        assert!("toaster".parse::<InstanceType>().is_err());
    }

    #[test]
    fn test_global_main_is_required() {
        assert!(REQUIRED_ON_ALL_TYPES.contains(&InstanceType::GlobalMain));
        assert!(InstanceType::GlobalMain.is_global());
        assert!(!InstanceType::Visualization.is_global());
    }
}
