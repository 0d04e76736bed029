//! Kokoro voice catalog.
//!
//! Every voice has one style table asset at `{base_url}/{id}.bin`.  The
//! first letter of the id selects the phonemizer language (`a` American,
//! `b` British English).

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Default location of the Kokoro voice style tables.
pub const DEFAULT_VOICE_BASE_URL: &str =
    "https://huggingface.co/onnx-community/Kokoro-82M-v1.0-ONNX/resolve/main/voices";

/// Voice used when none is configured.
pub const DEFAULT_VOICE: &str = "af_heart";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
}

/// Catalog metadata for one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    /// BCP-47 style language tag (`en-us`, `en-gb`).
    pub language: String,
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<String>,
    pub target_quality: String,
    pub overall_grade: String,
}

type VoiceRow = (
    &'static str,
    &'static str,
    &'static str,
    Gender,
    Option<&'static str>,
    &'static str,
    &'static str,
);

const KOKORO_VOICES: &[VoiceRow] = &[
    ("af_heart", "Heart", "en-us", Gender::Female, Some("❤️"), "A", "A"),
    ("af_alloy", "Alloy", "en-us", Gender::Female, None, "B", "C"),
    ("af_aoede", "Aoede", "en-us", Gender::Female, None, "B", "C+"),
    ("af_bella", "Bella", "en-us", Gender::Female, Some("🔥"), "A", "A-"),
    ("af_jessica", "Jessica", "en-us", Gender::Female, None, "C", "D"),
    ("af_kore", "Kore", "en-us", Gender::Female, None, "B", "C+"),
    ("af_nicole", "Nicole", "en-us", Gender::Female, Some("🎧"), "B", "B-"),
    ("af_nova", "Nova", "en-us", Gender::Female, None, "B", "C"),
    ("af_river", "River", "en-us", Gender::Female, None, "C", "D"),
    ("af_sarah", "Sarah", "en-us", Gender::Female, None, "B", "C+"),
    ("af_sky", "Sky", "en-us", Gender::Female, None, "B", "C-"),
    ("am_adam", "Adam", "en-us", Gender::Male, None, "D", "F+"),
    ("am_echo", "Echo", "en-us", Gender::Male, None, "C", "D"),
    ("am_eric", "Eric", "en-us", Gender::Male, None, "C", "D"),
    ("am_fenrir", "Fenrir", "en-us", Gender::Male, None, "B", "C+"),
    ("am_liam", "Liam", "en-us", Gender::Male, None, "C", "D"),
    ("am_michael", "Michael", "en-us", Gender::Male, None, "B", "C+"),
    ("am_onyx", "Onyx", "en-us", Gender::Male, None, "C", "D"),
    ("am_puck", "Puck", "en-us", Gender::Male, None, "B", "C+"),
    ("am_santa", "Santa", "en-us", Gender::Male, None, "C", "D-"),
    ("bf_emma", "Emma", "en-gb", Gender::Female, Some("🚺"), "B", "B-"),
    ("bf_isabella", "Isabella", "en-gb", Gender::Female, None, "B", "C"),
    ("bm_george", "George", "en-gb", Gender::Male, None, "B", "C"),
    ("bm_lewis", "Lewis", "en-gb", Gender::Male, None, "C", "D+"),
    ("bf_alice", "Alice", "en-gb", Gender::Female, Some("🚺"), "C", "D"),
    ("bf_lily", "Lily", "en-gb", Gender::Female, Some("🚺"), "C", "D"),
    ("bm_daniel", "Daniel", "en-gb", Gender::Male, Some("🚹"), "C", "D"),
    ("bm_fable", "Fable", "en-gb", Gender::Male, Some("🚹"), "B", "C"),
];

static KOKORO_CATALOG: Lazy<VoiceCatalog> = Lazy::new(|| VoiceCatalog {
    voices: KOKORO_VOICES
        .iter()
        .map(|&(id, name, language, gender, traits, target, grade)| VoiceInfo {
            id: id.to_string(),
            name: name.to_string(),
            language: language.to_string(),
            gender,
            traits: traits.map(str::to_string),
            target_quality: target.to_string(),
            overall_grade: grade.to_string(),
        })
        .collect(),
});

/// The set of voices a pipeline accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceCatalog {
    voices: Vec<VoiceInfo>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<VoiceInfo>) -> Self {
        Self { voices }
    }

    /// The built-in Kokoro v1.0 catalog.
    pub fn kokoro() -> Self {
        KOKORO_CATALOG.clone()
    }

    pub fn get(&self, id: &str) -> Option<&VoiceInfo> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoiceInfo> {
        self.voices.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.voices.iter().map(|v| v.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Canonical asset URL of a voice's style table.
pub fn voice_url(base_url: &str, voice_id: &str) -> String {
    format!("{}/{}.bin", base_url.trim_end_matches('/'), voice_id)
}

/// Phonemizer language code of a voice (`'a'` American, `'b'` British).
pub fn language_code(voice_id: &str) -> char {
    voice_id.chars().next().unwrap_or('a')
}
