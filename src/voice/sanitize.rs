//! Speech text cleanup.
//!
//! LLM responses carry markdown and emoji that a TTS model either reads
//! aloud or chokes on.  [`sanitize_for_speech`] strips them before the text
//! is segmented.

use once_cell::sync::Lazy;
use regex::Regex;

/// Markdown emphasis wrappers, replaced by their inner text.
static MARKDOWN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\*\*(.*?)\*\*", // bold
        r"\*(.*?)\*",     // italic
        r"`(.*?)`",       // code
        r"~~(.*?)~~",     // strikethrough
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Emoji and pictograph ranges removed from speech text.
static EMOJI: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(concat!(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}",
        r"\x{1F900}-\x{1F9FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}\x{1F004}\x{1F0CF}",
        r"\x{1F170}-\x{1F171}\x{1F17E}-\x{1F17F}\x{1F18E}\x{3030}\x{2B50}\x{2B55}",
        r"\x{2934}-\x{2935}\x{2B05}-\x{2B07}\x{2B1B}-\x{2B1C}\x{3297}\x{3299}\x{303D}",
        r"\x{00A9}\x{00AE}\x{2122}\x{23F3}\x{24C2}\x{23E9}-\x{23EF}\x{25B6}\x{23F8}-\x{23FA}]",
    ))
    .ok()
});

/// Strip emoji and markdown formatting from text destined for synthesis.
pub fn sanitize_for_speech(text: &str) -> String {
    let mut out = match EMOJI.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };

    for re in MARKDOWN_PATTERNS.iter() {
        out = re.replace_all(&out, "$1").into_owned();
    }

    // Unpaired asterisks are never spoken.
    out.replace('*', "")
}
