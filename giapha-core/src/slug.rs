//! Identifier generation for records minted at runtime.
//!
//! Ids take the form `{prefix}doi{generation}-{slug}` where the slug is the
//! display name lowercased, transliterated to ASCII and stripped of anything
//! outside `[a-z0-9]`. Taken ids get a numeric suffix starting at 2.

use regex::Regex;
use std::sync::OnceLock;

/// Literal between the branch prefix and the generation number.
pub const GENERATION_TAG: &str = "doi";

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]").expect("static pattern compiles"))
}

/// ASCII base letter of a lowercase Vietnamese vowel or `đ`.
fn transliterate(c: char) -> Option<char> {
    let base = match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ' | 'ẩ'
        | 'ẫ' | 'ậ' => 'a',
        'đ' => 'd',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ' | 'ở'
        | 'ỡ' | 'ợ' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' => 'y',
        _ => return None,
    };
    Some(base)
}

/// `"Đỗ Văn Dũng"` → `"dovandung"`.
pub fn slugify(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(|c| transliterate(c).unwrap_or(c))
        .collect();
    non_alphanumeric().replace_all(&folded, "").into_owned()
}

/// Candidate id before collision handling.
pub fn base_id(prefix: &str, generation: u32, name: &str) -> String {
    format!("{prefix}{GENERATION_TAG}{generation}-{}", slugify(name))
}

/// First id derived from `base` that `taken` rejects: `base`, then `base2`,
/// `base3`, ...
pub fn unique_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{base}{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
