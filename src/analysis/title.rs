use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static TITLE_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Words shorter than this carry too little signal
const MIN_WORD_LENGTH: usize = 5;

/// Contents of the first `<title>` element, or an empty string.
pub fn web_get_title(body: &str) -> String {
    let re = TITLE_RE.get_or_init(|| Regex::new(r"(?i)<title>([^<]{1,512})</title>").ok());
    re.as_ref()
        .and_then(|re| re.captures(body))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Every long word of either title appears in the other one, ignoring case and order.
pub fn titles_match(measurement: &str, control: &str) -> bool {
    const IN_MEASUREMENT: u8 = 1;
    const IN_CONTROL: u8 = 2;
    let mut words: BTreeMap<String, u8> = BTreeMap::new();
    for (title, bit) in [(measurement, IN_MEASUREMENT), (control, IN_CONTROL)] {
        for word in title.split(' ').filter(|w| w.len() >= MIN_WORD_LENGTH) {
            *words.entry(word.to_lowercase()).or_default() |= bit;
        }
    }
    words.values().all(|&score| score == IN_MEASUREMENT | IN_CONTROL)
}
