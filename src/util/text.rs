use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Remove control characters and ANSI escape sequences from feed-supplied text.
///
/// Strips C0 controls other than tab, newline and carriage return, DEL,
/// CSI sequences (`ESC [ ... final`), OSC sequences (`ESC ] ... BEL` or
/// `ESC ] ... ESC \`) and bare ESC bytes.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameters and intermediates run until a final byte in @..~
                    for c in chars.by_ref() {
                        if ('\x40'..='\x7e').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\x07' {
                            break;
                        }
                        if c == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if is_stripped(c) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Turns free text into search keywords for a two-letter language code.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, language: &str, text: &str) -> Vec<String>;
}

/// Default tokenizer: strips markup, punctuation and digits, case-folds,
/// splits on non-word characters and drops stopwords.
///
/// Languages without a registered stopword list keep every token.
#[derive(Debug, Clone)]
pub struct StopwordTokenizer {
    stopwords: HashMap<String, HashSet<String>>,
}

impl Default for StopwordTokenizer {
    fn default() -> Self {
        let english = ENGLISH_STOPWORDS
            .iter()
            .chain(PODCAST_STOPWORDS)
            .map(|w| (*w).to_owned())
            .collect();
        Self {
            stopwords: HashMap::from([("en".to_owned(), english)]),
        }
    }
}

impl StopwordTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add stopwords for a language, extending any existing list.
    pub fn with_stopwords<'a>(
        mut self,
        language: &str,
        words: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.stopwords
            .entry(language.to_lowercase())
            .or_default()
            .extend(words.into_iter().map(str::to_lowercase));
        self
    }
}

impl Tokenizer for StopwordTokenizer {
    fn tokenize(&self, language: &str, text: &str) -> Vec<String> {
        let cleaned = clean_text(text).to_lowercase();
        let stopwords = self.stopwords.get(language);

        cleaned
            .split(|c: char| !is_word_char(c))
            .filter(|token| !token.is_empty())
            .filter(|token| stopwords.map_or(true, |words| !words.contains(*token)))
            .map(str::to_owned)
            .collect()
    }
}

/// Remove HTML tags, decode entities, then drop punctuation and digits.
pub fn clean_text(text: &str) -> String {
    let stripped = strip_tags(text.trim());
    let decoded = match quick_xml::escape::unescape(&stripped) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => stripped,
    };

    decoded
        .chars()
        .filter(|c| c.is_whitespace() || (is_word_char(*c) && !c.is_numeric()))
        .collect()
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

/// Weekdays, months, number words, filler common to show notes, and
/// platform names.
const PODCAST_STOPWORDS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "mon", "tue",
    "wed", "thu", "fri", "sat", "sun", "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december", "jan", "feb", "mar", "apr",
    "jun", "jul", "aug", "sep", "oct", "nov", "dec", "one", "two", "three", "four", "five", "six",
    "seven", "eight", "nine", "ten", "across", "advice", "along", "also", "always", "answer",
    "around", "audio", "available", "back", "become", "behind", "best", "better", "beyond", "big",
    "biggest", "bring", "brings", "change", "channel", "city", "come", "content", "conversation",
    "course", "daily", "date", "day", "days", "different", "discussion", "dont", "dr", "end",
    "enjoy", "episode", "episodes", "even", "ever", "every", "everyone", "everything", "favorite",
    "feature", "featuring", "feed", "field", "find", "first", "focus", "follow", "full", "fun",
    "get", "give", "go", "going", "good", "gmt", "great", "guest", "happen", "happening", "hear",
    "host", "hosted", "hour", "idea", "impact", "important", "including", "information", "inside",
    "insight", "interesting", "interview", "issue", "join", "journalist", "keep", "know",
    "knowledge", "known", "latest", "leading", "learn", "let", "life", "like", "listen",
    "listener", "little", "live", "look", "looking", "made", "make", "making", "many", "matter",
    "medium", "member", "minute", "moment", "month", "mr", "mrs", "ms", "much", "name", "need",
    "never", "new", "news", "next", "night", "offer", "open", "original", "others", "part",
    "past", "people", "personal", "perspective", "place", "podcast", "podcasts", "premium",
    "present", "problem", "produced", "producer", "product", "production", "question", "radio",
    "read", "real", "really", "review", "right", "scene", "season", "see", "series", "set",
    "share", "short", "show", "shows", "side", "sign", "sir", "small", "something", "sometimes",
    "sound", "special", "sponsor", "start", "stories", "story", "subscribe", "support", "take",
    "tale", "talk", "talking", "team", "tell", "thing", "think", "thought", "time", "tip",
    "today", "together", "top", "topic", "training", "true", "truth", "understand", "unique",
    "use", "ustream", "video", "visit", "voice", "want", "way", "week", "weekly", "welcome",
    "well", "word", "work", "world", "would", "year", "years", "youll", "youre", "apple",
    "patreon", "spotify", "stitcher", "itunes",
];
