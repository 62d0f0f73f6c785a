/// Unicode-aware tokenizer for lexical scoring.
///
/// Lowercases, splits on any non-alphanumeric character (punctuation, whitespace,
/// symbols) and keeps tokens of at least two characters. `char::is_alphanumeric`
/// covers Hangul, CJK ideographs and Latin alike, so Korean and English mail
/// tokenize the same way. No stop-word list: the corpus mixes languages.

/// Minimum token length in characters (not bytes).
const MIN_TOKEN_CHARS: usize = 2;

/// Tokenized text: owns the lowercased buffer, provides &str slices via byte spans.
pub struct Tokens {
    buffer: String,
    spans: Vec<(usize, usize)>,
}

impl Tokens {
    /// Returns an iterator over the token `&str` slices.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.spans.iter().map(|&(s, e)| &self.buffer[s..e])
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

fn keep(token: &str) -> bool {
    token.chars().take(MIN_TOKEN_CHARS).count() >= MIN_TOKEN_CHARS
}

/// Tokenize text. Query text and document text must go through the same function.
pub fn tokenize(text: &str) -> Tokens {
    let buffer = text.to_lowercase();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in buffer.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            if keep(&buffer[s..i]) {
                spans.push((s, i));
            }
        }
    }
    if let Some(s) = start {
        if keep(&buffer[s..]) {
            spans.push((s, buffer.len()));
        }
    }

    Tokens { buffer, spans }
}
