//! Turning raw chat lines and log lines into trainable text.
//!
//! Two grammars live here and stay separate: live channel
//! messages (`normalize_live`) arrive as undecoded wire bytes and may be
//! addressed to someone, while log lines (`normalize_log_line`) follow a
//! strict `HH:MM <nick> message` shape.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::LazyLock;

use encoding_rs::{EncoderResult, Encoding};
use regex::Regex;
use regex::bytes::{Regex as BytesRegex, RegexBuilder};

use crate::error::{ConfigError, DecodeError};

// Byte patterns run with Unicode off so that `.` and `\S` also match bytes
// that are not valid in any encoding.
static PASTED_NICK: LazyLock<BytesRegex> =
    LazyLock::new(|| BytesRegex::new(r"(?-u)^<\S+>\s+").expect("valid regex"));
static ADDRESSED: LazyLock<BytesRegex> =
    LazyLock::new(|| BytesRegex::new(r"(?-u)^\s*(\S+)[,:]\s+(.*?)\s*$").expect("valid regex"));

static LOG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+:\d+\s+<(.+?)>\s+(.*)").expect("valid regex"));
static SALUTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+[,:]\s+(\S.*)").expect("valid regex"));
static QUOTE_ATTRIBUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*)" --\S+,\s+\d+-\S+-\d+"#).expect("valid regex"));

/// Ignore list and training allow-list shared by every ingestion path.
#[derive(Debug, Clone, Default)]
pub struct NickFilter {
    ignored: HashSet<String>,
    only: HashSet<String>,
}

impl NickFilter {
    pub fn new<I, O>(ignored: I, only: O) -> Self
    where
        I: IntoIterator<Item = String>,
        O: IntoIterator<Item = String>,
    {
        Self {
            ignored: ignored.into_iter().collect(),
            only: only.into_iter().collect(),
        }
    }

    pub fn is_ignored(&self, nick: &str) -> bool {
        self.ignored.contains(nick)
    }

    /// An empty allow-list lets everyone train.
    pub fn may_train(&self, nick: &str) -> bool {
        self.only.is_empty() || self.only.contains(nick)
    }
}

/// Text codec for one chat surface.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    encoding: &'static Encoding,
    strict: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            strict: false,
        }
    }
}

impl Decoder {
    /// Look up a WHATWG encoding label (`utf-8`, `latin1`, `shift_jis`, ...).
    ///
    /// With `strict` set, malformed input is an error instead of being
    /// replaced with U+FFFD. Encodings that can't be written back to the
    /// wire (UTF-16, `replacement`) are rejected.
    pub fn for_label(label: &str, strict: bool) -> Result<Self, ConfigError> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))?;
        if encoding.output_encoding() != encoding {
            return Err(ConfigError::DecodeOnlyEncoding(encoding.name().to_string()));
        }
        Ok(Self { encoding, strict })
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        if !self.strict {
            return Ok(self.decode_lossy(bytes));
        }
        match self
            .encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
        {
            Some(text) => Ok(text.into_owned()),
            None => Err(DecodeError {
                reason: self.malformed_reason(bytes),
            }),
        }
    }

    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        let (text, _had_errors) = self.encoding.decode_without_bom_handling(bytes);
        text.into_owned()
    }

    /// Encode outgoing text. Characters the encoding can't represent
    /// become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut encoder = self.encoding.new_encoder();
        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        loop {
            let room = encoder
                .max_buffer_length_from_utf8_without_replacement(rest.len())
                .unwrap_or(rest.len() * 4 + 16);
            let start = out.len();
            out.resize(start + room, 0);
            let (result, read, written) =
                encoder.encode_from_utf8_without_replacement(rest, &mut out[start..], true);
            out.truncate(start + written);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => return out,
                EncoderResult::OutputFull => {}
                EncoderResult::Unmappable(_) => out.push(b'?'),
            }
        }
    }

    fn malformed_reason(&self, bytes: &[u8]) -> String {
        if self.encoding == encoding_rs::UTF_8
            && let Err(e) = std::str::from_utf8(bytes)
        {
            return e.to_string();
        }
        format!("malformed {} input", self.encoding.name())
    }
}

/// A live chat message after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub sender: String,
    /// Nick the line was explicitly addressed to (`nick: text`).
    pub addressee: Option<String>,
    /// Clean payload for training and as reply seed.
    pub payload: String,
    /// The line with pasted nicks stripped, decoded lossily; mention checks
    /// run against this.
    pub raw_text: String,
    pub trainable: bool,
}

/// Normalize one channel message.
///
/// `Ok(None)` means the message is dropped (ignored sender). `Err` means the
/// payload could not be decoded; the caller reports the reason to the
/// sender and does nothing else with the message.
pub fn normalize_live(
    raw: &[u8],
    sender: &str,
    bot_nick: &str,
    filter: &NickFilter,
    decoder: &Decoder,
) -> Result<Option<NormalizedMessage>, DecodeError> {
    if filter.is_ignored(sender) {
        return Ok(None);
    }

    let msg = strip_pasted_nick(raw);

    let (addressee, payload) = match ADDRESSED.captures(&msg) {
        Some(caps) => {
            let to = decoder.decode_lossy(&caps[1]);
            (Some(to), caps[2].to_vec())
        }
        None => (None, remove_nick(&msg, bot_nick).into_owned()),
    };

    let payload = decoder.decode(&payload)?.trim().to_string();

    Ok(Some(NormalizedMessage {
        sender: sender.to_string(),
        addressee,
        payload,
        raw_text: decoder.decode_lossy(&msg),
        trainable: filter.may_train(sender),
    }))
}

/// Drop a leading `<nick> ` left over from pasting another client's output.
pub fn strip_pasted_nick(raw: &[u8]) -> Cow<'_, [u8]> {
    PASTED_NICK.replace(raw, &b""[..])
}

/// Remove every case-insensitive occurrence of `nick`.
fn remove_nick<'a>(msg: &'a [u8], nick: &str) -> Cow<'a, [u8]> {
    if nick.is_empty() {
        return Cow::Borrowed(msg);
    }
    match RegexBuilder::new(&regex::escape(nick))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(msg, &b""[..]),
        Err(e) => {
            tracing::warn!(nick, error = %e, "can't build nick pattern");
            Cow::Borrowed(msg)
        }
    }
}

/// Extract trainable text from an `HH:MM <nick> message` log line.
pub fn normalize_log_line(line: &str, filter: &NickFilter) -> Option<String> {
    let caps = LOG_LINE.captures(line)?;
    let nick = &caps[1];
    if filter.is_ignored(nick) || !filter.may_train(nick) {
        return None;
    }

    let msg = strip_salutation(&caps[2]);
    Some(strip_quote_attribution(msg).into_owned())
}

/// Strip a leading `username: ` or `username, `.
pub fn strip_salutation(msg: &str) -> &str {
    match SALUTATION.captures(msg).and_then(|c| c.get(1)) {
        Some(rest) => rest.as_str(),
        None => msg,
    }
}

/// Replace `"quoted text" --user, 06-oct-09` with `quoted text`.
pub fn strip_quote_attribution(msg: &str) -> Cow<'_, str> {
    QUOTE_ATTRIBUTION.replace_all(msg, "$1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8() -> Decoder {
        Decoder::default()
    }

    fn live(raw: &[u8], decoder: &Decoder) -> Result<Option<NormalizedMessage>, DecodeError> {
        normalize_live(raw, "alice", "cobe", &NickFilter::default(), decoder)
    }

    fn nicks(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ignored_sender_is_dropped() {
        let filter = NickFilter::new(nicks(&["spammer"]), Vec::new());
        for text in [&b"cobe: hi"[..], &b"anything"[..], &b""[..], &b"\xff\xfe"[..]] {
            let result = normalize_live(text, "spammer", "cobe", &filter, &utf8()).unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn addressed_message_splits_addressee() {
        let msg = live(b"  bob: how are you   ", &utf8()).unwrap().unwrap();
        assert_eq!(msg.addressee.as_deref(), Some("bob"));
        assert_eq!(msg.payload, "how are you");
        assert!(msg.trainable);
    }

    #[test]
    fn unaddressed_message_drops_every_nick_occurrence() {
        let msg = live(b"I think COBE likes cobe", &utf8()).unwrap().unwrap();
        assert_eq!(msg.addressee, None);
        assert_eq!(msg.payload, "I think  likes");
        assert_eq!(msg.raw_text, "I think COBE likes cobe");
    }

    #[test]
    fn nick_with_regex_metacharacters_is_literal() {
        let filter = NickFilter::default();
        let msg = normalize_live(b"hey c.be and cobe", "alice", "c.be", &filter, &utf8())
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "hey  and cobe");
    }

    #[test]
    fn pasted_nick_is_stripped_before_parsing() {
        let msg = live(b"<dave> cobe: are you there", &utf8()).unwrap().unwrap();
        assert_eq!(msg.addressee.as_deref(), Some("cobe"));
        assert_eq!(msg.payload, "are you there");
        assert_eq!(msg.raw_text, "cobe: are you there");
    }

    #[test]
    fn only_list_gates_training() {
        let filter = NickFilter::new(Vec::new(), nicks(&["alice"]));
        let bob = normalize_live(b"cobe: hi", "bob", "cobe", &filter, &utf8()).unwrap().unwrap();
        assert!(!bob.trainable);
        let alice = normalize_live(b"cobe: hi", "alice", "cobe", &filter, &utf8())
            .unwrap()
            .unwrap();
        assert!(alice.trainable);
    }

    #[test]
    fn invalid_bytes_are_replaced_by_default() {
        let msg = live(b"caf\xe9 au lait", &utf8()).unwrap().unwrap();
        assert_eq!(msg.payload, "caf\u{FFFD} au lait");
    }

    #[test]
    fn invalid_bytes_in_addressed_payload_still_match() {
        let msg = live(b"bob: caf\xe9", &utf8()).unwrap().unwrap();
        assert_eq!(msg.addressee.as_deref(), Some("bob"));
        assert_eq!(msg.payload, "caf\u{FFFD}");
    }

    #[test]
    fn strict_decoding_reports_reason() {
        let strict = Decoder::for_label("utf-8", true).unwrap();
        let err = live(b"caf\xe9 au lait", &strict).unwrap_err();
        assert_eq!(err.reason, "invalid utf-8 sequence of 1 bytes from index 3");
    }

    #[test]
    fn strict_decoding_reports_truncated_tail() {
        let strict = Decoder::for_label("utf-8", true).unwrap();
        let err = live(b"caf\xc3", &strict).unwrap_err();
        assert_eq!(err.reason, "incomplete utf-8 byte sequence from index 3");
    }

    #[test]
    fn latin1_decodes_and_encodes() {
        let latin1 = Decoder::for_label("latin1", true).unwrap();
        let msg = live(b"caf\xe9", &latin1).unwrap().unwrap();
        assert_eq!(msg.payload, "café");
        assert_eq!(latin1.encode("café"), b"caf\xe9");
    }

    #[test]
    fn unknown_encoding_is_a_config_error() {
        assert!(matches!(
            Decoder::for_label("klingon", false),
            Err(ConfigError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn unmappable_characters_encode_as_question_marks() {
        let latin1 = Decoder::for_label("latin1", false).unwrap();
        assert_eq!(latin1.encode("café 日\u{FFFD}"), b"caf\xe9 ??");
        let sjis = Decoder::for_label("shift_jis", false).unwrap();
        assert_eq!(sjis.encode("日 🐈"), b"\x93\xfa ?");
    }

    #[test]
    fn decode_only_encodings_are_rejected() {
        for label in ["utf-16le", "utf-16be", "iso-2022-kr"] {
            let result = Decoder::for_label(label, false);
            assert!(matches!(result, Err(ConfigError::DecodeOnlyEncoding(_))), "{label}");
        }
    }

    #[test]
    fn log_line_yields_message() {
        let filter = NickFilter::default();
        assert_eq!(
            normalize_log_line("12:34 <alice> hello world", &filter).as_deref(),
            Some("hello world")
        );
    }

    #[test]
    fn log_line_respects_filters() {
        let ignore_alice = NickFilter::new(nicks(&["alice"]), Vec::new());
        assert_eq!(normalize_log_line("12:34 <alice> hello world", &ignore_alice), None);

        let only_bob = NickFilter::new(Vec::new(), nicks(&["bob"]));
        assert_eq!(normalize_log_line("12:34 <alice> hello world", &only_bob), None);
        assert_eq!(
            normalize_log_line("12:35 <bob> hi there", &only_bob).as_deref(),
            Some("hi there")
        );
    }

    #[test]
    fn malformed_log_lines_are_dropped() {
        let filter = NickFilter::default();
        assert_eq!(normalize_log_line("alice: hello", &filter), None);
        assert_eq!(normalize_log_line("-!- alice has joined #cobe", &filter), None);
        assert_eq!(normalize_log_line("12:34 * alice waves", &filter), None);
    }

    #[test]
    fn log_line_salutation_and_quote_are_stripped() {
        let filter = NickFilter::default();
        assert_eq!(
            normalize_log_line("09:15 <alice> bob, how are you", &filter).as_deref(),
            Some("how are you")
        );
        let quote = "09:16 <kibot> \"nice weather\" --dave, 06-oct-09";
        assert_eq!(normalize_log_line(quote, &filter).as_deref(), Some("nice weather"));
    }

    #[test]
    fn salutation_strip_ignores_bot_nick() {
        assert_eq!(strip_salutation("bob: how are you"), "how are you");
        assert_eq!(strip_salutation("no salutation here"), "no salutation here");
    }

    #[test]
    fn quote_attribution_strip() {
        assert_eq!(strip_quote_attribution("\"nice weather\" --dave, 06-oct-09"), "nice weather");
        assert_eq!(strip_quote_attribution("plain text"), "plain text");
    }
}
