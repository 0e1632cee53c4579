//! IRC line codec.
//!
//! Parameters are kept as raw bytes: servers relay whatever the sending
//! client put on the wire, and decoding is the consumer's business (the
//! configured channel encoding may not be UTF-8 at all). Prefix and command
//! are protocol tokens and are decoded lossily.

use std::borrow::Cow;

/// A single IRC protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(command: &str, params: Vec<Vec<u8>>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Parse one line (with or without its CRLF terminator).
    ///
    /// IRCv3 message tags are skipped; nothing downstream needs them.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let mut rest = trim_line_ending(line);

        if let Some(tagged) = rest.strip_prefix(b"@") {
            rest = split_word(tagged).1;
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(b":") {
            let (p, tail) = split_word(prefixed);
            prefix = Some(String::from_utf8_lossy(p).into_owned());
            rest = tail;
        }

        let (command, mut rest) = split_word(rest);
        if command.is_empty() {
            return None;
        }
        let command = String::from_utf8_lossy(command).to_ascii_uppercase();

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(b":") {
                params.push(trailing.to_vec());
                break;
            }
            let (param, tail) = split_word(rest);
            params.push(param.to_vec());
            rest = tail;
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Raw bytes of parameter `idx`.
    pub fn param_bytes(&self, idx: usize) -> Option<&[u8]> {
        self.params.get(idx).map(Vec::as_slice)
    }

    /// Parameter `idx` decoded as UTF-8, invalid sequences replaced.
    pub fn param(&self, idx: usize) -> Option<Cow<'_, str>> {
        self.param_bytes(idx).map(String::from_utf8_lossy)
    }

    /// Nick part of the prefix (`nick!user@host` -> `nick`).
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_deref().map(nick_from_prefix)
    }

    /// Serialize without the line terminator. CR and LF inside parameters
    /// are replaced by spaces so a parameter can never inject a second line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        if let Some(prefix) = &self.prefix {
            out.push(b':');
            out.extend_from_slice(prefix.as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(self.command.as_bytes());

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            out.push(b' ');
            let param: Vec<u8> = param
                .iter()
                .map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b })
                .collect();
            let needs_colon = i == last
                && (param.is_empty() || param.contains(&b' ') || param.first() == Some(&b':'));
            if needs_colon {
                out.push(b':');
            }
            out.extend_from_slice(&param);
        }
        out
    }
}

/// `nick!user@host` -> `nick`. A bare server name is returned unchanged.
pub fn nick_from_prefix(prefix: &str) -> &str {
    prefix.split('!').next().unwrap_or(prefix)
}

/// Whether `target` names a channel rather than a user.
pub fn is_channel(target: &str) -> bool {
    matches!(target.chars().next(), Some('#' | '&' | '+' | '!'))
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn trim_spaces(s: &[u8]) -> &[u8] {
    match s.iter().position(|&b| b != b' ') {
        Some(i) => &s[i..],
        None => &[],
    }
}

fn split_word(s: &[u8]) -> (&[u8], &[u8]) {
    let s = trim_spaces(s);
    match s.iter().position(|&b| b == b' ') {
        Some(i) => (&s[..i], trim_spaces(&s[i + 1..])),
        None => (s, &[]),
    }
}
