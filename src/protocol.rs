//! DCM1 tag protocol
//!
//! Commands are uppercase tags such as `<Z1.MU,L20/>`. The device answers in
//! lowercase with loose spacing, e.g. `<z8.mu,eq, t = -4, m = +6, b = +2/>`.
//! Decoding never fails loudly: anything unrecognised becomes a
//! [`ParseFailure`] which the reader logs and drops.

use crate::types::{EqParameter, EqSettings, SourceId, VolumeLevel, ZoneId, EQ_MAX, EQ_MIN, MUTE_LEVEL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame terminator shared by commands and responses
pub const TERMINATOR: &str = "/>";

/// Outgoing command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    QueryZoneLabel(ZoneId),
    QuerySourceLabel(SourceId),
    QueryInputEnabled(ZoneId, SourceId),
    SetVolume(ZoneId, VolumeLevel),
    QueryVolume(ZoneId),
    SetSource(ZoneId, SourceId),
    QuerySource(ZoneId),
    SetMute(ZoneId, bool),
    QueryMute(ZoneId),
    SetEq(ZoneId, EqParameter, i8),
    QueryEq(ZoneId),
}

impl Command {
    /// Encode into a wire tag (without line ending)
    pub fn encode(&self) -> String {
        match *self {
            Command::QueryZoneLabel(zone) => format!("<Z{}.LABEL,Q/>", zone),
            Command::QuerySourceLabel(source) => format!("<L{}.LABEL,Q/>", source),
            Command::QueryInputEnabled(zone, source) => format!("<Z{}.L{},Q/>", zone, source),
            Command::SetVolume(zone, level) => format!("<Z{}.MU,L{}/>", zone, level),
            Command::QueryVolume(zone) => format!("<Z{}.MU,LQ/>", zone),
            Command::SetSource(zone, source) => format!("<Z{}.MU,S{}/>", zone, source),
            Command::QuerySource(zone) => format!("<Z{}.MU,SQ/>", zone),
            Command::SetMute(zone, true) => format!("<Z{}.MU,M/>", zone),
            Command::SetMute(zone, false) => format!("<Z{}.MU,O/>", zone),
            Command::QueryMute(zone) => format!("<Z{}.MU,MQ/>", zone),
            Command::SetEq(zone, parameter, value) => format!(
                "<Z{}.MU,{}{:+}/>",
                zone,
                parameter.key().to_ascii_uppercase(),
                value
            ),
            Command::QueryEq(zone) => format!("<Z{}.MU,EQQ/>", zone),
        }
    }

    /// Query that confirms the effect of a set command
    pub fn confirmation(&self) -> Option<Command> {
        match *self {
            Command::SetVolume(zone, _) => Some(Command::QueryVolume(zone)),
            Command::SetSource(zone, _) => Some(Command::QuerySource(zone)),
            Command::SetMute(zone, _) => Some(Command::QueryMute(zone)),
            Command::SetEq(zone, _, _) => Some(Command::QueryEq(zone)),
            _ => None,
        }
    }

    pub fn is_query(&self) -> bool {
        self.confirmation().is_none()
    }
}

/// Decoded device event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    ZoneLabel(ZoneId, String),
    SourceLabel(SourceId, String),
    ZoneVolume(ZoneId, VolumeLevel),
    ZoneMute(ZoneId, bool),
    ZoneSource(ZoneId, SourceId),
    ZoneInputEnabled(ZoneId, SourceId, bool),
    ZoneEq(ZoneId, EqSettings),
    ZoneEqParameter(ZoneId, EqParameter, i8),
}

/// A line that matched none of the known response shapes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparsed line {line:?}: {reason}")]
pub struct ParseFailure {
    pub line: String,
    pub reason: &'static str,
}

impl ParseFailure {
    fn new(line: &str, reason: &'static str) -> Self {
        Self {
            line: line.to_string(),
            reason,
        }
    }
}

/// Decode one frame from the device
pub fn decode(line: &str) -> Result<Response, ParseFailure> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix(TERMINATOR))
        .ok_or_else(|| ParseFailure::new(line, "not a tag"))?
        .trim();

    let (address, rest) = body
        .split_once('.')
        .ok_or_else(|| ParseFailure::new(line, "missing address"))?;
    let address = address.trim();
    let rest = rest.trim();

    if let Some(id) = strip_id(address, 'l') {
        return parse_label(rest)
            .map(|label| Response::SourceLabel(id, label))
            .ok_or_else(|| ParseFailure::new(line, "unknown source reply"));
    }

    let zone = strip_id(address, 'z').ok_or_else(|| ParseFailure::new(line, "unknown address"))?;

    if let Some(label) = parse_label(rest) {
        return Ok(Response::ZoneLabel(zone, label));
    }
    if let Some((source, enabled)) = parse_input_enabled(rest) {
        return Ok(Response::ZoneInputEnabled(zone, source, enabled));
    }

    let fields = strip_key(rest, "mu")
        .and_then(|s| s.trim_start().strip_prefix(','))
        .ok_or_else(|| ParseFailure::new(line, "unknown zone reply"))?;

    // Combined form first, then single key/value forms
    if let Some(eq) = parse_combined_eq(fields) {
        return Ok(Response::ZoneEq(zone, eq));
    }
    parse_mu_field(zone, fields).ok_or_else(|| ParseFailure::new(line, "unknown mu field"))
}

/// `z8` / `L3` -> 8 / 3
fn strip_id(address: &str, prefix: char) -> Option<u8> {
    let mut chars = address.chars();
    let first = chars.next()?;
    if !first.eq_ignore_ascii_case(&prefix) {
        return None;
    }
    chars.as_str().trim().parse().ok()
}

/// Case-insensitive prefix strip
fn strip_key<'a>(input: &'a str, key: &str) -> Option<&'a str> {
    let head = input.get(..key.len())?;
    if head.eq_ignore_ascii_case(key) {
        Some(&input[key.len()..])
    } else {
        None
    }
}

/// `label=Kitchen`, label case preserved
fn parse_label(rest: &str) -> Option<String> {
    let value = strip_key(rest, "label")?.trim_start();
    let value = value.strip_prefix('=').unwrap_or(value);
    Some(value.trim().to_string())
}

/// `l3=1` or `l3 = 0`
fn parse_input_enabled(rest: &str) -> Option<(SourceId, bool)> {
    let after = strip_key(rest, "l")?;
    let (id, value) = after.split_once('=')?;
    let source = id.trim().parse().ok()?;
    let enabled = parse_flag(value.trim())?;
    Some((source, enabled))
}

/// `eq, t = -4, m = +6, b = +2`
fn parse_combined_eq(fields: &str) -> Option<EqSettings> {
    let mut parts = fields.split(',').map(str::trim);
    if !parts.next()?.eq_ignore_ascii_case("eq") {
        return None;
    }
    let (mut treble, mut mid, mut bass) = (None, None, None);
    for part in parts.filter(|p| !p.is_empty()) {
        let (key, value) = split_key_value(part)?;
        let value = parse_eq_value(value)?;
        match EqParameter::from_key(key)? {
            EqParameter::Treble => treble = Some(value),
            EqParameter::Mid => mid = Some(value),
            EqParameter::Bass => bass = Some(value),
        }
    }
    Some(EqSettings {
        treble: treble?,
        mid: mid?,
        bass: bass?,
    })
}

fn parse_mu_field(zone: ZoneId, field: &str) -> Option<Response> {
    let (key, value) = split_key_value(field.trim())?;

    if key.eq_ignore_ascii_case("mute") {
        return parse_flag(value).map(|muted| Response::ZoneMute(zone, muted));
    }
    if key.eq_ignore_ascii_case("l") {
        let level: VolumeLevel = value.parse().ok()?;
        return (level <= MUTE_LEVEL).then_some(Response::ZoneVolume(zone, level));
    }
    if key.eq_ignore_ascii_case("s") {
        let source: SourceId = value.parse().ok()?;
        return Some(Response::ZoneSource(zone, source));
    }
    let parameter = EqParameter::from_key(key)?;
    parse_eq_value(value).map(|v| Response::ZoneEqParameter(zone, parameter, v))
}

/// Accepts `k=v`, `k = v` and `kv` where v starts with a sign or digit
fn split_key_value(field: &str) -> Option<(&str, &str)> {
    if let Some((key, value)) = field.split_once('=') {
        return Some((key.trim(), value.trim()));
    }
    let idx = field.find(|c: char| c == '+' || c == '-' || c.is_ascii_digit())?;
    if idx == 0 {
        return None;
    }
    Some((field[..idx].trim(), field[idx..].trim()))
}

fn parse_eq_value(value: &str) -> Option<i8> {
    let value: i8 = value.replace(' ', "").parse().ok()?;
    (EQ_MIN..=EQ_MAX).contains(&value).then_some(value)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Pulls complete `/>`-terminated frames out of a receive buffer
///
/// Bytes after the last terminator stay in the buffer for the next read.
/// Frames are decoded as UTF-8 only once complete, so a character split
/// across reads survives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

/// Partial frames longer than this are discarded as noise
const MAX_PENDING: usize = 4096;

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(end) = find_terminator(&self.pending) {
            let raw: Vec<u8> = self.pending.drain(..end + TERMINATOR.len()).collect();
            let frame = String::from_utf8_lossy(&raw);
            // Drop anything in front of the tag opener (line endings, noise)
            let frame = match frame.rfind('<') {
                Some(start) => frame[start..].to_string(),
                None => frame.trim().to_string(),
            };
            frames.push(frame);
        }

        if self.pending.len() > MAX_PENDING {
            tracing::warn!("Discarding {} bytes of unterminated input", self.pending.len());
            self.pending.clear();
        }
        frames
    }
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR.as_bytes())
}
