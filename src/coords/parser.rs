//! Parser for the focus/query/filter command grammar.
//!
//! ```text
//! cmd          = switch-cmd | query-cmd | filter-cmd
//! switch-cmd   = selector 1*(WSP selector)     ; at least one value given
//! query-cmd    = selector                      ; bare selectors only
//! selector     = ("device"|"sm"|"warp"|"lane"|"kernel"|"grid") [value]
//!              | ("block"|"thread") [dim3]
//! value        = uint | "current" | "any" | "*"
//! dim3         = "(" uint "," uint "," uint ")"
//! ```
//!
//! A bare selector takes the caller-supplied default value, which is how
//! `cuda sm` means "the current sm" in a switch but "any sm" in a filter.

use bitflags::bitflags;
use thiserror::Error;

use crate::common::CuDim3;
use crate::coords::{Coord, CoordDim3, Coords};

bitflags! {
    /// The command kinds a call site is willing to accept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcceptedCommands: u8 {
        const SWITCH = 1 << 0;
        const QUERY  = 1 << 1;
        const FILTER = 1 << 2;
    }
}

/// How the parser classified the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Switch,
    Query,
    Filter,
}

/// The value assigned to a selector that was given without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Current,
    Wildcard,
}

impl DefaultValue {
    fn coord_u32(self) -> Coord<u32> {
        match self {
            DefaultValue::Current => Coord::Current,
            DefaultValue::Wildcard => Coord::Wildcard,
        }
    }

    fn coord_u64(self) -> Coord<u64> {
        match self {
            DefaultValue::Current => Coord::Current,
            DefaultValue::Wildcard => Coord::Wildcard,
        }
    }

    fn coord_dim3(self) -> CoordDim3 {
        match self {
            DefaultValue::Current => CoordDim3::CURRENT,
            DefaultValue::Wildcard => CoordDim3::WILDCARD,
        }
    }
}

/// One parsed selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Device(Coord<u32>),
    Sm(Coord<u32>),
    Warp(Coord<u32>),
    Lane(Coord<u32>),
    Kernel(Coord<u64>),
    Grid(Coord<u64>),
    Block(CoordDim3),
    Thread(CoordDim3),
}

impl Request {
    /// Whether the selector addresses the physical axis.
    pub fn is_physical(&self) -> bool {
        matches!(
            self,
            Request::Device(_) | Request::Sm(_) | Request::Warp(_) | Request::Lane(_)
        )
    }
}

/// The outcome of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub command: CommandKind,
    pub requests: Vec<Request>,
}

impl ParseResult {
    /// Overlay the parsed selectors onto a coordinate tuple.
    pub fn apply(&self, coords: &mut Coords) {
        for request in &self.requests {
            match *request {
                Request::Device(v) => coords.dev = v,
                Request::Sm(v) => coords.sm = v,
                Request::Warp(v) => coords.wp = v,
                Request::Lane(v) => coords.ln = v,
                Request::Kernel(v) => coords.kernel_id = v,
                Request::Grid(v) => coords.grid_id = v,
                Request::Block(v) => coords.block_idx = v,
                Request::Thread(v) => coords.thread_idx = v,
            }
        }
    }

    /// Whether any selector addressed the physical axis.
    pub fn any_physical(&self) -> bool {
        self.requests.iter().any(Request::is_physical)
    }
}

/// Parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown selector '{0}'")]
    UnknownSelector(String),
    #[error("malformed value '{0}'")]
    MalformedValue(String),
    #[error("malformed (x,y,z) triple")]
    MalformedDim3,
    #[error("selector values are not allowed here")]
    UnexpectedValue,
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Cursor<'a> {
        Cursor { input, pos: 0 }
    }

    fn skip_ws(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.input.len()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consume a run of selector/value characters.
    fn word(&mut self) -> &'a str {
        self.skip_ws();
        let start = self.pos;
        for c in self.input[self.pos..].chars() {
            if c.is_alphanumeric() || c == '_' || c == '*' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn uint(&mut self) -> Result<u64, ParseError> {
        let w = self.word();
        parse_uint(w).ok_or_else(|| ParseError::MalformedValue(w.to_string()))
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        match self.bump() {
            Some(got) if got == c => Ok(()),
            _ => Err(ParseError::MalformedDim3),
        }
    }

    fn dim3(&mut self) -> Result<CuDim3, ParseError> {
        self.expect('(')?;
        let x = self.uint()? as u32;
        self.expect(',')?;
        let y = self.uint()? as u32;
        self.expect(',')?;
        let z = self.uint()? as u32;
        self.expect(')')?;
        Ok(CuDim3::new(x, y, z))
    }
}

fn parse_uint(word: &str) -> Option<u64> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        word.parse().ok()
    }
}

/// A scalar selector value: a literal, `current`, `any`/`*`, or (when bare)
/// the caller's default.
fn scalar_value(cur: &mut Cursor<'_>, default: DefaultValue) -> Result<(Coord<u64>, bool), ParseError> {
    match cur.peek() {
        Some(c) if c.is_ascii_digit() => Ok((Coord::Exact(cur.uint()?), true)),
        Some('*') => {
            cur.bump();
            Ok((Coord::Wildcard, true))
        }
        Some(c) if c.is_alphabetic() => {
            let save = cur.pos;
            let w = cur.word();
            match w {
                "current" => Ok((Coord::Current, true)),
                "any" => Ok((Coord::Wildcard, true)),
                _ => {
                    // the next selector, not a value
                    cur.pos = save;
                    Ok((default.coord_u64(), false))
                }
            }
        }
        _ => Ok((default.coord_u64(), false)),
    }
}

fn narrow(c: Coord<u64>) -> Coord<u32> {
    match c {
        Coord::Exact(v) => Coord::Exact(v as u32),
        Coord::Wildcard => Coord::Wildcard,
        Coord::Current => Coord::Current,
        Coord::Invalid => Coord::Invalid,
    }
}

/// Parse a focus/query/filter command.
///
/// `accepted` narrows which command kinds the call site services; the
/// natural kind (query for bare selectors, switch otherwise) is coerced into
/// the accepted set where that is unambiguous.
pub fn parse(
    input: &str,
    accepted: AcceptedCommands,
    default: DefaultValue,
) -> Result<ParseResult, ParseError> {
    let mut cur = Cursor::new(input);
    let mut requests = Vec::new();
    let mut any_value = false;

    if cur.at_end() {
        return Err(ParseError::Empty);
    }

    while !cur.at_end() {
        let selector = cur.word();

        let request = match selector {
            "device" | "dev" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Device(narrow(v))
            }
            "sm" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Sm(narrow(v))
            }
            "warp" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Warp(narrow(v))
            }
            "lane" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Lane(narrow(v))
            }
            "kernel" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Kernel(v)
            }
            "grid" => {
                let (v, explicit) = scalar_value(&mut cur, default)?;
                any_value |= explicit;
                Request::Grid(v)
            }
            "block" => {
                if cur.peek() == Some('(') {
                    any_value = true;
                    Request::Block(CoordDim3::exact(cur.dim3()?))
                } else {
                    Request::Block(default.coord_dim3())
                }
            }
            "thread" => {
                if cur.peek() == Some('(') {
                    any_value = true;
                    Request::Thread(CoordDim3::exact(cur.dim3()?))
                } else {
                    Request::Thread(default.coord_dim3())
                }
            }
            "" => return Err(ParseError::MalformedValue(cur.input[cur.pos..].to_string())),
            unknown => return Err(ParseError::UnknownSelector(unknown.to_string())),
        };

        requests.push(request);
    }

    let natural = if any_value {
        CommandKind::Switch
    } else {
        CommandKind::Query
    };

    let command = match natural {
        _ if accepted == AcceptedCommands::FILTER => CommandKind::Filter,
        CommandKind::Switch if accepted.contains(AcceptedCommands::SWITCH) => CommandKind::Switch,
        CommandKind::Query if accepted.contains(AcceptedCommands::QUERY) => CommandKind::Query,
        // bare selectors through a switch-only call site switch to the default
        CommandKind::Query if accepted.contains(AcceptedCommands::SWITCH) => CommandKind::Switch,
        _ => return Err(ParseError::UnexpectedValue),
    };

    Ok(ParseResult { command, requests })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_selector_is_a_query() {
        let r = parse(
            "sm",
            AcceptedCommands::SWITCH | AcceptedCommands::QUERY,
            DefaultValue::Current,
        )
        .unwrap();
        assert_eq!(r.command, CommandKind::Query);
        assert_eq!(r.requests, vec![Request::Sm(Coord::Current)]);
    }

    #[test]
    fn selector_with_value_is_a_switch() {
        let r = parse(
            "device 1 sm 3",
            AcceptedCommands::SWITCH | AcceptedCommands::QUERY,
            DefaultValue::Current,
        )
        .unwrap();
        assert_eq!(r.command, CommandKind::Switch);
        assert_eq!(
            r.requests,
            vec![Request::Device(Coord::Exact(1)), Request::Sm(Coord::Exact(3))]
        );
        assert!(r.any_physical());
    }

    #[test]
    fn dim3_values() {
        let r = parse(
            "block (1,2,3) thread (0, 1, 2)",
            AcceptedCommands::SWITCH,
            DefaultValue::Current,
        )
        .unwrap();
        assert_eq!(
            r.requests,
            vec![
                Request::Block(CoordDim3::exact(CuDim3::new(1, 2, 3))),
                Request::Thread(CoordDim3::exact(CuDim3::new(0, 1, 2))),
            ]
        );
        assert!(!r.any_physical());
    }

    #[test]
    fn wildcard_and_current_values() {
        let r = parse(
            "kernel any sm * warp current",
            AcceptedCommands::FILTER,
            DefaultValue::Wildcard,
        )
        .unwrap();
        assert_eq!(r.command, CommandKind::Filter);
        assert_eq!(
            r.requests,
            vec![
                Request::Kernel(Coord::Wildcard),
                Request::Sm(Coord::Wildcard),
                Request::Warp(Coord::Current),
            ]
        );
    }

    #[test]
    fn hex_literals() {
        let r = parse("grid 0x10", AcceptedCommands::FILTER, DefaultValue::Wildcard).unwrap();
        assert_eq!(r.requests, vec![Request::Grid(Coord::Exact(16))]);
    }

    #[test]
    fn bare_filter_defaults_to_wildcard() {
        let r = parse("lane", AcceptedCommands::FILTER, DefaultValue::Wildcard).unwrap();
        assert_eq!(r.requests, vec![Request::Lane(Coord::Wildcard)]);
    }

    #[test]
    fn unknown_selector_is_rejected() {
        assert_eq!(
            parse("bogus 3", AcceptedCommands::FILTER, DefaultValue::Wildcard),
            Err(ParseError::UnknownSelector("bogus".to_string()))
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(
            parse("   ", AcceptedCommands::FILTER, DefaultValue::Wildcard),
            Err(ParseError::Empty)
        );
    }

    #[test]
    fn values_rejected_by_query_only_sites() {
        assert_eq!(
            parse("sm 3", AcceptedCommands::QUERY, DefaultValue::Current),
            Err(ParseError::UnexpectedValue)
        );
    }

    #[test]
    fn apply_overlays_requests() {
        let r = parse(
            "sm 3 block (1,0,0)",
            AcceptedCommands::FILTER,
            DefaultValue::Wildcard,
        )
        .unwrap();
        let mut c = Coords::wildcard();
        r.apply(&mut c);
        assert_eq!(c.sm, Coord::Exact(3));
        assert_eq!(c.block_idx.as_dim3(), Some(CuDim3::new(1, 0, 0)));
        assert_eq!(c.dev, Coord::Wildcard);
    }
}
