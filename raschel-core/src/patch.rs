//! Lossless text patches.
//!
//! A patch is a line-diff edit script over byte offsets of the base text,
//! framed by the lengths and digests of both sides:
//!
//! ```text
//! raschel-patch 1 <base_len> <target_len> <base_hash> <target_hash>
//! = 120          keep 120 bytes of the base
//! - 14           drop 14 bytes of the base
//! + new line\n   insert text (`\\`, `\n`, `\r` escaped)
//! ```
//!
//! Applying checks the base digest first and the target digest last, so a
//! patch applied to the wrong text fails instead of producing garbage.

use similar::{Algorithm, ChangeTag, TextDiff};
use thiserror::Error;

use crate::hash::{ContentHash, hash_bytes};

const MAGIC: &str = "raschel-patch";
const VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("{0} content is not valid UTF-8 text")]
    NotText(&'static str),

    #[error("malformed patch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("patch base mismatch: expected {expected_len} bytes ({expected_hash}), got {actual_len}")]
    BaseMismatch {
        expected_len: usize,
        expected_hash: ContentHash,
        actual_len: usize,
    },

    #[error("patch operations run past the end of the base text")]
    OutOfRange,

    #[error("patched text does not match the recorded target")]
    TargetMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Keep(usize),
    Delete(usize),
    Insert(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub base_len: usize,
    pub target_len: usize,
    pub base_hash: ContentHash,
    pub target_hash: ContentHash,
    pub ops: Vec<Op>,
}

impl Patch {
    /// Edit script turning `old` into `new`.
    pub fn compute(old: &str, new: &str) -> Self {
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_lines(old, new);

        let mut ops: Vec<Op> = Vec::new();
        for change in diff.iter_all_changes() {
            let value = change.value();
            match (change.tag(), ops.last_mut()) {
                (ChangeTag::Equal, Some(Op::Keep(n))) => *n += value.len(),
                (ChangeTag::Equal, _) => ops.push(Op::Keep(value.len())),
                (ChangeTag::Delete, Some(Op::Delete(n))) => *n += value.len(),
                (ChangeTag::Delete, _) => ops.push(Op::Delete(value.len())),
                (ChangeTag::Insert, Some(Op::Insert(s))) => s.push_str(value),
                (ChangeTag::Insert, _) => ops.push(Op::Insert(value.to_string())),
            }
        }

        Self {
            base_len: old.len(),
            target_len: new.len(),
            base_hash: hash_bytes(old.as_bytes()),
            target_hash: hash_bytes(new.as_bytes()),
            ops,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.base_hash == self.target_hash
    }

    pub fn apply(&self, old: &str) -> Result<String, PatchError> {
        if old.len() != self.base_len || hash_bytes(old.as_bytes()) != self.base_hash {
            return Err(PatchError::BaseMismatch {
                expected_len: self.base_len,
                expected_hash: self.base_hash,
                actual_len: old.len(),
            });
        }

        let mut out = String::with_capacity(self.target_len);
        let mut pos = 0usize;
        for op in &self.ops {
            match op {
                Op::Keep(n) => {
                    let end = pos.checked_add(*n).ok_or(PatchError::OutOfRange)?;
                    out.push_str(old.get(pos..end).ok_or(PatchError::OutOfRange)?);
                    pos = end;
                }
                Op::Delete(n) => {
                    let end = pos.checked_add(*n).ok_or(PatchError::OutOfRange)?;
                    old.get(pos..end).ok_or(PatchError::OutOfRange)?;
                    pos = end;
                }
                Op::Insert(s) => out.push_str(s),
            }
        }

        if pos != old.len()
            || out.len() != self.target_len
            || hash_bytes(out.as_bytes()) != self.target_hash
        {
            return Err(PatchError::TargetMismatch);
        }
        Ok(out)
    }

    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{MAGIC} {VERSION} {} {} {} {}\n",
            self.base_len, self.target_len, self.base_hash, self.target_hash
        );
        for op in &self.ops {
            match op {
                Op::Keep(n) => out.push_str(&format!("= {n}\n")),
                Op::Delete(n) => out.push_str(&format!("- {n}\n")),
                Op::Insert(s) => {
                    out.push_str("+ ");
                    escape_into(s, &mut out);
                    out.push('\n');
                }
            }
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, PatchError> {
        let mut lines = text.split('\n').enumerate();
        let (_, header) = lines.next().ok_or_else(|| malformed(1, "empty patch"))?;
        let fields: Vec<&str> = header.split(' ').collect();
        if fields.len() != 6 || fields[0] != MAGIC {
            return Err(malformed(1, "missing patch header"));
        }
        if fields[1] != VERSION.to_string() {
            return Err(malformed(1, format!("unsupported version {}", fields[1])));
        }
        let base_len = parse_len(fields[2], 1)?;
        let target_len = parse_len(fields[3], 1)?;
        let base_hash: ContentHash = fields[4]
            .parse()
            .map_err(|_| malformed(1, "bad base digest"))?;
        let target_hash: ContentHash = fields[5]
            .parse()
            .map_err(|_| malformed(1, "bad target digest"))?;

        let mut ops = Vec::new();
        for (idx, line) in lines {
            let lineno = idx + 1;
            if line.is_empty() {
                // only the terminator after the final newline
                continue;
            }
            let (tag, body) = line
                .split_at_checked(2)
                .ok_or_else(|| malformed(lineno, "truncated operation"))?;
            let op = match tag {
                "= " => Op::Keep(parse_len(body, lineno)?),
                "- " => Op::Delete(parse_len(body, lineno)?),
                "+ " => Op::Insert(unescape(body).ok_or_else(|| malformed(lineno, "bad escape"))?),
                _ => return Err(malformed(lineno, format!("unknown operation {tag:?}"))),
            };
            ops.push(op);
        }

        Ok(Self {
            base_len,
            target_len,
            base_hash,
            target_hash,
            ops,
        })
    }
}

/// Patch text that turns `old` into `new`.
pub fn make_patch(old: &str, new: &str) -> String {
    Patch::compute(old, new).to_text()
}

/// Reconstruct the target text from `old` and a serialized patch.
pub fn apply_patch(patch_text: &str, old: &str) -> Result<String, PatchError> {
    Patch::parse(patch_text)?.apply(old)
}

/// Byte-level entry point: both sides must decode as UTF-8.
pub fn make_patch_bytes(old: &[u8], new: &[u8]) -> Result<String, PatchError> {
    let old = std::str::from_utf8(old).map_err(|_| PatchError::NotText("archived"))?;
    let new = std::str::from_utf8(new).map_err(|_| PatchError::NotText("current"))?;
    Ok(make_patch(old, new))
}

fn malformed(line: usize, reason: impl Into<String>) -> PatchError {
    PatchError::Malformed {
        line,
        reason: reason.into(),
    }
}

fn parse_len(s: &str, line: usize) -> Result<usize, PatchError> {
    s.parse::<usize>()
        .map_err(|_| malformed(line, format!("bad length {s:?}")))
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}
