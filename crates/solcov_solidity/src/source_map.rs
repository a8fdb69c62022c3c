//! Decoder for the compiler's compact source-map format.
//!
//! Records are separated by `;` and fields by `:` in the fixed order
//! `start:length:file:jump`. An empty field repeats the value of the previous
//! record. Each record is anchored at the program counter of exactly one
//! instruction; push opcodes additionally consume their 1–32 inline operand
//! bytes, none of which starts an instruction.
//!
//! See <https://docs.soliditylang.org/en/latest/internals/source_mappings.html>

use std::collections::HashMap;

use crate::build_model::{JumpType, SourceMapEntry};

const PUSH1: u8 = 0x60;
const PUSH32: u8 = 0x7f;

/// Number of inline operand bytes following `opcode`.
pub fn immediate_size(opcode: u8) -> usize {
    if (PUSH1..=PUSH32).contains(&opcode) {
        usize::from(opcode - PUSH1 + 1)
    } else {
        0
    }
}

/// A malformed field inside a compact source map.
#[derive(Debug, thiserror::Error)]
#[error("invalid `{field}` field in source map record {index}: `{value}`")]
pub struct SourceMapError {
    /// Index of the offending record.
    pub index: usize,
    /// Name of the offending field.
    pub field: &'static str,
    /// The unparseable field text.
    pub value: String,
}

#[derive(Clone, Debug)]
struct RawRecord {
    start: i32,
    length: i32,
    file: i32,
    jump: JumpType,
}

fn parse_field(
    part: Option<&str>,
    previous: i32,
    index: usize,
    field: &'static str,
) -> Result<i32, SourceMapError> {
    match part {
        Some(text) if !text.is_empty() => text.parse().map_err(|_| SourceMapError {
            index,
            field,
            value: text.to_string(),
        }),
        _ => Ok(previous),
    }
}

/// Expands the differential encoding into one full record per instruction.
fn uncompress(compressed: &str) -> Result<Vec<RawRecord>, SourceMapError> {
    let mut records: Vec<RawRecord> = Vec::new();

    for (index, compressed_record) in compressed.split(';').enumerate() {
        let mut parts = compressed_record.split(':');
        let (part0, part1, part2, part3) =
            (parts.next(), parts.next(), parts.next(), parts.next());

        let previous = records.last().cloned().unwrap_or(RawRecord {
            start: 0,
            length: 0,
            file: -1,
            jump: JumpType::None,
        });

        records.push(RawRecord {
            start: parse_field(part0, previous.start, index, "start")?,
            length: parse_field(part1, previous.length, index, "length")?,
            file: parse_field(part2, previous.file, index, "file")?,
            jump: match part3 {
                Some(letter) if !letter.is_empty() => JumpType::from_letter(letter),
                _ => previous.jump,
            },
        });
    }

    Ok(records)
}

/// Whether the record's span resolves to a known source file and covers a
/// single line of it. Spans crossing lines cannot be mapped to one coverage
/// line and are discarded.
fn is_single_line_span(record: &RawRecord, source_by_file_id: &HashMap<i32, String>) -> bool {
    if record.start < 0 || record.length < 0 {
        return false;
    }

    let Some(source) = source_by_file_id.get(&record.file) else {
        return false;
    };

    let start = record.start as usize;
    let end = start + record.length as usize;

    source
        .as_bytes()
        .get(start..end)
        .is_some_and(|span| !span.contains(&b'\n'))
}

/// Decodes `compressed` against `bytecode`, producing one slot per byte of
/// bytecode. Only instruction-start offsets can hold an entry, and only when
/// the record survived the single-line-span filter; all other slots are
/// `None`. Empty bytecode decodes to an empty map.
pub fn decode_source_map(
    bytecode: &[u8],
    compressed: &str,
    source_by_file_id: &HashMap<i32, String>,
) -> Result<Vec<Option<SourceMapEntry>>, SourceMapError> {
    if bytecode.is_empty() {
        return Ok(Vec::new());
    }

    let records = uncompress(compressed)?;
    let mut slots: Vec<Option<SourceMapEntry>> = vec![None; bytecode.len()];
    let mut pc = 0usize;

    for record in records {
        if pc >= bytecode.len() {
            break;
        }

        if is_single_line_span(&record, source_by_file_id) {
            slots[pc] = Some(SourceMapEntry {
                start: record.start as u32,
                length: record.length as u32,
                file_id: record.file,
                jump_type: record.jump,
                visited: false,
            });
        }

        pc += 1 + immediate_size(bytecode[pc]);
    }

    Ok(slots)
}
