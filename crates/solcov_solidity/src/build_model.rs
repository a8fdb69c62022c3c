//! The resolved contract model: one [`Artifact`] per compiled contract, with
//! its decoded deployed bytecode, a per-byte line map of the originating
//! source file and a per-PC source map.

/// The compiler's jump annotation for an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpType {
    /// No annotation was present for this instruction.
    None,
    /// A jump into a function (`i`).
    IntoFunction,
    /// A jump out of a function (`o`).
    OutOfFunction,
    /// A regular jump (`-`).
    Regular,
}

impl JumpType {
    /// Decodes the compiler's one-letter jump encoding.
    pub fn from_letter(letter: &str) -> JumpType {
        match letter {
            "i" => JumpType::IntoFunction,
            "o" => JumpType::OutOfFunction,
            "-" => JumpType::Regular,
            _ => JumpType::None,
        }
    }
}

/// One decoded source-map record, anchored at the program counter of the
/// instruction it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMapEntry {
    /// Byte offset of the source span this instruction originates from.
    pub start: u32,
    /// Byte length of the source span.
    pub length: u32,
    /// Compiler-assigned index of the source file containing the span.
    pub file_id: i32,
    pub jump_type: JumpType,
    /// Whether any execution trace has landed on this instruction.
    pub visited: bool,
}

impl SourceMapEntry {
    /// Key identifying the source span, used to cross-reference spans between
    /// instructions.
    pub fn node_id(&self) -> String {
        format!("{}:{}:{}", self.start, self.length, self.file_id)
    }
}

/// Line/column bookkeeping for one byte of source text, plus the coverage
/// flags the aggregator projects onto it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineEntry {
    /// 1-based line number.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
    pub hit: bool,
    pub miss: bool,
}

/// One compiled contract.
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Display name of the contract.
    pub name: String,
    /// Deployed (runtime) bytecode as the canonical `0x`-prefixed hex string.
    pub deployed_bytecode: String,
    /// Raw bytes decoded from [`Artifact::deployed_bytecode`].
    pub bytecode: Vec<u8>,
    /// Compact source map string for the deployed bytecode.
    pub deployed_source_map: String,
    /// Content of the originating source file.
    pub source: String,
    /// Path of the originating source file.
    pub file_path: String,
    /// Compiler-assigned file index used inside source maps.
    pub file_id: i32,
    /// Number of lines of the source file.
    pub number_of_lines: u32,
    /// One entry per byte of [`Artifact::source`].
    pub line_map: Vec<LineEntry>,
    /// One slot per byte of bytecode; only instruction-start offsets can hold
    /// an entry, and only when the record survived attributability filtering.
    pub source_map: Vec<Option<SourceMapEntry>>,
}

/// Builds the per-byte line map of `source`. A newline increments the line
/// and resets the column.
pub fn make_line_map(source: &str) -> (Vec<LineEntry>, u32) {
    let mut line_map = Vec::with_capacity(source.len());
    let mut line = 1u32;
    let mut column = 0u32;

    for byte in source.bytes() {
        if byte == b'\n' {
            line += 1;
            column = 0;
            line_map.push(LineEntry {
                line,
                column,
                hit: false,
                miss: false,
            });
        } else {
            line_map.push(LineEntry {
                line,
                column,
                hit: false,
                miss: false,
            });
            column += 1;
        }
    }

    (line_map, line - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_map_counts_lines_and_columns() {
        let (map, lines) = make_line_map("ab\ncd\n");

        assert_eq!(map.len(), 6);
        assert_eq!(lines, 2);

        assert_eq!((map[0].line, map[0].column), (1, 0));
        assert_eq!((map[1].line, map[1].column), (1, 1));
        // The newline byte is accounted to the following line.
        assert_eq!((map[2].line, map[2].column), (2, 0));
        assert_eq!((map[3].line, map[3].column), (2, 0));
        assert_eq!((map[4].line, map[4].column), (2, 1));
        assert_eq!((map[5].line, map[5].column), (3, 0));
    }

    #[test]
    fn line_map_of_empty_source_is_empty() {
        let (map, lines) = make_line_map("");
        assert!(map.is_empty());
        assert_eq!(lines, 0);
    }

    #[test]
    fn jump_type_decoding() {
        assert_eq!(JumpType::from_letter("i"), JumpType::IntoFunction);
        assert_eq!(JumpType::from_letter("o"), JumpType::OutOfFunction);
        assert_eq!(JumpType::from_letter("-"), JumpType::Regular);
        assert_eq!(JumpType::from_letter(""), JumpType::None);
    }

    #[test]
    fn node_id_is_derived_from_span_and_file() {
        let entry = SourceMapEntry {
            start: 12,
            length: 7,
            file_id: 3,
            jump_type: JumpType::None,
            visited: false,
        };
        assert_eq!(entry.node_id(), "12:7:3");
    }
}
