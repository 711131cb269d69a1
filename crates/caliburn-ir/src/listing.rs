//! Reader for the text listing written by [`dump_assembler`](crate::dump_assembler).
//!
//! ```text
//! @next %4
//! @string "main"
//! @name %2 "main"
//! %1 = TYPE_INT_SIGN [32, 0, 0] (%0, %0, %0) : %0 ; i32
//! %2 = FUNCTION [0, 0, 0] (%1, %0, %0) : %0
//! %0 = FUNCTION_END [0, 0, 0] (%2, %0, %0) : %0
//! ```

use crate::assembler::{Assembler, IoDirection};
use crate::error::IrError;
use crate::instruction::{Instruction, SourceLocation, Ssa};
use crate::low_type::StructLayout;
use crate::opcode::Opcode;

/// Ids beyond `lines * ID_SLACK + ID_BASE` are rejected instead of allocated.
const ID_SLACK: usize = 4;
const ID_BASE: usize = 1024;

struct Cursor<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { rest: text, line }
    }

    fn error(&self, message: impl Into<String>) -> IrError {
        IrError::Listing {
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), IrError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`")))
        }
    }

    fn word(&mut self) -> &'a str {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest.len());
        let (word, rest) = self.rest.split_at(end);
        self.rest = rest;
        word
    }

    fn number(&mut self) -> Result<u32, IrError> {
        let word = self.word();
        word.parse()
            .map_err(|_| self.error(format!("expected a number, found `{word}`")))
    }

    fn ssa(&mut self) -> Result<Ssa, IrError> {
        self.expect('%')?;
        self.number().map(Ssa)
    }

    fn quoted(&mut self) -> Result<String, IrError> {
        self.expect('"')?;
        let mut out = String::new();
        let mut chars = self.rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &self.rest[i + 1..];
                    return Ok(out);
                }
                '\\' => {
                    let escaped = match chars.next().map(|(_, e)| e) {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('u') => {
                            let mut hex = String::new();
                            if chars.next().map(|(_, c)| c) != Some('{') {
                                return Err(self.error("malformed unicode escape"));
                            }
                            for (_, h) in chars.by_ref() {
                                if h == '}' {
                                    break;
                                }
                                hex.push(h);
                            }
                            u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("malformed unicode escape"))?
                        }
                        _ => return Err(self.error("unknown escape")),
                    };
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn triple<T>(
        &mut self,
        open: char,
        close: char,
        mut item: impl FnMut(&mut Self) -> Result<T, IrError>,
    ) -> Result<[T; 3], IrError> {
        self.expect(open)?;
        let a = item(self)?;
        self.expect(',')?;
        let b = item(self)?;
        self.expect(',')?;
        let c = item(self)?;
        self.expect(close)?;
        Ok([a, b, c])
    }

    fn finish(&mut self) -> Result<(), IrError> {
        self.skip_ws();
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.error(format!("unexpected `{}`", self.rest)))
        }
    }
}

fn parse_instruction(cursor: &mut Cursor<'_>) -> Result<Instruction, IrError> {
    let id = cursor.ssa()?;
    cursor.expect('=')?;
    let name = cursor.word();
    let opcode = Opcode::from_name(name).ok_or_else(|| cursor.error(format!("unknown opcode `{name}`")))?;
    let operands = cursor.triple('[', ']', Cursor::number)?;
    let refs = cursor.triple('(', ')', Cursor::ssa)?;
    cursor.expect(':')?;
    let result_type = cursor.ssa()?;
    let mut inst = Instruction::new(opcode)
        .with_id(id)
        .with_operands(operands)
        .with_refs(refs)
        .with_result_type(result_type);
    if cursor.eat('!') {
        let line = cursor.number()?;
        cursor.expect(':')?;
        let column = cursor.number()?;
        inst = inst.at(SourceLocation::new(line, column));
    }
    cursor.finish()?;
    Ok(inst)
}

struct Parsed {
    next: usize,
    strings: Vec<String>,
    names: Vec<(Ssa, String)>,
    code: Vec<(usize, Instruction)>,
}

fn parse_lines(text: &str) -> Result<Parsed, IrError> {
    let mut parsed = Parsed {
        next: 1,
        strings: Vec::new(),
        names: Vec::new(),
        code: Vec::new(),
    };
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        if let Some(directive) = trimmed.strip_prefix('@') {
            let mut cursor = Cursor::new(directive, line);
            match cursor.word() {
                "next" => parsed.next = cursor.ssa()?.index(),
                "string" => parsed.strings.push(cursor.quoted()?),
                "name" => {
                    let ssa = cursor.ssa()?;
                    parsed.names.push((ssa, cursor.quoted()?));
                }
                other => return Err(cursor.error(format!("unknown directive `@{other}`"))),
            }
            cursor.finish()?;
            continue;
        }
        let body = trimmed.split(';').next().unwrap_or_default();
        let mut cursor = Cursor::new(body, line);
        parsed.code.push((line, parse_instruction(&mut cursor)?));
    }
    Ok(parsed)
}

fn at_line(line: usize) -> impl Fn(IrError) -> IrError {
    move |err| match err {
        IrError::Listing { .. } => err,
        other => IrError::Listing {
            line,
            message: other.to_string(),
        },
    }
}

/// Rebuilds an assembler from a listing, keeping every id as written.
///
/// Bookkeeping problems in the listing (opcode mismatches, unknown ids,
/// unclosed sections) are recorded in the assembler's error collector;
/// malformed text, section mismatches and invalid type declarations are
/// returned as errors.
pub fn parse_listing(text: &str) -> Result<Assembler, IrError> {
    let parsed = parse_lines(text)?;

    let referenced_max = parsed
        .code
        .iter()
        .flat_map(|(_, inst)| std::iter::once(inst.id).chain(inst.referenced()))
        .chain(parsed.names.iter().map(|(ssa, _)| *ssa))
        .map(Ssa::index)
        .max()
        .unwrap_or(0);
    let bound = parsed.next.max(referenced_max + 1);
    let limit = parsed.code.len() * ID_SLACK + ID_BASE;
    if bound > limit {
        return Err(IrError::Listing {
            line: 0,
            message: format!("id bound {bound} is out of proportion to the listing"),
        });
    }

    let mut opcodes = vec![Opcode::Unknown; bound];
    for (_, inst) in &parsed.code {
        let slot = &mut opcodes[inst.id.index()];
        if !inst.id.is_void() && *slot == Opcode::Unknown {
            *slot = inst.opcode;
        }
    }

    let mut asm = Assembler::new();
    for &opcode in opcodes.iter().skip(1) {
        asm.create_ssa(opcode);
    }
    for s in &parsed.strings {
        asm.add_string(s);
    }

    let mut open_struct: Option<(Ssa, StructLayout)> = None;
    for &(line, inst) in &parsed.code {
        let err = at_line(line);
        match inst.opcode {
            Opcode::TypeStruct => {
                asm.begin_section(inst).map_err(&err)?;
                let name = asm.string(inst.operands[1]).unwrap_or_default().to_string();
                open_struct = Some((inst.id, StructLayout::new(name)));
            }
            Opcode::StructMember => {
                if let Some((_, layout)) = open_struct.as_mut() {
                    let name = asm.string(inst.operands[1]).unwrap_or_default().to_string();
                    layout.add_member(&name, inst.refs[0]);
                }
                asm.push(inst);
            }
            Opcode::StructEnd => {
                asm.end_section(inst).map_err(&err)?;
                if let Some((id, layout)) = open_struct.take() {
                    asm.register_struct(id, layout);
                }
            }
            op if op.is_type() => {
                asm.push_type_exact(inst).map_err(&err)?;
            }
            op if op.opens_section().is_some() => {
                asm.begin_section(inst).map_err(&err)?;
            }
            op if op.closes_section().is_some() => {
                asm.end_section(inst).map_err(&err)?;
            }
            _ => {
                asm.push(inst);
            }
        }
    }

    for (ssa, name) in parsed.names {
        asm.set_debug_name(ssa, name);
    }
    for &(_, inst) in &parsed.code {
        let direction = match inst.opcode {
            Opcode::VarShaderIn => IoDirection::Input,
            Opcode::VarShaderOut => IoDirection::Output,
            _ => continue,
        };
        let name = asm
            .debug_name(inst.id)
            .map_or_else(|| format!("io{}", inst.id.get()), str::to_string);
        asm.register_io(&name, direction, inst.id, inst.refs[0], inst.operands[0]);
    }
    asm.finish();
    log::debug!("parsed listing: {} instructions, {} ids", asm.len(), bound);
    Ok(asm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_assembler;

    const ADD_ONE: &str = "\
@next %7
@string \"add_one\"
@name %2 \"add_one\"
%1 = TYPE_INT_SIGN [32, 0, 0] (%0, %0, %0) : %0
%2 = FUNCTION [1, 0, 0] (%1, %0, %0) : %0
%3 = VAR_FUNC_ARG [0, 0, 0] (%1, %0, %0) : %0
%4 = VALUE_LIT_INT [1, 0, 0] (%0, %0, %0) : %1
%5 = VALUE_READ_VAR [0, 0, 0] (%3, %0, %0) : %1
%6 = VALUE_EXPR [1, 0, 0] (%5, %4, %0) : %1 !3:12
%0 = RETURN_VALUE [0, 0, 0] (%6, %0, %0) : %0
%0 = FUNCTION_END [0, 0, 0] (%2, %0, %0) : %0
";

    #[test]
    fn parses_a_function() {
        let asm = parse_listing(ADD_ONE).unwrap();
        assert!(asm.errors().is_empty(), "{:?}", asm.errors());
        assert_eq!(asm.len(), 8);
        assert_eq!(asm.next_ssa(), Ssa(7));
        assert_eq!(asm.ref_count(Ssa(1)), 5);
        assert_eq!(asm.debug_name(Ssa(2)), Some("add_one"));
        assert_eq!(asm.closed_sections().len(), 1);
        assert_eq!(
            asm.code_for(Ssa(6)).and_then(|i| i.location),
            Some(SourceLocation::new(3, 12))
        );
        assert!(asm.low_type(Ssa(1)).is_some());
    }

    #[test]
    fn dump_and_parse_agree() {
        let asm = parse_listing(ADD_ONE).unwrap();
        let again = parse_listing(&dump_assembler(&asm)).unwrap();
        let a: Vec<_> = asm.instructions().copied().collect();
        let b: Vec<_> = again.instructions().copied().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn structs_rebuild_their_layout() {
        let mut asm = Assembler::new();
        let f32_ = asm.type_float(32).unwrap();
        let s = asm.push_struct("Light", &[("range", f32_), ("power", f32_)]).unwrap();
        let parsed = parse_listing(&dump_assembler(&asm)).unwrap();
        let layout = parsed.struct_layout(s).unwrap();
        assert_eq!(layout.name, "Light");
        assert_eq!(layout.member("power"), Some((1, f32_)));
    }

    #[test]
    fn reports_the_failing_line() {
        let err = parse_listing("@next %2\n%1 = LABEL [0, 0] (%0, %0, %0) : %0\n").unwrap_err();
        assert!(matches!(err, IrError::Listing { line: 2, .. }), "{err}");
        let err = parse_listing("%1 = BOGUS [0, 0, 0] (%0, %0, %0) : %0").unwrap_err();
        assert!(err.to_string().contains("unknown opcode `BOGUS`"));
    }

    #[test]
    fn rejects_mismatched_sections() {
        let err = parse_listing("%0 = FUNCTION_END [0, 0, 0] (%0, %0, %0) : %0").unwrap_err();
        assert!(matches!(err, IrError::Listing { line: 1, .. }));
    }

    #[test]
    fn rejects_absurd_ids() {
        assert!(parse_listing("%4000000000 = LABEL [0, 0, 0] (%0, %0, %0) : %0").is_err());
        assert!(parse_listing("@next %99999999").is_err());
    }

    #[test]
    fn string_escapes() {
        let asm = parse_listing("@string \"a\\\"b\\n\\u{41}\"").unwrap();
        assert_eq!(asm.string(0), Some("a\"b\nA"));
    }
}
