//! Low-level type descriptors and the structural type registry.
//!
//! Every type declaration pushed through [`Assembler::push_type`] is keyed by
//! its [`LowType`]. Inner types are arena handles rather than SSA ids, so two
//! declarations of "array of 4 × i32" compare equal regardless of which id
//! the element type received. Struct layouts are never deduplicated.

use std::collections::HashMap;

use crate::arena::{Arena, Handle, UniqueArena};
use crate::assembler::Assembler;
use crate::error::IrError;
use crate::instruction::{Instruction, Ssa};
use crate::opcode::Opcode;

pub const MIN_INT_BITS: u32 = 8;
pub const MAX_INT_BITS: u32 = 64;
pub const MIN_FLOAT_BITS: u32 = 16;
pub const MAX_FLOAT_BITS: u32 = 64;
pub const MIN_VECTOR_LANES: u32 = 2;
pub const MAX_VECTOR_LANES: u32 = 4;

const BOOL_BITS: u32 = 8;
const POINTER_BITS: u32 = 64;

/// A structurally-keyed type descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LowType {
    Void,
    Float { width: u32 },
    Sint { width: u32 },
    Uint { width: u32 },
    Bool,
    Array { inner: Handle<LowType>, length: u32 },
    Vector { inner: Handle<LowType>, lanes: u32 },
    Matrix {
        inner: Handle<LowType>,
        columns: u32,
        rows: u32,
    },
    Pointer { inner: Handle<LowType> },
    Tuple { a: Handle<LowType>, b: Handle<LowType> },
    Struct(Handle<StructLayout>),
}

impl LowType {
    pub fn is_int(&self) -> bool {
        matches!(self, Self::Sint { .. } | Self::Uint { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float { .. })
    }

    /// Ints, floats and bools.
    pub fn is_scalar(&self) -> bool {
        self.is_int() || self.is_float() || matches!(self, Self::Bool)
    }

    /// Bit width of ints and floats.
    pub fn scalar_width(&self) -> Option<u32> {
        match *self {
            Self::Float { width } | Self::Sint { width } | Self::Uint { width } => Some(width),
            _ => None,
        }
    }
}

/// Member, conversion and method tables of one struct declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    members: Vec<(String, Ssa)>,
    conversions: HashMap<Ssa, Ssa>,
    methods: HashMap<String, Vec<Ssa>>,
}

impl StructLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a member; returns `false` if the name is already taken.
    pub fn add_member(&mut self, name: &str, ty: Ssa) -> bool {
        if self.members.iter().any(|(n, _)| n == name) {
            return false;
        }
        self.members.push((name.to_string(), ty));
        true
    }

    /// Index and type of the member called `name`.
    pub fn member(&self, name: &str) -> Option<(usize, Ssa)> {
        self.members
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| (i, self.members[i].1))
    }

    pub fn members(&self) -> &[(String, Ssa)] {
        &self.members
    }

    /// Registers `function` as the conversion from this struct to `target`.
    pub fn add_conversion(&mut self, target: Ssa, function: Ssa) {
        self.conversions.insert(target, function);
    }

    pub fn conversion(&self, target: Ssa) -> Option<Ssa> {
        self.conversions.get(&target).copied()
    }

    pub fn add_method(&mut self, name: &str, function: Ssa) {
        self.methods.entry(name.to_string()).or_default().push(function);
    }

    /// Overloads registered under `name`.
    pub fn methods(&self, name: &str) -> &[Ssa] {
        self.methods.get(name).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn renumber(&mut self, map: &impl Fn(Ssa) -> Ssa) {
        for (_, ty) in &mut self.members {
            *ty = map(*ty);
        }
        self.conversions = self
            .conversions
            .drain()
            .map(|(target, func)| (map(target), map(func)))
            .filter(|(target, func)| !target.is_void() && !func.is_void())
            .collect();
        for funcs in self.methods.values_mut() {
            funcs.retain_mut(|f| {
                *f = map(*f);
                !f.is_void()
            });
        }
    }
}

/// Interned type descriptors and the id each one was declared with.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    pub(crate) low: UniqueArena<LowType>,
    pub(crate) structs: Arena<StructLayout>,
    pub(crate) by_low: HashMap<Handle<LowType>, Ssa>,
    pub(crate) by_ssa: HashMap<Ssa, Handle<LowType>>,
}

impl TypeRegistry {
    pub fn len(&self) -> usize {
        self.by_ssa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ssa.is_empty()
    }

    fn get(&self, ssa: Ssa) -> Option<&LowType> {
        self.by_ssa.get(&ssa).map(|&h| &self.low[h])
    }

    fn width_of(&self, handle: Handle<LowType>, depth: usize) -> u32 {
        if depth > 64 {
            return 0;
        }
        match self.low[handle] {
            LowType::Void => 0,
            LowType::Float { width } | LowType::Sint { width } | LowType::Uint { width } => width,
            LowType::Bool => BOOL_BITS,
            LowType::Pointer { .. } => POINTER_BITS,
            LowType::Array { inner, length } => length.saturating_mul(self.width_of(inner, depth + 1)),
            LowType::Vector { inner, lanes } => lanes.saturating_mul(self.width_of(inner, depth + 1)),
            LowType::Matrix {
                inner,
                columns,
                rows,
            } => columns
                .saturating_mul(rows)
                .saturating_mul(self.width_of(inner, depth + 1)),
            LowType::Tuple { a, b } => self
                .width_of(a, depth + 1)
                .saturating_add(self.width_of(b, depth + 1)),
            LowType::Struct(layout) => self.structs[layout]
                .members
                .iter()
                .filter_map(|(_, ty)| self.by_ssa.get(ty))
                .fold(0u32, |acc, &h| acc.saturating_add(self.width_of(h, depth + 1))),
        }
    }

    fn align_of(&self, handle: Handle<LowType>, depth: usize) -> u32 {
        if depth > 64 {
            return 0;
        }
        match self.low[handle] {
            LowType::Array { inner, .. }
            | LowType::Vector { inner, .. }
            | LowType::Matrix { inner, .. } => self.align_of(inner, depth + 1),
            LowType::Tuple { a, b } => self.align_of(a, depth + 1).max(self.align_of(b, depth + 1)),
            LowType::Struct(layout) => self.structs[layout]
                .members
                .iter()
                .filter_map(|(_, ty)| self.by_ssa.get(ty))
                .map(|&h| self.align_of(h, depth + 1))
                .max()
                .unwrap_or(0),
            _ => self.width_of(handle, depth),
        }
    }

    pub(crate) fn renumber(&mut self, map: &impl Fn(Ssa) -> Ssa) {
        self.by_ssa = self
            .by_ssa
            .drain()
            .map(|(ssa, h)| (map(ssa), h))
            .filter(|(ssa, _)| !ssa.is_void())
            .collect();
        self.by_low = self
            .by_low
            .drain()
            .map(|(h, ssa)| (h, map(ssa)))
            .filter(|(_, ssa)| !ssa.is_void())
            .collect();
        for (_, layout) in self.structs.iter_mut() {
            layout.renumber(map);
        }
    }
}

fn check_width(kind: &'static str, width: u32, min: u32, max: u32) -> Result<(), IrError> {
    if width.is_power_of_two() && (min..=max).contains(&width) {
        Ok(())
    } else {
        Err(IrError::InvalidWidth { kind, width })
    }
}

impl Assembler {
    fn inner_handle(&self, ty: Ssa) -> Result<Handle<LowType>, IrError> {
        self.types
            .by_ssa
            .get(&ty)
            .copied()
            .ok_or(IrError::NotAType(ty))
    }

    /// Builds the descriptor for a type declaration.
    fn describe(&self, inst: &Instruction) -> Result<LowType, IrError> {
        let [op0, op1, _] = inst.operands;
        Ok(match inst.opcode {
            Opcode::TypeVoid => LowType::Void,
            Opcode::TypeBool => LowType::Bool,
            Opcode::TypeFloat => {
                check_width("float", op0, MIN_FLOAT_BITS, MAX_FLOAT_BITS)?;
                LowType::Float { width: op0 }
            }
            Opcode::TypeIntSign => {
                check_width("int", op0, MIN_INT_BITS, MAX_INT_BITS)?;
                LowType::Sint { width: op0 }
            }
            Opcode::TypeIntUnsign => {
                check_width("int", op0, MIN_INT_BITS, MAX_INT_BITS)?;
                LowType::Uint { width: op0 }
            }
            Opcode::TypeArray => {
                if op0 == 0 {
                    return Err(IrError::InvalidLength {
                        kind: "array",
                        length: op0,
                    });
                }
                LowType::Array {
                    inner: self.inner_handle(inst.refs[0])?,
                    length: op0,
                }
            }
            Opcode::TypeVector => {
                if !(MIN_VECTOR_LANES..=MAX_VECTOR_LANES).contains(&op0) {
                    return Err(IrError::InvalidLength {
                        kind: "vector",
                        length: op0,
                    });
                }
                LowType::Vector {
                    inner: self.inner_handle(inst.refs[0])?,
                    lanes: op0,
                }
            }
            Opcode::TypeMatrix => {
                for dim in [op0, op1] {
                    if !(MIN_VECTOR_LANES..=MAX_VECTOR_LANES).contains(&dim) {
                        return Err(IrError::InvalidLength {
                            kind: "matrix",
                            length: dim,
                        });
                    }
                }
                LowType::Matrix {
                    inner: self.inner_handle(inst.refs[0])?,
                    columns: op0,
                    rows: op1,
                }
            }
            Opcode::TypePtr => LowType::Pointer {
                inner: self.inner_handle(inst.refs[0])?,
            },
            Opcode::TypeTuple => LowType::Tuple {
                a: self.inner_handle(inst.refs[0])?,
                b: self.inner_handle(inst.refs[1])?,
            },
            opcode => return Err(IrError::NotATypeOpcode { opcode }),
        })
    }

    /// Pushes a type declaration, or returns the id of an identical one.
    ///
    /// Struct declarations go through [`Assembler::push_struct`] instead.
    pub fn push_type(&mut self, inst: Instruction) -> Result<Ssa, IrError> {
        let low = self.describe(&inst)?;
        let cached = self
            .types
            .low
            .get_handle(&low)
            .and_then(|h| self.types.by_low.get(&h).copied());
        if let Some(existing) = cached {
            log::trace!("type cache hit: {low:?} is {existing}");
            return Ok(existing);
        }
        let id = if inst.id.is_void() {
            self.create_ssa(inst.opcode)
        } else {
            inst.id
        };
        self.push(inst.with_id(id));
        let h = self.types.low.insert(low);
        self.types.by_low.insert(h, id);
        self.types.by_ssa.insert(id, h);
        Ok(id)
    }

    /// Pushes a type declaration without deduplicating it.
    ///
    /// Used when rebuilding a stream whose ids must be kept verbatim.
    pub(crate) fn push_type_exact(&mut self, inst: Instruction) -> Result<Ssa, IrError> {
        let low = self.describe(&inst)?;
        let id = self.push(inst);
        let (h, _) = self.types.low.insert_full(low);
        self.types.by_low.entry(h).or_insert(id);
        self.types.by_ssa.insert(id, h);
        Ok(id)
    }

    pub fn type_void(&mut self) -> Result<Ssa, IrError> {
        self.push_type(Instruction::new(Opcode::TypeVoid))
    }

    pub fn type_bool(&mut self) -> Result<Ssa, IrError> {
        self.push_type(Instruction::new(Opcode::TypeBool))
    }

    pub fn type_float(&mut self, width: u32) -> Result<Ssa, IrError> {
        self.push_type(Instruction::new(Opcode::TypeFloat).with_operands([width, 0, 0]))
    }

    pub fn type_int(&mut self, signed: bool, width: u32) -> Result<Ssa, IrError> {
        let opcode = if signed {
            Opcode::TypeIntSign
        } else {
            Opcode::TypeIntUnsign
        };
        self.push_type(Instruction::new(opcode).with_operands([width, 0, 0]))
    }

    pub fn type_array(&mut self, inner: Ssa, length: u32) -> Result<Ssa, IrError> {
        self.push_type(
            Instruction::new(Opcode::TypeArray)
                .with_operands([length, 0, 0])
                .with_refs([inner, Ssa::VOID, Ssa::VOID]),
        )
    }

    pub fn type_vector(&mut self, inner: Ssa, lanes: u32) -> Result<Ssa, IrError> {
        self.push_type(
            Instruction::new(Opcode::TypeVector)
                .with_operands([lanes, 0, 0])
                .with_refs([inner, Ssa::VOID, Ssa::VOID]),
        )
    }

    pub fn type_matrix(&mut self, inner: Ssa, columns: u32, rows: u32) -> Result<Ssa, IrError> {
        self.push_type(
            Instruction::new(Opcode::TypeMatrix)
                .with_operands([columns, rows, 0])
                .with_refs([inner, Ssa::VOID, Ssa::VOID]),
        )
    }

    pub fn type_ptr(&mut self, inner: Ssa) -> Result<Ssa, IrError> {
        self.push_type(Instruction::new(Opcode::TypePtr).with_refs([inner, Ssa::VOID, Ssa::VOID]))
    }

    pub fn type_tuple(&mut self, a: Ssa, b: Ssa) -> Result<Ssa, IrError> {
        self.push_type(Instruction::new(Opcode::TypeTuple).with_refs([a, b, Ssa::VOID]))
    }

    /// Declares a struct: `TYPE_STRUCT`, one `STRUCT_MEMBER` each, `STRUCT_END`.
    ///
    /// Duplicate member names are reported and dropped; members whose type
    /// is not a declared type are reported and dropped too.
    pub fn push_struct(&mut self, name: &str, members: &[(&str, Ssa)]) -> Result<Ssa, IrError> {
        let mut layout = StructLayout::new(name);
        for &(member, ty) in members {
            if !self.types.by_ssa.contains_key(&ty) {
                self.report(IrError::NotAType(ty));
            } else if !layout.add_member(member, ty) {
                self.report(IrError::DuplicateMember {
                    structure: name.to_string(),
                    member: member.to_string(),
                });
            }
        }

        let name_index = self.add_string(name);
        let id = self.create_ssa(Opcode::TypeStruct);
        self.begin_section(
            Instruction::new(Opcode::TypeStruct)
                .with_id(id)
                .with_operands([layout.members.len() as u32, name_index, 0]),
        )?;
        for (index, (member, ty)) in layout.members.iter().enumerate() {
            let member_name = self.add_string(member);
            self.push(
                Instruction::new(Opcode::StructMember)
                    .with_operands([index as u32, member_name, 0])
                    .with_refs([*ty, Ssa::VOID, Ssa::VOID]),
            );
        }
        self.end_section(Instruction::new(Opcode::StructEnd).with_refs([id, Ssa::VOID, Ssa::VOID]))?;

        self.register_struct(id, layout);
        self.set_debug_name(id, name);
        Ok(id)
    }

    pub(crate) fn register_struct(&mut self, id: Ssa, layout: StructLayout) {
        let layout = self.types.structs.append(layout);
        let h = self.types.low.insert(LowType::Struct(layout));
        self.types.by_low.insert(h, id);
        self.types.by_ssa.insert(id, h);
    }

    /// Descriptor of the type declared as `ty`.
    pub fn low_type(&self, ty: Ssa) -> Option<&LowType> {
        self.types.get(ty)
    }

    /// Descriptor of a type nested in another descriptor.
    pub fn resolve(&self, handle: Handle<LowType>) -> &LowType {
        &self.types.low[handle]
    }

    /// Id under which the descriptor `handle` was declared.
    pub fn type_id(&self, handle: Handle<LowType>) -> Option<Ssa> {
        self.types.by_low.get(&handle).copied()
    }

    pub fn struct_layout(&self, ty: Ssa) -> Option<&StructLayout> {
        match self.low_type(ty)? {
            LowType::Struct(layout) => self.types.structs.try_get(*layout),
            _ => None,
        }
    }

    pub fn struct_layout_mut(&mut self, ty: Ssa) -> Result<&mut StructLayout, IrError> {
        let layout = match self.low_type(ty) {
            Some(LowType::Struct(layout)) => *layout,
            _ => return Err(IrError::NotAStruct(ty)),
        };
        self.types
            .structs
            .try_get_mut(layout)
            .ok_or(IrError::NotAStruct(ty))
    }

    /// Size of `ty` in bits.
    pub fn bit_width(&self, ty: Ssa) -> Option<u32> {
        let h = *self.types.by_ssa.get(&ty)?;
        Some(self.types.width_of(h, 0))
    }

    /// Alignment of `ty` in bits.
    pub fn bit_align(&self, ty: Ssa) -> Option<u32> {
        let h = *self.types.by_ssa.get(&ty)?;
        Some(self.types.align_of(h, 0))
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.types
    }
}
