//! Parsing and indexing of SPIR-V modules.
//!
//! [`Spirv`] holds the decoded instruction stream of one module along with the
//! indexes the engines query it through: a per-id table of defining
//! instruction, debug names and decorations, grouped iterators over the
//! module-level sections, and the body range of each function.
//!
//! Parsing here is *not* validation. A module that decodes is not necessarily
//! a legal module; the engines assume the input already passed spirv-val and
//! only reject streams they cannot index at all.

use crate::spirv::instruction::{decode_instruction, Decoration, Instruction};
use foldhash::HashMap;
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    ops::Range,
};

pub mod instruction;
pub mod specialization;

const MAGIC_NUMBER: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;

/// An id that refers to an instruction result within a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u32);

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "%{}", self.0)
    }
}

/// A parsed and indexed SPIR-V module.
#[derive(Clone, Debug)]
pub struct Spirv {
    version: (u8, u8),
    bound: u32,
    words: Vec<u32>,
    instructions: Vec<Instruction>,

    ids: HashMap<Id, IdInfo>,
    functions: HashMap<Id, FunctionInfo>,

    capabilities: Vec<usize>,
    extensions: Vec<usize>,
    entry_points: Vec<usize>,
    execution_modes: Vec<usize>,
    decorations: Vec<usize>,
    globals: Vec<usize>,
}

impl Spirv {
    /// Decodes a module from a byte stream, converting from the opposite
    /// endianness if the magic number indicates it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpirvError> {
        if bytes.len() % 4 != 0 || bytes.len() < HEADER_WORDS * 4 {
            return Err(SpirvError::InvalidLength);
        }

        let mut words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        if words[0] == MAGIC_NUMBER.swap_bytes() {
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }

        Self::new(words)
    }

    /// Decodes and indexes a module from its word stream.
    pub fn new(words: Vec<u32>) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::InvalidLength);
        }

        if words[0] != MAGIC_NUMBER {
            return Err(SpirvError::InvalidMagic { word: words[0] });
        }

        let version = (
            ((words[1] >> 16) & 0xff) as u8,
            ((words[1] >> 8) & 0xff) as u8,
        );
        let bound = words[3];

        let mut instructions = Vec::new();
        let mut pos = HEADER_WORDS;

        while pos < words.len() {
            let word_count = (words[pos] >> 16) as usize;
            let opcode = (words[pos] & 0xffff) as u16;

            if word_count == 0 || pos + word_count > words.len() {
                return Err(SpirvError::InvalidLength);
            }

            let operands = &words[pos + 1..pos + word_count];
            instructions.push(decode_instruction(opcode, operands)?);
            pos += word_count;
        }

        let mut spirv = Spirv {
            version,
            bound,
            words,
            instructions,
            ids: HashMap::default(),
            functions: HashMap::default(),
            capabilities: Vec::new(),
            extensions: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            decorations: Vec::new(),
            globals: Vec::new(),
        };
        spirv.build_indexes()?;

        Ok(spirv)
    }

    fn build_indexes(&mut self) -> Result<(), SpirvError> {
        let mut current_function: Option<(Id, usize)> = None;
        let instructions = std::mem::take(&mut self.instructions);

        for (index, instruction) in instructions.iter().enumerate() {
            if let Some(result_id) = instruction.result_id() {
                if result_id.0 == 0 || result_id.0 >= self.bound {
                    return Err(SpirvError::IdOutOfBounds {
                        id: result_id,
                        bound: self.bound,
                    });
                }

                let info = self.ids.entry(result_id).or_default();

                if info.index.is_some() {
                    return Err(SpirvError::DuplicateId { id: result_id });
                }

                info.index = Some(index);
            }

            match *instruction {
                Instruction::Capability { .. } => self.capabilities.push(index),
                Instruction::Extension { .. } => self.extensions.push(index),
                Instruction::EntryPoint { .. } => self.entry_points.push(index),
                Instruction::ExecutionMode { entry_point, .. }
                | Instruction::ExecutionModeId { entry_point, .. } => {
                    self.execution_modes.push(index);
                    self.functions
                        .entry(entry_point)
                        .or_default()
                        .execution_modes
                        .push(index);
                }
                Instruction::Name {
                    target,
                    name: ref new_name,
                } => {
                    self.ids
                        .entry(target)
                        .or_default()
                        .names
                        .push(new_name.clone());
                }
                Instruction::MemberName {
                    target,
                    member,
                    name: ref new_name,
                } => {
                    let info = self.ids.entry(target).or_default();
                    info.member_mut(member)
                        .name
                        .get_or_insert_with(|| new_name.clone());
                }
                Instruction::Decorate { target, decoration } => {
                    self.decorations.push(index);
                    self.ids
                        .entry(target)
                        .or_default()
                        .decorations
                        .push(decoration);
                }
                Instruction::MemberDecorate {
                    structure_type,
                    member,
                    decoration,
                } => {
                    self.decorations.push(index);
                    let info = self.ids.entry(structure_type).or_default();
                    info.member_mut(member).decorations.push(decoration);
                }
                Instruction::Function { result_id, .. } => {
                    current_function = Some((result_id, index));
                }
                Instruction::FunctionEnd => {
                    if let Some((function_id, start)) = current_function.take() {
                        self.functions.entry(function_id).or_default().body = start..index + 1;
                    }
                }
                _ => {
                    if current_function.is_none() && instruction.result_id().is_some() {
                        // Module scope: types, constants and global variables.
                        self.globals.push(index);
                    }
                }
            }
        }

        self.instructions = instructions;

        Ok(())
    }

    /// Returns the version of the module, as `(major, minor)`.
    #[inline]
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Returns the id bound declared in the header.
    #[inline]
    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// Returns the raw word stream the module was decoded from.
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Returns every decoded instruction in module order.
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the instruction that defines `id`, if `id` defines anything.
    #[inline]
    pub fn def(&self, id: Id) -> Option<&Instruction> {
        self.ids
            .get(&id)
            .and_then(|info| info.index)
            .map(|index| &self.instructions[index])
    }

    /// Returns the names and decorations attached to `id`.
    #[inline]
    pub fn id_info(&self, id: Id) -> Option<&IdInfo> {
        self.ids.get(&id)
    }

    /// Returns the decorations attached to `id`, or an empty slice.
    #[inline]
    pub fn decorations(&self, id: Id) -> &[Decoration] {
        self.ids.get(&id).map_or(&[][..], |info| &info.decorations)
    }

    /// Returns the decorations attached to member `member` of struct `id`.
    #[inline]
    pub fn member_decorations(&self, id: Id, member: u32) -> &[Decoration] {
        self.ids
            .get(&id)
            .and_then(|info| info.members.get(member as usize))
            .map_or(&[][..], |member| &member.decorations)
    }

    /// Returns the first debug name attached to `id`, if any.
    #[inline]
    pub fn name(&self, id: Id) -> Option<&str> {
        self.ids
            .get(&id)
            .and_then(|info| info.names.first())
            .map(String::as_str)
    }

    /// Returns the body and execution modes of the function defined by `id`.
    #[inline]
    pub fn function(&self, id: Id) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    /// Returns the instructions of a function's body, `OpFunction` through
    /// `OpFunctionEnd`.
    #[inline]
    pub fn function_body(&self, function: &FunctionInfo) -> &[Instruction] {
        &self.instructions[function.body.clone()]
    }

    /// Returns the execution-mode instructions that target a function.
    pub fn function_execution_modes<'a>(
        &'a self,
        function: &'a FunctionInfo,
    ) -> impl Iterator<Item = &'a Instruction> {
        function
            .execution_modes
            .iter()
            .map(move |&index| &self.instructions[index])
    }

    fn iter_group<'a>(&'a self, group: &'a [usize]) -> impl Iterator<Item = &'a Instruction> {
        group.iter().map(move |&index| &self.instructions[index])
    }

    /// Iterates over all `OpCapability` instructions.
    pub fn iter_capability(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.capabilities)
    }

    /// Iterates over all `OpExtension` instructions.
    pub fn iter_extension(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.extensions)
    }

    /// Iterates over all `OpEntryPoint` instructions.
    pub fn iter_entry_point(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.entry_points)
    }

    /// Iterates over all `OpExecutionMode` and `OpExecutionModeId` instructions.
    pub fn iter_execution_mode(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.execution_modes)
    }

    /// Iterates over all `OpDecorate` and `OpMemberDecorate` instructions.
    pub fn iter_decoration(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.decorations)
    }

    /// Iterates over the module-scope types, constants and variables.
    pub fn iter_global(&self) -> impl Iterator<Item = &Instruction> {
        self.iter_group(&self.globals)
    }
}

/// The names and decorations attached to a single id.
#[derive(Clone, Debug, Default)]
pub struct IdInfo {
    index: Option<usize>,
    names: Vec<String>,
    decorations: Vec<Decoration>,
    members: Vec<StructMemberInfo>,
}

impl IdInfo {
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    #[inline]
    pub fn members(&self) -> &[StructMemberInfo] {
        &self.members
    }

    fn member_mut(&mut self, member: u32) -> &mut StructMemberInfo {
        let member = member as usize;

        if self.members.len() <= member {
            self.members.resize_with(member + 1, Default::default);
        }

        &mut self.members[member]
    }
}

/// The name and decorations attached to one member of a struct type.
#[derive(Clone, Debug, Default)]
pub struct StructMemberInfo {
    pub name: Option<String>,
    pub decorations: Vec<Decoration>,
}

/// The body range and execution modes of one function.
#[derive(Clone, Debug, Default)]
pub struct FunctionInfo {
    body: Range<usize>,
    execution_modes: Vec<usize>,
}

/// An error that can happen when decoding a SPIR-V module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpirvError {
    DuplicateId {
        id: Id,
    },
    IdOutOfBounds {
        id: Id,
        bound: u32,
    },
    IncompleteInstruction,
    InvalidLength,
    InvalidMagic {
        word: u32,
    },
    InvalidString,
    UnknownEnumerant {
        enumerant: &'static str,
        value: u32,
    },
}

impl Display for SpirvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            SpirvError::DuplicateId { id } => write!(f, "id {} is assigned more than once", id),
            SpirvError::IdOutOfBounds { id, bound } => {
                write!(f, "id {} is not below the declared bound of {}", id, bound)
            }
            SpirvError::IncompleteInstruction => {
                write!(f, "an instruction ends before all of its operands")
            }
            SpirvError::InvalidLength => {
                write!(f, "the length of the data does not form a module")
            }
            SpirvError::InvalidMagic { word } => {
                write!(f, "the first word {:#010x} is not the magic number", word)
            }
            SpirvError::InvalidString => write!(f, "a string operand is not valid UTF-8"),
            SpirvError::UnknownEnumerant { enumerant, value } => {
                write!(f, "the {} enumerant {} is not known", enumerant, value)
            }
        }
    }
}

impl Error for SpirvError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spirv::instruction::{Capability, ExecutionModel};
    use crate::tests::ModuleBuilder;

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            Spirv::new(vec![0xdead_beef, 0, 0, 10, 0]),
            Err(SpirvError::InvalidMagic { .. }),
        ));
    }

    #[test]
    fn from_bytes_handles_both_endiannesses() {
        let words = ModuleBuilder::new().finish();

        let le: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let be: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();

        let from_le = Spirv::from_bytes(&le).unwrap();
        let from_be = Spirv::from_bytes(&be).unwrap();
        assert_eq!(from_le.words(), from_be.words());
    }

    #[test]
    fn rejects_truncated_instruction() {
        let mut words = ModuleBuilder::new().finish();
        // Claim a 4-word instruction with only its opcode word present.
        words.push((4 << 16) | 17);

        assert!(matches!(Spirv::new(words), Err(SpirvError::InvalidLength)));
    }

    #[test]
    fn rejects_duplicate_result_id() {
        let mut builder = ModuleBuilder::new();
        let id = builder.type_void();
        builder.op(19, &[id.0]); // second OpTypeVoid with the same result id

        assert!(matches!(
            Spirv::new(builder.finish()),
            Err(SpirvError::DuplicateId { .. }),
        ));
    }

    #[test]
    fn indexes_entry_point_and_capabilities() {
        let mut builder = ModuleBuilder::new();
        builder.capability(Capability::Shader);
        let (main, _) = builder.compute_entry_point("main", [4, 4, 1]);

        let spirv = Spirv::new(builder.finish()).unwrap();

        assert_eq!(spirv.iter_capability().count(), 1);
        assert!(spirv.iter_entry_point().any(|instruction| matches!(
            *instruction,
            Instruction::EntryPoint {
                execution_model: ExecutionModel::GLCompute,
                entry_point,
                ..
            } if entry_point == main
        )));

        let function = spirv.function(main).unwrap();
        assert!(spirv.function_execution_modes(function).next().is_some());
        assert!(!spirv.function_body(function).is_empty());
    }

    #[test]
    fn execution_modes_decode_at_their_encoded_values() {
        use crate::spirv::instruction::ExecutionMode;

        let mut builder = ModuleBuilder::new();
        let (main, _) = builder.compute_entry_point("main", [8, 4, 2]);
        builder.op(16, &[main.0, 12]); // OpExecutionMode DepthReplacing

        let spirv = Spirv::new(builder.finish()).unwrap();
        let modes: Vec<_> = spirv
            .iter_execution_mode()
            .filter_map(|instruction| match *instruction {
                Instruction::ExecutionMode { mode, .. } => Some(mode),
                _ => None,
            })
            .collect();

        assert!(modes.contains(&ExecutionMode::LocalSize {
            x_size: 8,
            y_size: 4,
            z_size: 2,
        }));
        assert!(modes.contains(&ExecutionMode::DepthReplacing));
    }

    #[test]
    fn def_returns_defining_instruction() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let c = builder.constant_u32(u32_ty, 42);

        let spirv = Spirv::new(builder.finish()).unwrap();

        assert!(matches!(
            spirv.def(c),
            Some(Instruction::Constant { ref value, .. }) if value == &[42],
        ));
        assert!(spirv.def(Id(999)).is_none());
    }
}
