//! The instruction sum type that a parsed module is made of.
//!
//! Only the instructions that the validation engines interpret are decoded
//! into dedicated variants; everything else is kept as [`Instruction::Unsupported`]
//! so that a module containing instructions outside this set still parses and
//! the interpreted subset can be walked.

use crate::spirv::{Id, SpirvError};

/// A single parsed instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    Name {
        target: Id,
        name: String,
    },
    MemberName {
        target: Id,
        member: u32,
        name: String,
    },
    Extension {
        name: String,
    },
    ExtInstImport {
        result_id: Id,
        name: String,
    },
    MemoryModel {
        addressing_model: AddressingModel,
        memory_model: MemoryModel,
    },
    EntryPoint {
        execution_model: ExecutionModel,
        entry_point: Id,
        name: String,
        interface: Vec<Id>,
    },
    ExecutionMode {
        entry_point: Id,
        mode: ExecutionMode,
    },
    /// Like `ExecutionMode`, but mode parameters are ids of constants.
    ExecutionModeId {
        entry_point: Id,
        mode: ExecutionMode,
    },
    Capability {
        capability: Capability,
    },

    TypeVoid {
        result_id: Id,
    },
    TypeBool {
        result_id: Id,
    },
    TypeInt {
        result_id: Id,
        width: u32,
        signedness: u32,
    },
    TypeFloat {
        result_id: Id,
        width: u32,
    },
    TypeVector {
        result_id: Id,
        component_type: Id,
        component_count: u32,
    },
    TypeMatrix {
        result_id: Id,
        column_type: Id,
        column_count: u32,
    },
    TypeImage {
        result_id: Id,
        sampled_type: Id,
        dim: Dim,
        depth: u32,
        arrayed: u32,
        ms: u32,
        sampled: u32,
        image_format: ImageFormat,
    },
    TypeSampler {
        result_id: Id,
    },
    TypeSampledImage {
        result_id: Id,
        image_type: Id,
    },
    TypeArray {
        result_id: Id,
        element_type: Id,
        length: Id,
    },
    TypeRuntimeArray {
        result_id: Id,
        element_type: Id,
    },
    TypeStruct {
        result_id: Id,
        member_types: Vec<Id>,
    },
    TypeOpaque {
        result_id: Id,
        name: String,
    },
    TypePointer {
        result_id: Id,
        storage_class: StorageClass,
        ty: Id,
    },
    TypeFunction {
        result_id: Id,
        return_type: Id,
        parameter_types: Vec<Id>,
    },
    TypeAccelerationStructure {
        result_id: Id,
    },

    ConstantTrue {
        result_type_id: Id,
        result_id: Id,
    },
    ConstantFalse {
        result_type_id: Id,
        result_id: Id,
    },
    Constant {
        result_type_id: Id,
        result_id: Id,
        value: Vec<u32>,
    },
    ConstantComposite {
        result_type_id: Id,
        result_id: Id,
        constituents: Vec<Id>,
    },
    ConstantNull {
        result_type_id: Id,
        result_id: Id,
    },
    SpecConstantTrue {
        result_type_id: Id,
        result_id: Id,
    },
    SpecConstantFalse {
        result_type_id: Id,
        result_id: Id,
    },
    SpecConstant {
        result_type_id: Id,
        result_id: Id,
        value: Vec<u32>,
    },
    SpecConstantComposite {
        result_type_id: Id,
        result_id: Id,
        constituents: Vec<Id>,
    },
    SpecConstantOp {
        result_type_id: Id,
        result_id: Id,
        opcode: u16,
        operands: Vec<u32>,
    },

    Function {
        result_type_id: Id,
        result_id: Id,
        function_control: u32,
        function_type: Id,
    },
    FunctionParameter {
        result_type_id: Id,
        result_id: Id,
    },
    FunctionEnd,
    FunctionCall {
        result_type_id: Id,
        result_id: Id,
        function: Id,
        arguments: Vec<Id>,
    },

    Variable {
        result_type_id: Id,
        result_id: Id,
        storage_class: StorageClass,
        initializer: Option<Id>,
    },
    ImageTexelPointer {
        result_type_id: Id,
        result_id: Id,
        image: Id,
        coordinate: Id,
        sample: Id,
    },
    Load {
        result_type_id: Id,
        result_id: Id,
        pointer: Id,
    },
    Store {
        pointer: Id,
        object: Id,
    },
    CopyMemory {
        target: Id,
        source: Id,
    },
    AccessChain {
        result_type_id: Id,
        result_id: Id,
        base: Id,
        indexes: Vec<Id>,
    },
    InBoundsAccessChain {
        result_type_id: Id,
        result_id: Id,
        base: Id,
        indexes: Vec<Id>,
    },
    CopyObject {
        result_type_id: Id,
        result_id: Id,
        operand: Id,
    },

    Decorate {
        target: Id,
        decoration: Decoration,
    },
    MemberDecorate {
        structure_type: Id,
        member: u32,
        decoration: Decoration,
    },

    /// `OpAtomicStore`; the only atomic without a result.
    AtomicStore {
        pointer: Id,
        scope: Id,
    },
    /// Any result-producing `OpAtomic*` instruction. The engines only need the
    /// pointer operand and the result type, so the individual opcodes are not
    /// distinguished.
    AtomicOp {
        result_type_id: Id,
        result_id: Id,
        pointer: Id,
        scope: Id,
    },
    /// Any `OpGroupNonUniform*` instruction. All of them start with
    /// (result type, result, execution scope).
    GroupNonUniformOp {
        result_type_id: Id,
        result_id: Id,
        execution_scope: Id,
        opcode: u16,
    },

    Label {
        result_id: Id,
    },
    Branch {
        target_label: Id,
    },
    BranchConditional {
        condition: Id,
        true_label: Id,
        false_label: Id,
    },
    Kill,
    Return,
    ReturnValue {
        value: Id,
    },
    Unreachable,

    /// An instruction outside the interpreted set.
    Unsupported {
        opcode: u16,
        operands: Vec<u32>,
    },
}

impl Instruction {
    /// Returns the id this instruction defines, if any.
    pub fn result_id(&self) -> Option<Id> {
        match *self {
            Instruction::ExtInstImport { result_id, .. }
            | Instruction::TypeVoid { result_id }
            | Instruction::TypeBool { result_id }
            | Instruction::TypeInt { result_id, .. }
            | Instruction::TypeFloat { result_id, .. }
            | Instruction::TypeVector { result_id, .. }
            | Instruction::TypeMatrix { result_id, .. }
            | Instruction::TypeImage { result_id, .. }
            | Instruction::TypeSampler { result_id }
            | Instruction::TypeSampledImage { result_id, .. }
            | Instruction::TypeArray { result_id, .. }
            | Instruction::TypeRuntimeArray { result_id, .. }
            | Instruction::TypeStruct { result_id, .. }
            | Instruction::TypeOpaque { result_id, .. }
            | Instruction::TypePointer { result_id, .. }
            | Instruction::TypeFunction { result_id, .. }
            | Instruction::TypeAccelerationStructure { result_id }
            | Instruction::ConstantTrue { result_id, .. }
            | Instruction::ConstantFalse { result_id, .. }
            | Instruction::Constant { result_id, .. }
            | Instruction::ConstantComposite { result_id, .. }
            | Instruction::ConstantNull { result_id, .. }
            | Instruction::SpecConstantTrue { result_id, .. }
            | Instruction::SpecConstantFalse { result_id, .. }
            | Instruction::SpecConstant { result_id, .. }
            | Instruction::SpecConstantComposite { result_id, .. }
            | Instruction::SpecConstantOp { result_id, .. }
            | Instruction::Function { result_id, .. }
            | Instruction::FunctionParameter { result_id, .. }
            | Instruction::FunctionCall { result_id, .. }
            | Instruction::Variable { result_id, .. }
            | Instruction::ImageTexelPointer { result_id, .. }
            | Instruction::Load { result_id, .. }
            | Instruction::AccessChain { result_id, .. }
            | Instruction::InBoundsAccessChain { result_id, .. }
            | Instruction::CopyObject { result_id, .. }
            | Instruction::AtomicOp { result_id, .. }
            | Instruction::GroupNonUniformOp { result_id, .. }
            | Instruction::Label { result_id } => Some(result_id),
            _ => None,
        }
    }

    /// Returns whether this is one of the `OpSpecConstant*` instructions.
    pub fn is_spec_constant(&self) -> bool {
        matches!(
            self,
            Instruction::SpecConstantTrue { .. }
                | Instruction::SpecConstantFalse { .. }
                | Instruction::SpecConstant { .. }
                | Instruction::SpecConstantComposite { .. }
                | Instruction::SpecConstantOp { .. }
        )
    }
}

/// Reads typed operands out of an instruction's word slice.
struct OperandReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> OperandReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        OperandReader { words, pos: 0 }
    }

    fn word(&mut self) -> Result<u32, SpirvError> {
        let word = *self
            .words
            .get(self.pos)
            .ok_or(SpirvError::IncompleteInstruction)?;
        self.pos += 1;
        Ok(word)
    }

    fn id(&mut self) -> Result<Id, SpirvError> {
        self.word().map(Id)
    }

    fn optional_id(&mut self) -> Option<Id> {
        let id = self.words.get(self.pos).copied().map(Id);
        if id.is_some() {
            self.pos += 1;
        }
        id
    }

    /// Reads a nul-terminated UTF-8 string packed into words.
    fn string(&mut self) -> Result<String, SpirvError> {
        let mut bytes = Vec::new();

        loop {
            let word = self.word()?;

            for byte in word.to_le_bytes() {
                if byte == 0 {
                    return String::from_utf8(bytes).map_err(|_| SpirvError::InvalidString);
                }

                bytes.push(byte);
            }
        }
    }

    fn remaining_ids(&mut self) -> Vec<Id> {
        let ids = self.words[self.pos..].iter().copied().map(Id).collect();
        self.pos = self.words.len();
        ids
    }

    fn remaining_words(&mut self) -> Vec<u32> {
        let words = self.words[self.pos..].to_vec();
        self.pos = self.words.len();
        words
    }
}

pub(super) fn decode_instruction(opcode: u16, operands: &[u32]) -> Result<Instruction, SpirvError> {
    let mut r = OperandReader::new(operands);

    Ok(match opcode {
        0 => Instruction::Nop,
        5 => Instruction::Name {
            target: r.id()?,
            name: r.string()?,
        },
        6 => Instruction::MemberName {
            target: r.id()?,
            member: r.word()?,
            name: r.string()?,
        },
        10 => Instruction::Extension { name: r.string()? },
        11 => Instruction::ExtInstImport {
            result_id: r.id()?,
            name: r.string()?,
        },
        14 => Instruction::MemoryModel {
            addressing_model: AddressingModel::from_num(r.word()?)?,
            memory_model: MemoryModel::from_num(r.word()?)?,
        },
        15 => Instruction::EntryPoint {
            execution_model: ExecutionModel::from_num(r.word()?)?,
            entry_point: r.id()?,
            name: r.string()?,
            interface: r.remaining_ids(),
        },
        16 => Instruction::ExecutionMode {
            entry_point: r.id()?,
            mode: ExecutionMode::decode(&mut r, false)?,
        },
        331 => Instruction::ExecutionModeId {
            entry_point: r.id()?,
            mode: ExecutionMode::decode(&mut r, true)?,
        },
        17 => Instruction::Capability {
            capability: Capability::from_num(r.word()?),
        },

        19 => Instruction::TypeVoid {
            result_id: r.id()?,
        },
        20 => Instruction::TypeBool {
            result_id: r.id()?,
        },
        21 => Instruction::TypeInt {
            result_id: r.id()?,
            width: r.word()?,
            signedness: r.word()?,
        },
        22 => Instruction::TypeFloat {
            result_id: r.id()?,
            width: r.word()?,
        },
        23 => Instruction::TypeVector {
            result_id: r.id()?,
            component_type: r.id()?,
            component_count: r.word()?,
        },
        24 => Instruction::TypeMatrix {
            result_id: r.id()?,
            column_type: r.id()?,
            column_count: r.word()?,
        },
        25 => Instruction::TypeImage {
            result_id: r.id()?,
            sampled_type: r.id()?,
            dim: Dim::from_num(r.word()?)?,
            depth: r.word()?,
            arrayed: r.word()?,
            ms: r.word()?,
            sampled: r.word()?,
            image_format: ImageFormat::from_num(r.word()?)?,
        },
        26 => Instruction::TypeSampler {
            result_id: r.id()?,
        },
        27 => Instruction::TypeSampledImage {
            result_id: r.id()?,
            image_type: r.id()?,
        },
        28 => Instruction::TypeArray {
            result_id: r.id()?,
            element_type: r.id()?,
            length: r.id()?,
        },
        29 => Instruction::TypeRuntimeArray {
            result_id: r.id()?,
            element_type: r.id()?,
        },
        30 => Instruction::TypeStruct {
            result_id: r.id()?,
            member_types: r.remaining_ids(),
        },
        31 => Instruction::TypeOpaque {
            result_id: r.id()?,
            name: r.string()?,
        },
        32 => Instruction::TypePointer {
            result_id: r.id()?,
            storage_class: StorageClass::from_num(r.word()?),
            ty: r.id()?,
        },
        33 => Instruction::TypeFunction {
            result_id: r.id()?,
            return_type: r.id()?,
            parameter_types: r.remaining_ids(),
        },
        5341 => Instruction::TypeAccelerationStructure {
            result_id: r.id()?,
        },

        41 => Instruction::ConstantTrue {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        42 => Instruction::ConstantFalse {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        43 => Instruction::Constant {
            result_type_id: r.id()?,
            result_id: r.id()?,
            value: r.remaining_words(),
        },
        44 => Instruction::ConstantComposite {
            result_type_id: r.id()?,
            result_id: r.id()?,
            constituents: r.remaining_ids(),
        },
        46 => Instruction::ConstantNull {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        48 => Instruction::SpecConstantTrue {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        49 => Instruction::SpecConstantFalse {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        50 => Instruction::SpecConstant {
            result_type_id: r.id()?,
            result_id: r.id()?,
            value: r.remaining_words(),
        },
        51 => Instruction::SpecConstantComposite {
            result_type_id: r.id()?,
            result_id: r.id()?,
            constituents: r.remaining_ids(),
        },
        52 => Instruction::SpecConstantOp {
            result_type_id: r.id()?,
            result_id: r.id()?,
            opcode: r.word()? as u16,
            operands: r.remaining_words(),
        },

        54 => Instruction::Function {
            result_type_id: r.id()?,
            result_id: r.id()?,
            function_control: r.word()?,
            function_type: r.id()?,
        },
        55 => Instruction::FunctionParameter {
            result_type_id: r.id()?,
            result_id: r.id()?,
        },
        56 => Instruction::FunctionEnd,
        57 => Instruction::FunctionCall {
            result_type_id: r.id()?,
            result_id: r.id()?,
            function: r.id()?,
            arguments: r.remaining_ids(),
        },

        59 => Instruction::Variable {
            result_type_id: r.id()?,
            result_id: r.id()?,
            storage_class: StorageClass::from_num(r.word()?),
            initializer: r.optional_id(),
        },
        60 => Instruction::ImageTexelPointer {
            result_type_id: r.id()?,
            result_id: r.id()?,
            image: r.id()?,
            coordinate: r.id()?,
            sample: r.id()?,
        },
        61 => Instruction::Load {
            result_type_id: r.id()?,
            result_id: r.id()?,
            pointer: r.id()?,
        },
        62 => Instruction::Store {
            pointer: r.id()?,
            object: r.id()?,
        },
        63 => Instruction::CopyMemory {
            target: r.id()?,
            source: r.id()?,
        },
        65 => Instruction::AccessChain {
            result_type_id: r.id()?,
            result_id: r.id()?,
            base: r.id()?,
            indexes: r.remaining_ids(),
        },
        66 => Instruction::InBoundsAccessChain {
            result_type_id: r.id()?,
            result_id: r.id()?,
            base: r.id()?,
            indexes: r.remaining_ids(),
        },
        83 => Instruction::CopyObject {
            result_type_id: r.id()?,
            result_id: r.id()?,
            operand: r.id()?,
        },

        71 => Instruction::Decorate {
            target: r.id()?,
            decoration: Decoration::decode(&mut r)?,
        },
        72 => Instruction::MemberDecorate {
            structure_type: r.id()?,
            member: r.word()?,
            decoration: Decoration::decode(&mut r)?,
        },

        228 => Instruction::AtomicStore {
            pointer: r.id()?,
            scope: r.id()?,
        },
        // AtomicLoad, AtomicExchange, AtomicCompareExchange(Weak),
        // AtomicIIncrement..AtomicXor: all begin (result type, result,
        // pointer, scope).
        227 | 229..=242 => Instruction::AtomicOp {
            result_type_id: r.id()?,
            result_id: r.id()?,
            pointer: r.id()?,
            scope: r.id()?,
        },
        333..=366 => Instruction::GroupNonUniformOp {
            result_type_id: r.id()?,
            result_id: r.id()?,
            execution_scope: r.id()?,
            opcode,
        },

        248 => Instruction::Label {
            result_id: r.id()?,
        },
        249 => Instruction::Branch {
            target_label: r.id()?,
        },
        250 => Instruction::BranchConditional {
            condition: r.id()?,
            true_label: r.id()?,
            false_label: r.id()?,
        },
        252 => Instruction::Kill,
        253 => Instruction::Return,
        254 => Instruction::ReturnValue { value: r.id()? },
        255 => Instruction::Unreachable,

        _ => Instruction::Unsupported {
            opcode,
            operands: operands.to_vec(),
        },
    })
}

macro_rules! closed_enum {
    (
        $(#[$attr:meta])*
        $name:ident { $($variant:ident = $value:expr,)+ }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn from_num(value: u32) -> Result<Self, SpirvError> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(SpirvError::UnknownEnumerant {
                        enumerant: stringify!($name),
                        value,
                    }),
                }
            }

            pub fn to_num(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                }
            }
        }
    };
}

macro_rules! open_enum {
    (
        $(#[$attr:meta])*
        $name:ident { $($variant:ident = $value:expr,)+ }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Other(u32),
        }

        impl $name {
            pub fn from_num(value: u32) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    other => Self::Other(other),
                }
            }

            pub fn to_num(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Other(other) => other,
                }
            }
        }
    };
}

closed_enum! {
    /// The stage a module entry point executes in.
    ExecutionModel {
        Vertex = 0,
        TessellationControl = 1,
        TessellationEvaluation = 2,
        Geometry = 3,
        Fragment = 4,
        GLCompute = 5,
        Kernel = 6,
        TaskNV = 5267,
        MeshNV = 5268,
        RayGenerationKHR = 5313,
        IntersectionKHR = 5314,
        AnyHitKHR = 5315,
        ClosestHitKHR = 5316,
        MissKHR = 5317,
        CallableKHR = 5318,
        TaskEXT = 5364,
        MeshEXT = 5365,
    }
}

closed_enum! {
    AddressingModel {
        Logical = 0,
        Physical32 = 1,
        Physical64 = 2,
        PhysicalStorageBuffer64 = 5348,
    }
}

closed_enum! {
    MemoryModel {
        Simple = 0,
        Glsl450 = 1,
        OpenCL = 2,
        Vulkan = 3,
    }
}

closed_enum! {
    /// The dimensionality of an image type.
    Dim {
        Dim1D = 0,
        Dim2D = 1,
        Dim3D = 2,
        Cube = 3,
        Rect = 4,
        Buffer = 5,
        SubpassData = 6,
    }
}

open_enum! {
    StorageClass {
        UniformConstant = 0,
        Input = 1,
        Uniform = 2,
        Output = 3,
        Workgroup = 4,
        CrossWorkgroup = 5,
        Private = 6,
        Function = 7,
        Generic = 8,
        PushConstant = 9,
        AtomicCounter = 10,
        Image = 11,
        StorageBuffer = 12,
    }
}

open_enum! {
    /// A built-in interface variable kind.
    BuiltIn {
        Position = 0,
        PointSize = 1,
        ClipDistance = 3,
        CullDistance = 4,
        VertexId = 5,
        InstanceId = 6,
        PrimitiveId = 7,
        InvocationId = 8,
        Layer = 9,
        ViewportIndex = 10,
        TessLevelOuter = 11,
        TessLevelInner = 12,
        TessCoord = 13,
        PatchVertices = 14,
        FragCoord = 15,
        PointCoord = 16,
        FrontFacing = 17,
        SampleId = 18,
        SamplePosition = 19,
        SampleMask = 20,
        FragDepth = 22,
        HelperInvocation = 23,
        NumWorkgroups = 24,
        WorkgroupSize = 25,
        WorkgroupId = 26,
        LocalInvocationId = 27,
        GlobalInvocationId = 28,
        LocalInvocationIndex = 29,
        SubgroupSize = 36,
        NumSubgroups = 38,
        SubgroupId = 40,
        SubgroupLocalInvocationId = 41,
        VertexIndex = 42,
        InstanceIndex = 43,
    }
}

open_enum! {
    /// A SPIR-V capability declared by a module.
    Capability {
        Matrix = 0,
        Shader = 1,
        Geometry = 2,
        Tessellation = 3,
        Float16 = 9,
        Float64 = 10,
        Int64 = 11,
        Int64Atomics = 12,
        Int16 = 22,
        TessellationPointSize = 23,
        GeometryPointSize = 24,
        ImageBuffer = 36,
        Int8 = 39,
        InputAttachment = 40,
        Sampled1D = 43,
        Image1D = 44,
        SampledBuffer = 46,
        GroupNonUniform = 61,
        GroupNonUniformVote = 62,
        GroupNonUniformArithmetic = 63,
        GroupNonUniformBallot = 64,
        GroupNonUniformShuffle = 65,
        GroupNonUniformShuffleRelative = 66,
        GroupNonUniformClustered = 67,
        GroupNonUniformQuad = 68,
        RayTracingKHR = 4479,
        RayQueryKHR = 4472,
        RayTracingNV = 5340,
    }
}

open_enum! {
    /// A memory or execution scope, as referenced by a scope constant.
    Scope {
        CrossDevice = 0,
        Device = 1,
        Workgroup = 2,
        Subgroup = 3,
        Invocation = 4,
        QueueFamily = 5,
    }
}

closed_enum! {
    /// The texel format of an image type, where declared.
    ImageFormat {
        Unknown = 0,
        Rgba32f = 1,
        Rgba16f = 2,
        R32f = 3,
        Rgba8 = 4,
        Rgba8Snorm = 5,
        Rg32f = 6,
        Rg16f = 7,
        R11fG11fB10f = 8,
        R16f = 9,
        Rgba16 = 10,
        Rgb10A2 = 11,
        Rg16 = 12,
        Rg8 = 13,
        R16 = 14,
        R8 = 15,
        Rgba16Snorm = 16,
        Rg16Snorm = 17,
        Rg8Snorm = 18,
        R16Snorm = 19,
        R8Snorm = 20,
        Rgba32i = 21,
        Rgba16i = 22,
        Rgba8i = 23,
        R32i = 24,
        Rg32i = 25,
        Rg16i = 26,
        Rg8i = 27,
        R16i = 28,
        R8i = 29,
        Rgba32ui = 30,
        Rgba16ui = 31,
        Rgba8ui = 32,
        R32ui = 33,
        Rgb10a2ui = 34,
        Rg32ui = 35,
        Rg16ui = 36,
        Rg8ui = 37,
        R16ui = 38,
        R8ui = 39,
        R64ui = 40,
        R64i = 41,
    }
}

/// A decoration together with its parameters.
///
/// Decorations the engines do not interpret decode to `Other`, keeping the
/// target indexable without understanding the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoration {
    SpecId { specialization_constant_id: u32 },
    Block,
    BufferBlock,
    RowMajor,
    ColMajor,
    ArrayStride { array_stride: u32 },
    MatrixStride { matrix_stride: u32 },
    BuiltIn { built_in: BuiltIn },
    NoPerspective,
    Flat,
    Patch,
    Centroid,
    NonWritable,
    NonReadable,
    Location { location: u32 },
    Component { component: u32 },
    Index { index: u32 },
    Binding { binding_point: u32 },
    DescriptorSet { descriptor_set: u32 },
    Offset { byte_offset: u32 },
    InputAttachmentIndex { attachment_index: u32 },
    Other { decoration: u32 },
}

impl Decoration {
    fn decode(r: &mut OperandReader<'_>) -> Result<Self, SpirvError> {
        Ok(match r.word()? {
            1 => Decoration::SpecId {
                specialization_constant_id: r.word()?,
            },
            2 => Decoration::Block,
            3 => Decoration::BufferBlock,
            4 => Decoration::RowMajor,
            5 => Decoration::ColMajor,
            6 => Decoration::ArrayStride {
                array_stride: r.word()?,
            },
            7 => Decoration::MatrixStride {
                matrix_stride: r.word()?,
            },
            11 => Decoration::BuiltIn {
                built_in: BuiltIn::from_num(r.word()?),
            },
            13 => Decoration::NoPerspective,
            14 => Decoration::Flat,
            15 => Decoration::Patch,
            16 => Decoration::Centroid,
            24 => Decoration::NonWritable,
            25 => Decoration::NonReadable,
            30 => Decoration::Location {
                location: r.word()?,
            },
            31 => Decoration::Component {
                component: r.word()?,
            },
            32 => Decoration::Index { index: r.word()? },
            33 => Decoration::Binding {
                binding_point: r.word()?,
            },
            34 => Decoration::DescriptorSet {
                descriptor_set: r.word()?,
            },
            35 => Decoration::Offset {
                byte_offset: r.word()?,
            },
            43 => Decoration::InputAttachmentIndex {
                attachment_index: r.word()?,
            },
            decoration => Decoration::Other { decoration },
        })
    }
}

/// An execution mode together with its parameters.
///
/// For [`Instruction::ExecutionModeId`], the `*Id` variants carry ids of
/// constants instead of literals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Invocations { invocation_count: u32 },
    SpacingEqual,
    SpacingFractionalEven,
    SpacingFractionalOdd,
    VertexOrderCw,
    VertexOrderCcw,
    PixelCenterInteger,
    OriginUpperLeft,
    OriginLowerLeft,
    EarlyFragmentTests,
    PointMode,
    DepthReplacing,
    DepthGreater,
    DepthLess,
    DepthUnchanged,
    LocalSize { x_size: u32, y_size: u32, z_size: u32 },
    LocalSizeId { x_size: Id, y_size: Id, z_size: Id },
    InputPoints,
    InputLines,
    InputLinesAdjacency,
    Triangles,
    InputTrianglesAdjacency,
    Quads,
    Isolines,
    OutputVertices { vertex_count: u32 },
    OutputPoints,
    OutputLineStrip,
    OutputTriangleStrip,
    Other { mode: u32 },
}

impl ExecutionMode {
    fn decode(r: &mut OperandReader<'_>, id_operands: bool) -> Result<Self, SpirvError> {
        Ok(match r.word()? {
            0 => ExecutionMode::Invocations {
                invocation_count: r.word()?,
            },
            1 => ExecutionMode::SpacingEqual,
            2 => ExecutionMode::SpacingFractionalEven,
            3 => ExecutionMode::SpacingFractionalOdd,
            4 => ExecutionMode::VertexOrderCw,
            5 => ExecutionMode::VertexOrderCcw,
            6 => ExecutionMode::PixelCenterInteger,
            7 => ExecutionMode::OriginUpperLeft,
            8 => ExecutionMode::OriginLowerLeft,
            9 => ExecutionMode::EarlyFragmentTests,
            10 => ExecutionMode::PointMode,
            12 => ExecutionMode::DepthReplacing,
            14 => ExecutionMode::DepthGreater,
            15 => ExecutionMode::DepthLess,
            16 => ExecutionMode::DepthUnchanged,
            17 => {
                if id_operands {
                    // LocalSize is not valid with OpExecutionModeId; LocalSizeId is.
                    return Err(SpirvError::UnknownEnumerant {
                        enumerant: "ExecutionMode",
                        value: 17,
                    });
                }

                ExecutionMode::LocalSize {
                    x_size: r.word()?,
                    y_size: r.word()?,
                    z_size: r.word()?,
                }
            }
            19 => ExecutionMode::InputPoints,
            20 => ExecutionMode::InputLines,
            21 => ExecutionMode::InputLinesAdjacency,
            22 => ExecutionMode::Triangles,
            23 => ExecutionMode::InputTrianglesAdjacency,
            24 => ExecutionMode::Quads,
            25 => ExecutionMode::Isolines,
            26 => ExecutionMode::OutputVertices {
                vertex_count: r.word()?,
            },
            27 => ExecutionMode::OutputPoints,
            28 => ExecutionMode::OutputLineStrip,
            29 => ExecutionMode::OutputTriangleStrip,
            38 => ExecutionMode::LocalSizeId {
                x_size: r.id()?,
                y_size: r.id()?,
                z_size: r.id()?,
            },
            mode => ExecutionMode::Other { mode },
        })
    }
}
