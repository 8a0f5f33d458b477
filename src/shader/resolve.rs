//! On-demand resolution of SPIR-V types and constants.
//!
//! A [`TypeResolver`] is built per validation call over one parsed module and
//! one override table. It memoizes everything it resolves, so within a call
//! the same id is never walked twice and repeated queries return the same
//! `Arc`. No state outlives the call.

use crate::spirv::{
    instruction::{Decoration, Dim, ImageFormat, Instruction, StorageClass},
    specialization::{SpecializationConstant, SpecializationOverrides},
    Id, Spirv,
};
use foldhash::{HashMap, HashSet};
use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    sync::Arc,
};

/// Resolves type and constant ids of one module, memoized.
pub struct TypeResolver<'a> {
    spirv: &'a Spirv,
    overrides: &'a SpecializationOverrides,
    types: HashMap<Id, Arc<TypeInfo>>,
    constants: HashMap<Id, u64>,
    in_progress: HashSet<Id>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(spirv: &'a Spirv, overrides: &'a SpecializationOverrides) -> Self {
        TypeResolver {
            spirv,
            overrides,
            types: HashMap::default(),
            constants: HashMap::default(),
            in_progress: HashSet::default(),
        }
    }

    #[inline]
    pub fn spirv(&self) -> &'a Spirv {
        self.spirv
    }

    /// Resolves the type defined by `id`.
    ///
    /// Resolving the same id again returns the memoized `Arc`.
    pub fn resolve_type(&mut self, id: Id) -> Result<Arc<TypeInfo>, ResolveError> {
        if let Some(info) = self.types.get(&id) {
            return Ok(info.clone());
        }

        // A type that is reached again while its own members are being
        // resolved can only come from a malformed module.
        if !self.in_progress.insert(id) {
            return Err(ResolveError::CyclicType { id });
        }

        let result = self.resolve_type_uncached(id);
        self.in_progress.remove(&id);

        let info = Arc::new(TypeInfo {
            id,
            kind: result?,
        });
        self.types.insert(id, info.clone());

        Ok(info)
    }

    fn resolve_type_uncached(&mut self, id: Id) -> Result<TypeKind, ResolveError> {
        let instruction = self
            .spirv
            .def(id)
            .ok_or(ResolveError::NotFound { id })?
            .clone();

        Ok(match instruction {
            Instruction::TypeVoid { .. } => TypeKind::Void,
            Instruction::TypeBool { .. } => TypeKind::Bool,
            Instruction::TypeInt {
                width, signedness, ..
            } => TypeKind::Int {
                width,
                signed: signedness != 0,
            },
            Instruction::TypeFloat { width, .. } => TypeKind::Float { width },
            Instruction::TypeVector {
                component_type,
                component_count,
                ..
            } => TypeKind::Vector {
                component: self.resolve_type(component_type)?,
                component_count,
            },
            Instruction::TypeMatrix {
                column_type,
                column_count,
                ..
            } => TypeKind::Matrix {
                column: self.resolve_type(column_type)?,
                column_count,
            },
            Instruction::TypeArray {
                element_type,
                length,
                ..
            } => TypeKind::Array {
                element: self.resolve_type(element_type)?,
                element_count: self.constant_value(length)?,
                stride: array_stride(self.spirv.decorations(id)),
            },
            Instruction::TypeRuntimeArray { element_type, .. } => TypeKind::RuntimeArray {
                element: self.resolve_type(element_type)?,
                stride: array_stride(self.spirv.decorations(id)),
            },
            Instruction::TypeStruct {
                ref member_types, ..
            } => {
                let mut members = Vec::with_capacity(member_types.len());

                for (index, &member_type) in member_types.iter().enumerate() {
                    let decorations = self.spirv.member_decorations(id, index as u32);
                    let offset = decorations.iter().find_map(|decoration| match *decoration {
                        Decoration::Offset { byte_offset } => Some(byte_offset),
                        _ => None,
                    });

                    members.push(StructMember {
                        ty: self.resolve_type(member_type)?,
                        offset,
                    });
                }

                let decorations = self.spirv.decorations(id);

                TypeKind::Struct {
                    members,
                    block: decorations.contains(&Decoration::Block),
                    buffer_block: decorations.contains(&Decoration::BufferBlock),
                }
            }
            Instruction::TypePointer {
                storage_class, ty, ..
            } => TypeKind::Pointer {
                storage_class,
                pointee: self.resolve_type(ty)?,
            },
            Instruction::TypeImage {
                sampled_type,
                dim,
                depth,
                arrayed,
                ms,
                sampled,
                image_format,
                ..
            } => TypeKind::Image {
                sampled_type: self.resolve_type(sampled_type)?,
                dim,
                depth,
                arrayed: arrayed != 0,
                multisampled: ms != 0,
                sampled,
                format: image_format,
            },
            Instruction::TypeSampler { .. } => TypeKind::Sampler,
            Instruction::TypeSampledImage { image_type, .. } => TypeKind::SampledImage {
                image: self.resolve_type(image_type)?,
            },
            Instruction::TypeAccelerationStructure { .. } => TypeKind::AccelerationStructure,
            _ => return Err(ResolveError::NotAType { id }),
        })
    }

    /// Resolves the scalar constant defined by `id` to its bit pattern,
    /// zero-extended to 64 bits.
    ///
    /// Specialization constants take their value from the override table when
    /// the table has an entry for their `SpecId`, and from the embedded
    /// default otherwise. Integer `OpSpecConstantOp` expressions are folded
    /// recursively.
    pub fn constant_value(&mut self, id: Id) -> Result<u64, ResolveError> {
        if let Some(&value) = self.constants.get(&id) {
            return Ok(value);
        }

        let instruction = self
            .spirv
            .def(id)
            .ok_or(ResolveError::NotFound { id })?
            .clone();

        let value = match instruction {
            Instruction::Constant { ref value, .. } => words_to_u64(value),
            Instruction::ConstantTrue { .. } => 1,
            Instruction::ConstantFalse { .. } | Instruction::ConstantNull { .. } => 0,
            Instruction::SpecConstant { ref value, .. } => match self.override_value(id) {
                Some(overridden) => overridden,
                None => words_to_u64(value),
            },
            Instruction::SpecConstantTrue { .. } => self.override_value(id).unwrap_or(1),
            Instruction::SpecConstantFalse { .. } => self.override_value(id).unwrap_or(0),
            Instruction::SpecConstantOp {
                opcode,
                ref operands,
                ..
            } => self.fold_spec_op(id, opcode, operands)?,
            _ => return Err(ResolveError::NotConstant { id }),
        };

        self.constants.insert(id, value);

        Ok(value)
    }

    fn override_value(&self, id: Id) -> Option<u64> {
        let constant_id = self
            .spirv
            .decorations(id)
            .iter()
            .find_map(|decoration| match *decoration {
                Decoration::SpecId {
                    specialization_constant_id,
                } => Some(specialization_constant_id),
                _ => None,
            })?;

        self.overrides
            .get(constant_id)
            .map(|value| match value {
                SpecializationConstant::Bool(value) => value as u64,
                SpecializationConstant::I32(value) => value as u32 as u64,
                SpecializationConstant::U32(value) => value as u64,
                SpecializationConstant::I64(value) => value as u64,
                SpecializationConstant::U64(value) => value,
                SpecializationConstant::F32(value) => value.to_bits() as u64,
                SpecializationConstant::F64(value) => value.to_bits(),
            })
    }

    fn fold_spec_op(&mut self, id: Id, opcode: u16, operands: &[u32]) -> Result<u64, ResolveError> {
        let operand = |index: usize| -> Result<Id, ResolveError> {
            operands
                .get(index)
                .copied()
                .map(Id)
                .ok_or(ResolveError::NotConstant { id })
        };

        let a = self.constant_value(operand(0)?)?;

        Ok(match opcode {
            // SNegate, Not
            126 => a.wrapping_neg(),
            200 => !a,
            // IAdd, ISub, IMul
            128 => a.wrapping_add(self.constant_value(operand(1)?)?),
            130 => a.wrapping_sub(self.constant_value(operand(1)?)?),
            132 => a.wrapping_mul(self.constant_value(operand(1)?)?),
            // UDiv, SDiv, UMod, SRem
            134 => {
                let b = self.constant_value(operand(1)?)?;
                a.checked_div(b).ok_or(ResolveError::NotConstant { id })?
            }
            135 => {
                let b = self.constant_value(operand(1)?)? as i64;
                (a as i64)
                    .checked_div(b)
                    .ok_or(ResolveError::NotConstant { id })? as u64
            }
            137 => {
                let b = self.constant_value(operand(1)?)?;
                a.checked_rem(b).ok_or(ResolveError::NotConstant { id })?
            }
            138 => {
                let b = self.constant_value(operand(1)?)? as i64;
                (a as i64)
                    .checked_rem(b)
                    .ok_or(ResolveError::NotConstant { id })? as u64
            }
            // ShiftRightLogical, ShiftLeftLogical
            194 => a >> (self.constant_value(operand(1)?)? & 63),
            196 => a << (self.constant_value(operand(1)?)? & 63),
            // BitwiseOr, BitwiseXor, BitwiseAnd
            197 => a | self.constant_value(operand(1)?)?,
            198 => a ^ self.constant_value(operand(1)?)?,
            199 => a & self.constant_value(operand(1)?)?,
            _ => return Err(ResolveError::NotConstant { id }),
        })
    }
}

fn words_to_u64(words: &[u32]) -> u64 {
    match *words {
        [low] => low as u64,
        [low, high, ..] => (low as u64) | ((high as u64) << 32),
        [] => 0,
    }
}

fn array_stride(decorations: &[Decoration]) -> Option<u32> {
    decorations.iter().find_map(|decoration| match *decoration {
        Decoration::ArrayStride { array_stride } => Some(array_stride),
        _ => None,
    })
}

/// One resolved type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeInfo {
    pub id: Id,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Void,
    Bool,
    Int {
        width: u32,
        signed: bool,
    },
    Float {
        width: u32,
    },
    Vector {
        component: Arc<TypeInfo>,
        component_count: u32,
    },
    Matrix {
        column: Arc<TypeInfo>,
        column_count: u32,
    },
    Array {
        element: Arc<TypeInfo>,
        element_count: u64,
        stride: Option<u32>,
    },
    RuntimeArray {
        element: Arc<TypeInfo>,
        stride: Option<u32>,
    },
    Struct {
        members: Vec<StructMember>,
        block: bool,
        buffer_block: bool,
    },
    Pointer {
        storage_class: StorageClass,
        pointee: Arc<TypeInfo>,
    },
    Image {
        sampled_type: Arc<TypeInfo>,
        dim: Dim,
        depth: u32,
        arrayed: bool,
        multisampled: bool,
        /// 1 if used with a sampler, 2 if used without one, 0 if unknown.
        sampled: u32,
        format: ImageFormat,
    },
    Sampler,
    SampledImage {
        image: Arc<TypeInfo>,
    },
    AccelerationStructure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMember {
    pub ty: Arc<TypeInfo>,
    pub offset: Option<u32>,
}

impl TypeInfo {
    /// Returns the size of a value of this type in bytes, where one is
    /// defined. Runtime arrays and opaque types have none.
    ///
    /// Strides, offsets and element counts come from untrusted module words,
    /// so the arithmetic saturates instead of wrapping.
    pub fn size(&self) -> Option<u64> {
        match self.kind {
            TypeKind::Bool => Some(4),
            TypeKind::Int { width, .. } | TypeKind::Float { width } => Some(width as u64 / 8),
            TypeKind::Vector {
                ref component,
                component_count,
            } => Some(component.size()?.saturating_mul(component_count as u64)),
            TypeKind::Matrix {
                ref column,
                column_count,
            } => Some(column.size()?.saturating_mul(column_count as u64)),
            TypeKind::Array {
                ref element,
                element_count,
                stride,
            } => {
                let stride = match stride {
                    Some(stride) => stride as u64,
                    None => element.size()?,
                };
                Some(stride.saturating_mul(element_count))
            }
            TypeKind::Struct { ref members, .. } => {
                let mut size: u64 = 0;

                for member in members {
                    let end = match member.offset {
                        Some(offset) => (offset as u64).saturating_add(member.ty.size()?),
                        None => size.saturating_add(member.ty.size()?),
                    };
                    size = size.max(end);
                }

                Some(size)
            }
            _ => None,
        }
    }
}

/// An error that can happen while resolving a type or constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// The id does not define anything in the module.
    NotFound { id: Id },
    /// The id defines something other than a type.
    NotAType { id: Id },
    /// The id does not fold to a scalar constant.
    NotConstant { id: Id },
    /// The type contains itself.
    CyclicType { id: Id },
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            ResolveError::NotFound { id } => write!(f, "id {} is not defined in the module", id),
            ResolveError::NotAType { id } => write!(f, "id {} does not define a type", id),
            ResolveError::NotConstant { id } => {
                write!(f, "id {} does not fold to a scalar constant", id)
            }
            ResolveError::CyclicType { id } => write!(f, "type {} contains itself", id),
        }
    }
}

impl Error for ResolveError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ModuleBuilder;

    #[test]
    fn resolving_twice_returns_the_same_arc() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let vec4 = builder.type_vector(u32_ty, 4);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        let first = resolver.resolve_type(vec4).unwrap();
        let second = resolver.resolve_type(vec4).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn nested_array_counts_multiply() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let len3 = builder.constant_u32(u32_ty, 3);
        let len4 = builder.constant_u32(u32_ty, 4);
        let inner = builder.type_array(u32_ty, len3);
        let outer = builder.type_array(inner, len4);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        let outer = resolver.resolve_type(outer).unwrap();
        let TypeKind::Array {
            ref element,
            element_count: 4,
            ..
        } = outer.kind
        else {
            panic!("expected a 4-element array, got {:?}", outer.kind);
        };
        assert!(matches!(
            element.kind,
            TypeKind::Array {
                element_count: 3,
                ..
            },
        ));
    }

    #[test]
    fn oversized_array_size_saturates() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let len = builder.constant_u32(u32_ty, u32::MAX);
        let inner = builder.type_array(u32_ty, len);
        let mid = builder.type_array(inner, len);
        let outer = builder.type_array(mid, len);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        // The counts come straight from module constants; the product must
        // clamp instead of wrapping.
        let outer = resolver.resolve_type(outer).unwrap();
        assert_eq!(outer.size(), Some(u64::MAX));
    }

    #[test]
    fn cyclic_type_is_an_error() {
        let mut builder = ModuleBuilder::new();
        let id = builder.reserve_id();
        builder.op(30, &[id.0, id.0]); // OpTypeStruct whose member is itself

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        assert_eq!(
            resolver.resolve_type(id),
            Err(ResolveError::CyclicType { id }),
        );
    }

    #[test]
    fn spec_constant_override_wins_over_default() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let spec = builder.spec_constant_u32(u32_ty, 3, 16);

        let spirv = Spirv::new(builder.finish()).unwrap();

        let mut overrides = SpecializationOverrides::new();
        overrides.set(3, SpecializationConstant::U32(256));
        let mut resolver = TypeResolver::new(&spirv, &overrides);
        assert_eq!(resolver.constant_value(spec), Ok(256));

        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);
        assert_eq!(resolver.constant_value(spec), Ok(16));
    }

    #[test]
    fn spec_constant_op_folds_integer_arithmetic() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let a = builder.constant_u32(u32_ty, 6);
        let b = builder.constant_u32(u32_ty, 7);
        let product = builder.reserve_id();
        // OpSpecConstantOp %u32 %product IMul %a %b
        builder.op(52, &[u32_ty.0, product.0, 132, a.0, b.0]);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        assert_eq!(resolver.constant_value(product), Ok(42));
    }

    #[test]
    fn non_constant_id_is_rejected() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(&spirv, &overrides);

        assert_eq!(
            resolver.constant_value(u32_ty),
            Err(ResolveError::NotConstant { id: u32_ty }),
        );
        assert_eq!(
            resolver.resolve_type(Id(99)),
            Err(ResolveError::NotFound { id: Id(99) }),
        );
    }
}
