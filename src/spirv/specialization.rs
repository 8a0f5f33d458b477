//! Folding of specialization constants into a module.
//!
//! [`specialize`] rewrites the word stream of a parsed module so that every
//! `OpSpecConstant`, `OpSpecConstantTrue` and `OpSpecConstantFalse` becomes
//! the corresponding plain constant, taking the value from the override table
//! where one is provided and from the embedded default otherwise. `SpecId`
//! decorations are dropped from the output, since nothing in it is
//! specializable any more. `OpSpecConstantOp` expressions are left in place;
//! they fold at resolution time once their operands are plain constants.
//!
//! The rewrite is a pure function of the input module and the override table,
//! so the same inputs always produce the same output words.

use crate::{
    spirv::{instruction::Instruction, Id, Spirv},
    ValidationError,
};
use foldhash::HashMap;
use smallvec::SmallVec;

/// A typed value for one specialization constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpecializationConstant {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl SpecializationConstant {
    fn words(&self) -> SmallVec<[u32; 2]> {
        match *self {
            SpecializationConstant::Bool(value) => SmallVec::from_slice(&[value as u32]),
            SpecializationConstant::I32(value) => SmallVec::from_slice(&[value as u32]),
            SpecializationConstant::U32(value) => SmallVec::from_slice(&[value]),
            SpecializationConstant::F32(value) => SmallVec::from_slice(&[value.to_bits()]),
            SpecializationConstant::I64(value) => {
                let bits = value as u64;
                SmallVec::from_slice(&[bits as u32, (bits >> 32) as u32])
            }
            SpecializationConstant::U64(value) => {
                SmallVec::from_slice(&[value as u32, (value >> 32) as u32])
            }
            SpecializationConstant::F64(value) => {
                let bits = value.to_bits();
                SmallVec::from_slice(&[bits as u32, (bits >> 32) as u32])
            }
        }
    }
}

/// The values to fold in, keyed by `SpecId` constant id.
#[derive(Clone, Debug, Default)]
pub struct SpecializationOverrides {
    values: HashMap<u32, SpecializationConstant>,
}

impl SpecializationOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value for `constant_id`, replacing any previous one.
    pub fn set(&mut self, constant_id: u32, value: SpecializationConstant) -> &mut Self {
        self.values.insert(constant_id, value);
        self
    }

    #[inline]
    pub fn get(&self, constant_id: u32) -> Option<SpecializationConstant> {
        self.values.get(&constant_id).copied()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rewrites `spirv`'s word stream with all specialization constants folded.
///
/// Returns `Ok(None)` when the module contains no specialization constant
/// instructions at all, in which case there is nothing to fold and the raw
/// module can be used as-is. An override whose width does not match the
/// constant it targets is an error.
pub fn specialize(
    spirv: &Spirv,
    overrides: &SpecializationOverrides,
) -> Result<Option<Vec<u32>>, Box<ValidationError>> {
    if !spirv
        .instructions()
        .iter()
        .any(Instruction::is_spec_constant)
    {
        return Ok(None);
    }

    // SpecId decorations name the constants the override table can reach.
    let mut spec_ids: HashMap<Id, u32> = HashMap::default();

    for instruction in spirv.iter_decoration() {
        if let Instruction::Decorate {
            target,
            decoration:
                crate::spirv::instruction::Decoration::SpecId {
                    specialization_constant_id,
                },
        } = *instruction
        {
            spec_ids.insert(target, specialization_constant_id);
        }
    }

    let words = spirv.words();
    let mut output = Vec::with_capacity(words.len());
    output.extend_from_slice(&words[..5]);

    let mut pos = 5;

    while pos < words.len() {
        let word_count = (words[pos] >> 16) as usize;
        let opcode = (words[pos] & 0xffff) as u16;
        let operands = &words[pos + 1..pos + word_count];

        match opcode {
            // OpSpecConstantTrue / OpSpecConstantFalse
            48 | 49 => {
                let result_id = Id(operands[1]);
                let value = match override_for(&spec_ids, overrides, result_id) {
                    Some(SpecializationConstant::Bool(value)) => value,
                    Some(other) => {
                        return Err(override_type_error(result_id, "a boolean", other));
                    }
                    None => opcode == 48,
                };

                // OpConstantTrue / OpConstantFalse
                let new_opcode = if value { 41 } else { 42 };
                output.push(((word_count as u32) << 16) | new_opcode);
                output.extend_from_slice(operands);
            }
            // OpSpecConstant -> OpConstant
            50 => {
                let result_id = Id(operands[1]);
                output.push(((word_count as u32) << 16) | 43);
                output.extend_from_slice(&operands[..2]);

                match override_for(&spec_ids, overrides, result_id) {
                    Some(value) => {
                        let value_words = value.words();

                        if value_words.len() != operands.len() - 2 {
                            return Err(Box::new(ValidationError {
                                context: format!("specialization constant {}", result_id).into(),
                                problem: format!(
                                    "the provided value is {} words, but the constant is {} words",
                                    value_words.len(),
                                    operands.len() - 2,
                                )
                                .into(),
                                ..Default::default()
                            }));
                        }

                        output.extend_from_slice(&value_words);
                    }
                    None => output.extend_from_slice(&operands[2..]),
                }
            }
            // OpSpecConstantComposite -> OpConstantComposite
            51 => {
                output.push(((word_count as u32) << 16) | 44);
                output.extend_from_slice(operands);
            }
            // OpDecorate ... SpecId: dropped, nothing is specializable any more.
            71 if operands.len() == 3 && operands[1] == 1 => {}
            _ => {
                output.extend_from_slice(&words[pos..pos + word_count]);
            }
        }

        pos += word_count;
    }

    Ok(Some(output))
}

fn override_for(
    spec_ids: &HashMap<Id, u32>,
    overrides: &SpecializationOverrides,
    result_id: Id,
) -> Option<SpecializationConstant> {
    spec_ids
        .get(&result_id)
        .and_then(|&constant_id| overrides.get(constant_id))
}

fn override_type_error(
    result_id: Id,
    expected: &'static str,
    provided: SpecializationConstant,
) -> Box<ValidationError> {
    Box::new(ValidationError {
        context: format!("specialization constant {}", result_id).into(),
        problem: format!(
            "the constant is {}, but the provided value is {:?}",
            expected, provided,
        )
        .into(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ModuleBuilder;

    fn module_with_spec_constant() -> (Vec<u32>, Id) {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        let spec = builder.spec_constant_u32(u32_ty, 7, 64);
        (builder.finish(), spec)
    }

    #[test]
    fn no_spec_constants_is_a_no_op() {
        let mut builder = ModuleBuilder::new();
        let u32_ty = builder.type_int(32, 0);
        builder.constant_u32(u32_ty, 3);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let folded = specialize(&spirv, &SpecializationOverrides::new()).unwrap();

        assert!(folded.is_none());
    }

    #[test]
    fn override_replaces_default() {
        let (words, spec) = module_with_spec_constant();
        let spirv = Spirv::new(words).unwrap();

        let mut overrides = SpecializationOverrides::new();
        overrides.set(7, SpecializationConstant::U32(128));

        let folded = specialize(&spirv, &overrides).unwrap().unwrap();
        let folded = Spirv::new(folded).unwrap();

        assert!(matches!(
            folded.def(spec),
            Some(Instruction::Constant { ref value, .. }) if value == &[128],
        ));
        assert!(!folded
            .instructions()
            .iter()
            .any(Instruction::is_spec_constant));
    }

    #[test]
    fn default_is_baked_in_without_override() {
        let (words, spec) = module_with_spec_constant();
        let spirv = Spirv::new(words).unwrap();

        let folded = specialize(&spirv, &SpecializationOverrides::new())
            .unwrap()
            .unwrap();
        let folded = Spirv::new(folded).unwrap();

        assert!(matches!(
            folded.def(spec),
            Some(Instruction::Constant { ref value, .. }) if value == &[64],
        ));
    }

    #[test]
    fn folding_is_deterministic() {
        let (words, _) = module_with_spec_constant();
        let spirv = Spirv::new(words).unwrap();

        let mut overrides = SpecializationOverrides::new();
        overrides.set(7, SpecializationConstant::U32(9));

        let first = specialize(&spirv, &overrides).unwrap().unwrap();
        let second = specialize(&spirv, &overrides).unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_override_width_is_rejected() {
        let (words, _) = module_with_spec_constant();
        let spirv = Spirv::new(words).unwrap();

        let mut overrides = SpecializationOverrides::new();
        overrides.set(7, SpecializationConstant::U64(1));

        assert!(specialize(&spirv, &overrides).is_err());
    }
}
