//! Helpers for assembling small SPIR-V modules in tests.
//!
//! [`ModuleBuilder`] emits instructions into the sections the logical
//! layout prescribes, so helpers can be called in any order.

use crate::spirv::{
    instruction::{Capability, Dim},
    Id,
};
use std::collections::HashMap;

const MAGIC: u32 = 0x0723_0203;
const VERSION: u32 = 0x0001_0300;

/// The storage class of a [`ModuleBuilder::location_variable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClassArg {
    Input,
    Output,
}

impl StorageClassArg {
    fn to_num(self) -> u32 {
        match self {
            StorageClassArg::Input => 1,
            StorageClassArg::Output => 3,
        }
    }
}

pub struct ModuleBuilder {
    next_id: u32,
    capabilities: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    annotations: Vec<u32>,
    globals: Vec<u32>,
    functions: Vec<u32>,
    int_types: HashMap<(u32, u32), Id>,
    float_types: HashMap<u32, Id>,
    void_type: Option<Id>,
    /// Pointee type of each variable handed out, for loads and stores.
    pointees: HashMap<u32, Id>,
}

fn encode(section: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
    section.push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
    section.extend_from_slice(operands);
}

fn string_words(value: &str) -> Vec<u32> {
    let mut bytes: Vec<u8> = value.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }

    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder {
            next_id: 1,
            capabilities: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            annotations: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            int_types: HashMap::new(),
            float_types: HashMap::new(),
            void_type: None,
            pointees: HashMap::new(),
        }
    }

    pub fn finish(self) -> Vec<u32> {
        let mut words = vec![MAGIC, VERSION, 0, self.next_id, 0];
        words.extend_from_slice(&self.capabilities);
        // OpMemoryModel Logical GLSL450
        encode(&mut words, 14, &[0, 1]);
        words.extend_from_slice(&self.entry_points);
        words.extend_from_slice(&self.execution_modes);
        words.extend_from_slice(&self.annotations);
        words.extend_from_slice(&self.globals);
        words.extend_from_slice(&self.functions);
        words
    }

    pub fn reserve_id(&mut self) -> Id {
        let id = Id(self.next_id);
        self.next_id += 1;
        id
    }

    /// Appends a raw instruction to the types-and-globals section.
    pub fn op(&mut self, opcode: u16, operands: &[u32]) {
        encode(&mut self.globals, opcode, operands);
    }

    pub fn capability(&mut self, capability: Capability) {
        encode(&mut self.capabilities, 17, &[capability.to_num()]);
    }

    pub fn type_void(&mut self) -> Id {
        if let Some(id) = self.void_type {
            return id;
        }
        let id = self.reserve_id();
        encode(&mut self.globals, 19, &[id.0]);
        self.void_type = Some(id);
        id
    }

    pub fn type_int(&mut self, width: u32, signedness: u32) -> Id {
        if let Some(&id) = self.int_types.get(&(width, signedness)) {
            return id;
        }
        let id = self.reserve_id();
        encode(&mut self.globals, 21, &[id.0, width, signedness]);
        self.int_types.insert((width, signedness), id);
        id
    }

    pub fn type_float(&mut self, width: u32) -> Id {
        if let Some(&id) = self.float_types.get(&width) {
            return id;
        }
        let id = self.reserve_id();
        encode(&mut self.globals, 22, &[id.0, width]);
        self.float_types.insert(width, id);
        id
    }

    pub fn type_vector(&mut self, component: Id, count: u32) -> Id {
        let id = self.reserve_id();
        encode(&mut self.globals, 23, &[id.0, component.0, count]);
        id
    }

    pub fn type_array(&mut self, element: Id, length: Id) -> Id {
        let id = self.reserve_id();
        encode(&mut self.globals, 28, &[id.0, element.0, length.0]);
        id
    }

    pub fn constant_u32(&mut self, result_type: Id, value: u32) -> Id {
        let id = self.reserve_id();
        encode(&mut self.globals, 43, &[result_type.0, id.0, value]);
        id
    }

    /// An `OpSpecConstant` with a `SpecId` decoration.
    pub fn spec_constant_u32(&mut self, result_type: Id, spec_id: u32, default: u32) -> Id {
        let id = self.reserve_id();
        encode(&mut self.annotations, 71, &[id.0, 1, spec_id]);
        encode(&mut self.globals, 50, &[result_type.0, id.0, default]);
        id
    }

    fn pointer(&mut self, storage_class: u32, pointee: Id) -> Id {
        let id = self.reserve_id();
        encode(&mut self.globals, 32, &[id.0, storage_class, pointee.0]);
        id
    }

    fn variable(&mut self, storage_class: u32, pointee: Id) -> Id {
        let pointer = self.pointer(storage_class, pointee);
        let id = self.reserve_id();
        encode(&mut self.globals, 59, &[pointer.0, id.0, storage_class]);
        self.pointees.insert(id.0, pointee);
        id
    }

    fn decorate_binding(&mut self, variable: Id, set: u32, binding: u32) {
        encode(&mut self.annotations, 71, &[variable.0, 34, set]);
        encode(&mut self.annotations, 71, &[variable.0, 33, binding]);
    }

    /// A `Block`-decorated struct with one `u32` member, in the `Uniform`
    /// storage class.
    pub fn uniform_buffer_variable(&mut self, set: u32, binding: u32) -> Id {
        let u32_ty = self.type_int(32, 0);
        let struct_ty = self.reserve_id();
        encode(&mut self.globals, 30, &[struct_ty.0, u32_ty.0]);
        encode(&mut self.annotations, 71, &[struct_ty.0, 2]); // Block
        encode(&mut self.annotations, 72, &[struct_ty.0, 0, 35, 0]); // Offset 0

        let var = self.variable(2, struct_ty);
        self.decorate_binding(var, set, binding);
        var
    }

    /// A `Block`-decorated push-constant struct of `size` bytes, laid out
    /// as consecutive `u32` members.
    pub fn push_constant_variable(&mut self, size: u32) -> Id {
        let u32_ty = self.type_int(32, 0);
        let member_count = size / 4;

        let struct_ty = self.reserve_id();
        let mut operands = vec![struct_ty.0];
        operands.extend(std::iter::repeat(u32_ty.0).take(member_count as usize));
        encode(&mut self.globals, 30, &operands);

        encode(&mut self.annotations, 71, &[struct_ty.0, 2]); // Block
        for member in 0..member_count {
            encode(
                &mut self.annotations,
                72,
                &[struct_ty.0, member, 35, member * 4],
            );
        }

        self.variable(9, struct_ty)
    }

    fn sampled_image_type(&mut self) -> Id {
        let f32_ty = self.type_float(32);
        let image_ty = self.reserve_id();
        // 2D, not depth, not arrayed, single-sampled, used with a sampler,
        // unknown format.
        encode(
            &mut self.globals,
            25,
            &[image_ty.0, f32_ty.0, 1, 0, 0, 0, 1, 0],
        );
        let sampled_ty = self.reserve_id();
        encode(&mut self.globals, 27, &[sampled_ty.0, image_ty.0]);
        sampled_ty
    }

    /// A (possibly nested) sized array of combined image samplers.
    pub fn sampled_image_array_variable(&mut self, set: u32, binding: u32, dims: &[u32]) -> Id {
        let u32_ty = self.type_int(32, 0);
        let mut ty = self.sampled_image_type();
        for &dim in dims.iter().rev() {
            let length = self.constant_u32(u32_ty, dim);
            ty = self.type_array(ty, length);
        }

        let var = self.variable(0, ty);
        self.decorate_binding(var, set, binding);
        var
    }

    /// A runtime array of combined image samplers.
    pub fn sampled_image_runtime_array_variable(&mut self, set: u32, binding: u32) -> Id {
        let element = self.sampled_image_type();
        let ty = self.reserve_id();
        encode(&mut self.globals, 29, &[ty.0, element.0]);

        let var = self.variable(0, ty);
        self.decorate_binding(var, set, binding);
        var
    }

    /// A bare image variable with the given dimensionality and `Sampled`
    /// operand.
    pub fn image_variable(&mut self, set: u32, binding: u32, dim: Dim, sampled: u32) -> Id {
        let f32_ty = self.type_float(32);
        let image_ty = self.reserve_id();
        encode(
            &mut self.globals,
            25,
            &[image_ty.0, f32_ty.0, dim.to_num(), 0, 0, 0, sampled, 0],
        );

        let var = self.variable(0, image_ty);
        self.decorate_binding(var, set, binding);
        var
    }

    /// A float scalar or vector input or output with a `Location`
    /// decoration.
    pub fn location_variable(
        &mut self,
        storage_class: StorageClassArg,
        location: u32,
        num_components: u32,
        width: u32,
    ) -> Id {
        let scalar = self.type_float(width);
        let ty = if num_components == 1 {
            scalar
        } else {
            self.type_vector(scalar, num_components)
        };

        let var = self.variable(storage_class.to_num(), ty);
        encode(&mut self.annotations, 71, &[var.0, 30, location]);
        var
    }

    fn entry_point(
        &mut self,
        execution_model: u32,
        name: &str,
        interface: &[Id],
    ) -> (Id, Id) {
        let void = self.type_void();
        let fn_ty = self.reserve_id();
        encode(&mut self.globals, 33, &[fn_ty.0, void.0]);

        let main = self.reserve_id();
        let mut operands = vec![execution_model, main.0];
        operands.extend(string_words(name));
        operands.extend(interface.iter().map(|id| id.0));
        encode(&mut self.entry_points, 15, &operands);

        (main, fn_ty)
    }

    fn function_body(&mut self, main: Id, fn_ty: Id, body: &[(u16, Vec<u32>)]) {
        let void = self.type_void();
        encode(&mut self.functions, 54, &[void.0, main.0, 0, fn_ty.0]);
        let label = self.reserve_id();
        encode(&mut self.functions, 248, &[label.0]);
        for (opcode, operands) in body {
            encode(&mut self.functions, *opcode, operands);
        }
        encode(&mut self.functions, 253, &[]); // OpReturn
        encode(&mut self.functions, 56, &[]); // OpFunctionEnd
    }

    /// A `GLCompute` entry point with a `LocalSize` execution mode and an
    /// empty body. Returns the function id and the interface list.
    pub fn compute_entry_point(&mut self, name: &str, local_size: [u32; 3]) -> (Id, Vec<Id>) {
        let (main, fn_ty) = self.entry_point(5, name, &[]);
        encode(
            &mut self.execution_modes,
            16,
            &[main.0, 17, local_size[0], local_size[1], local_size[2]],
        );
        self.function_body(main, fn_ty, &[]);
        (main, Vec::new())
    }

    /// Like [`compute_entry_point`](Self::compute_entry_point), with a body
    /// that loads through `variable`.
    pub fn compute_entry_point_loading(
        &mut self,
        name: &str,
        local_size: [u32; 3],
        variable: Id,
    ) -> (Id, Vec<Id>) {
        let pointee = self.pointees[&variable.0];
        let (main, fn_ty) = self.entry_point(5, name, &[]);
        encode(
            &mut self.execution_modes,
            16,
            &[main.0, 17, local_size[0], local_size[1], local_size[2]],
        );

        let loaded = self.reserve_id();
        self.function_body(main, fn_ty, &[(61, vec![pointee.0, loaded.0, variable.0])]);
        (main, Vec::new())
    }

    /// A `GLCompute` entry point whose x dimension is a specialization
    /// constant with the given `SpecId`, via `LocalSizeId`.
    pub fn compute_entry_point_spec_sized(
        &mut self,
        name: &str,
        spec_id: u32,
        local_size: [u32; 3],
    ) -> (Id, Vec<Id>) {
        let u32_ty = self.type_int(32, 0);
        let x = self.spec_constant_u32(u32_ty, spec_id, local_size[0]);
        let y = self.constant_u32(u32_ty, local_size[1]);
        let z = self.constant_u32(u32_ty, local_size[2]);

        let (main, fn_ty) = self.entry_point(5, name, &[]);
        encode(
            &mut self.execution_modes,
            331,
            &[main.0, 38, x.0, y.0, z.0],
        );
        self.function_body(main, fn_ty, &[]);
        (main, Vec::new())
    }

    /// A `Vertex` entry point that stores an undefined value through each
    /// of the given output variables.
    pub fn vertex_entry_point_storing_all(&mut self, name: &str, variables: &[Id]) -> Id {
        let mut body = Vec::new();
        for &variable in variables {
            let pointee = self.pointees[&variable.0];
            let undef = self.reserve_id();
            encode(&mut self.globals, 3, &[pointee.0, undef.0]); // OpUndef
            body.push((62, vec![variable.0, undef.0]));
        }

        let (main, fn_ty) = self.entry_point(0, name, variables);
        self.function_body(main, fn_ty, &body);
        main
    }

    pub fn vertex_entry_point_storing(&mut self, name: &str, variable: Id) -> Id {
        self.vertex_entry_point_storing_all(name, &[variable])
    }
}
