//! Xenos microcode to SPIR-V translator
//!
//! The microcode parser drives a [`ShaderTranslator`] through its `process_*`
//! callbacks in program order, bracketed by
//! [`start_translation`](ShaderTranslator::start_translation) and
//! [`complete_translation`](ShaderTranslator::complete_translation).
//!
//! Translated shaders read their inputs from:
//! - set 0: vertex fetch constants (`uint4[48]`)
//! - set 1/2: float constants of the vertex/pixel stage (`float4[N]`)
//! - set 6: bool constants (`uint4[2]`) and loop constants (`uint4[8]`)
//! - set 7: shared memory (`uint[]`)
//!
//! Registers, p0, a0 and the loop stacks are function-local variables.

use std::collections::BTreeSet;

use rspirv::dr::Operand;
use rspirv::spirv::{
    BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, FunctionControl, StorageClass,
    Word,
};
use tracing::{debug, error, warn};
use xt_core::{
    ControlFlowError, DebugConfig, Features, Result, SpirvVersion, TranslatorConfig,
    TranslatorError,
};

use super::binding::DescriptorSet;
use super::builder::ModuleBuilder;
use super::control_flow::{Conditional, Dispatch};
use super::ucode::{
    AluInstruction, ExecInstruction, JumpInstruction, LoopEndInstruction, LoopStartInstruction,
    TextureFetchInstruction, VertexFetchInstruction,
};
use super::validate;
use crate::xenos::{ShaderType, BOOL_CONSTANT_COUNT, FETCH_CONSTANT_DWORDS, LOOP_CONSTANT_COUNT};

/// Per-shader facts known before the instruction stream is replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInfo {
    pub shader_type: ShaderType,
    /// Number of temporary registers, r0 upwards.
    pub register_count: u32,
    /// Number of float constants the stage can address.
    pub float_constant_count: u32,
    /// Control flow addresses that are jump or loop targets.
    pub label_addresses: BTreeSet<u32>,
}

impl ShaderInfo {
    pub fn new(shader_type: ShaderType, register_count: u32, float_constant_count: u32) -> Self {
        Self {
            shader_type,
            register_count,
            float_constant_count,
            label_addresses: BTreeSet::new(),
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = u32>) -> Self {
        self.label_addresses.extend(labels);
        self
    }
}

/// State of one translation in progress
///
/// The control flow, operand, ALU and fetch modules each add their part of
/// the implementation.
pub(super) struct Translation {
    pub(super) info: ShaderInfo,
    pub(super) features: Features,
    pub(super) b: ModuleBuilder,
    main_function: Word,

    // Resources
    pub(super) float_constants: Option<Word>,
    pub(super) bool_loop_constants: Word,
    pub(super) fetch_constants: Word,
    pub(super) shared_memory: Word,
    pub(super) shared_memory_class: StorageClass,
    interface_io: Vec<Word>,
    interface_resources: Vec<Word>,

    // Vertex stage inputs and outputs
    pub(super) per_vertex: Option<Word>,

    // Function variables
    pub(super) var_predicate: Word,
    pub(super) var_loop_count: Word,
    pub(super) var_address_absolute: Word,
    pub(super) var_address_relative: Word,
    pub(super) var_registers: Option<Word>,
    pub(super) var_point_size_edge_flag_kill_vertex: Option<Word>,

    // Control flow
    pub(super) conditional: Conditional,
    /// p0 was written inside the current exec.
    pub(super) predicate_written: bool,
    pub(super) dispatch: Dispatch,
    pub(super) open_loops: u32,
}

/// Members of a uniform or storage block: (type, offset).
type BlockMembers<'a> = &'a [(Word, u32)];

fn declare_block(
    b: &mut ModuleBuilder,
    members: BlockMembers<'_>,
    block: Decoration,
    storage_class: StorageClass,
    set: DescriptorSet,
    name: &str,
) -> (Word, Word) {
    let ty = b.type_struct(members.iter().map(|&(member, _)| member));
    for (i, &(_, offset)) in members.iter().enumerate() {
        b.member_decorate(ty, i as u32, Decoration::Offset, [Operand::LiteralBit32(offset)]);
    }
    b.decorate(ty, block, []);
    let pointer = b.pointer_type(storage_class, ty);
    let var = b.variable(pointer, None, storage_class, None);
    b.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(set.index())]);
    b.decorate(var, Decoration::Binding, [Operand::LiteralBit32(0)]);
    b.debug_name(var, name);
    (ty, var)
}

impl Translation {
    fn new(info: ShaderInfo, features: Features, emit_names: bool) -> Result<Self> {
        let mut b = ModuleBuilder::new(features.spirv_version, emit_names);
        let float4 = b.types.float_vector(4);
        let uint = b.types.uint;
        let uint4 = b.types.uint_vector(4);
        let int = b.types.int;
        let int4 = b.types.int_vector(4);
        let float = b.types.float;
        let float3 = b.types.float_vector(3);
        let boolean = b.types.boolean;

        //---------------------------------------------------------------------
        // Uniforms and shared memory
        //---------------------------------------------------------------------

        let float_constants = if info.float_constant_count > 0 {
            let array = b.array_type(float4, info.float_constant_count, Some(16));
            let (_, var) = declare_block(
                &mut b,
                &[(array, 0)],
                Decoration::Block,
                StorageClass::Uniform,
                DescriptorSet::float_constants(info.shader_type),
                "float_constants",
            );
            Some(var)
        } else {
            None
        };

        let bool_array = b.array_type(uint4, BOOL_CONSTANT_COUNT / 128, Some(16));
        let loop_array = b.array_type(uint4, LOOP_CONSTANT_COUNT / 4, Some(16));
        let (_, bool_loop_constants) = declare_block(
            &mut b,
            &[(bool_array, 0), (loop_array, BOOL_CONSTANT_COUNT / 8)],
            Decoration::Block,
            StorageClass::Uniform,
            DescriptorSet::BoolLoopConstants,
            "bool_loop_constants",
        );

        let fetch_array = b.array_type(uint4, FETCH_CONSTANT_DWORDS / 4, Some(16));
        let (_, fetch_constants) = declare_block(
            &mut b,
            &[(fetch_array, 0)],
            Decoration::Block,
            StorageClass::Uniform,
            DescriptorSet::FetchConstants,
            "fetch_constants",
        );

        // Storage buffers exist as a storage class from 1.3 on.
        let (shared_memory_class, shared_memory_block) = if features.spirv_version >= SpirvVersion::V1_3 {
            (StorageClass::StorageBuffer, Decoration::Block)
        } else {
            (StorageClass::Uniform, Decoration::BufferBlock)
        };
        let words = b.type_runtime_array(uint);
        b.decorate(words, Decoration::ArrayStride, [Operand::LiteralBit32(4)]);
        let (shared_memory_type, shared_memory) = declare_block(
            &mut b,
            &[(words, 0)],
            shared_memory_block,
            shared_memory_class,
            DescriptorSet::SharedMemoryAndEdram,
            "shared_memory",
        );
        b.member_decorate(shared_memory_type, 0, Decoration::NonWritable, []);

        let mut interface_resources = vec![bool_loop_constants, fetch_constants, shared_memory];
        interface_resources.extend(float_constants);
        let mut interface_io = Vec::new();

        //---------------------------------------------------------------------
        // Vertex stage inputs and outputs
        //---------------------------------------------------------------------

        let mut vertex_index = None;
        let mut per_vertex = None;
        if info.shader_type == ShaderType::Vertex {
            let input = b.pointer_type(StorageClass::Input, int);
            let var = b.variable(input, None, StorageClass::Input, None);
            b.decorate(var, Decoration::BuiltIn, [Operand::BuiltIn(BuiltIn::VertexIndex)]);
            b.debug_name(var, "gl_VertexIndex");
            interface_io.push(var);
            vertex_index = Some(var);

            if features.clip_distance {
                b.capability(Capability::ClipDistance);
            }
            if features.cull_distance {
                b.capability(Capability::CullDistance);
            }
            let clip_distance = b.array_type(float, if features.clip_distance { 6 } else { 1 }, None);
            let cull_distance = b.array_type(float, 1, None);
            let block = b.type_struct([float4, float, clip_distance, cull_distance]);
            let members = [
                ("gl_Position", BuiltIn::Position, true),
                ("gl_PointSize", BuiltIn::PointSize, false),
                ("gl_ClipDistance", BuiltIn::ClipDistance, true),
                ("gl_CullDistance", BuiltIn::CullDistance, true),
            ];
            for (i, (name, builtin, invariant)) in members.into_iter().enumerate() {
                let i = i as u32;
                b.debug_member_name(block, i, name);
                if invariant {
                    b.member_decorate(block, i, Decoration::Invariant, []);
                }
                b.member_decorate(block, i, Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
            }
            b.decorate(block, Decoration::Block, []);
            b.debug_name(block, "gl_PerVertex");
            let output = b.pointer_type(StorageClass::Output, block);
            let var = b.variable(output, None, StorageClass::Output, None);
            interface_io.push(var);
            per_vertex = Some(var);
        }

        //---------------------------------------------------------------------
        // Main function and its variables
        //---------------------------------------------------------------------

        let void = b.types.void;
        let function_type = b.type_function(void, vec![]);
        let main_function = b.begin_function(void, None, FunctionControl::NONE, function_type)?;
        b.debug_name(main_function, "main");
        b.begin_block(None)?;

        let function_variable = |b: &mut ModuleBuilder, ty: Word, init: Word, name: &str| {
            let pointer = b.pointer_type(StorageClass::Function, ty);
            let var = b.variable(pointer, None, StorageClass::Function, Some(init));
            b.debug_name(var, name);
            var
        };
        let init = b.bool_constant(false);
        let var_predicate = function_variable(&mut b, boolean, init, "predicate");
        let init = b.uint_splat(0, 4);
        let var_loop_count = function_variable(&mut b, uint4, init, "loop_count");
        let init = b.int_constant(0);
        let var_address_absolute = function_variable(&mut b, int, init, "address_absolute");
        let init = b.int_splat(0, 4);
        let var_address_relative = function_variable(&mut b, int4, init, "address_relative");
        let var_registers = if info.register_count > 0 {
            let array = b.array_type(float4, info.register_count, None);
            let zero = b.float_splat(0.0, 4);
            let init = b.composite_constant(array, vec![zero; info.register_count as usize]);
            Some(function_variable(&mut b, array, init, "registers"))
        } else {
            None
        };
        let var_point_size_edge_flag_kill_vertex = if info.shader_type == ShaderType::Vertex {
            let init = b.float_splat(0.0, 3);
            Some(function_variable(&mut b, float3, init, "point_size_edge_flag_kill_vertex"))
        } else {
            None
        };

        // r0.x is the vertex index.
        if let (Some(vertex_index), Some(registers)) = (vertex_index, var_registers) {
            let index = b.load(int, None, vertex_index, None, [])?;
            let index = b.convert_s_to_f(float, None, index)?;
            let pointer = b.pointer_type(StorageClass::Function, float);
            let zero = b.int_constant(0);
            let r0_x = b.access_chain(pointer, None, registers, [zero, zero])?;
            b.store(r0_x, index, None, [])?;
        }

        let dispatch = Dispatch::open(&mut b, !info.label_addresses.is_empty())?;

        Ok(Self {
            info,
            features,
            b,
            main_function,
            float_constants,
            bool_loop_constants,
            fetch_constants,
            shared_memory,
            shared_memory_class,
            interface_io,
            interface_resources,
            per_vertex,
            var_predicate,
            var_loop_count,
            var_address_absolute,
            var_address_relative,
            var_registers,
            var_point_size_edge_flag_kill_vertex,
            conditional: Conditional::Closed,
            predicate_written: false,
            dispatch,
            open_loops: 0,
        })
    }

    fn complete(mut self) -> Result<Vec<u32>> {
        self.finish_control_flow()?;

        if let (Some(per_vertex), Some(point_size)) =
            (self.per_vertex, self.var_point_size_edge_flag_kill_vertex)
        {
            let float = self.b.types.float;
            let zero = self.b.int_constant(0);
            let one = self.b.int_constant(1);
            let function_pointer = self.b.pointer_type(StorageClass::Function, float);
            let output_pointer = self.b.pointer_type(StorageClass::Output, float);
            let source = self
                .b
                .access_chain(function_pointer, None, point_size, [zero])?;
            let value = self.b.load(float, None, source, None, [])?;
            let target = self
                .b
                .access_chain(output_pointer, None, per_vertex, [one])?;
            self.b.store(target, value, None, [])?;
        }

        self.b.ret()?;
        self.b.end_function()?;

        let model = match self.info.shader_type {
            ShaderType::Vertex => ExecutionModel::Vertex,
            ShaderType::Pixel => ExecutionModel::Fragment,
        };
        // From 1.4 the interface lists every global the entry point uses.
        let mut interface = self.interface_io.clone();
        if self.features.spirv_version >= SpirvVersion::V1_4 {
            interface.extend(self.interface_resources.iter().copied());
        }
        self.b
            .entry_point(model, self.main_function, "main", interface);
        if self.info.shader_type == ShaderType::Pixel {
            self.b
                .execution_mode(self.main_function, ExecutionMode::OriginUpperLeft, []);
        }
        if self.features.float_controls {
            if self.features.spirv_version < SpirvVersion::V1_4 {
                self.b.extension("SPV_KHR_float_controls");
            }
            self.b.capability(Capability::SignedZeroInfNanPreserve);
            self.b.execution_mode(
                self.main_function,
                ExecutionMode::SignedZeroInfNanPreserve,
                [32],
            );
        }

        Ok(self.b.finish())
    }
}

/// Xenos shader translator
///
/// One instance translates one shader at a time. The first error poisons the
/// instance: every later call returns that error and no module is emitted.
pub struct ShaderTranslator {
    features: Features,
    debug: DebugConfig,
    translation: Option<Translation>,
    failure: Option<TranslatorError>,
}

impl ShaderTranslator {
    pub fn new(config: &TranslatorConfig) -> Self {
        Self {
            features: config.features,
            debug: config.debug.clone(),
            translation: None,
            failure: None,
        }
    }

    pub fn with_features(features: Features) -> Self {
        Self::new(&TranslatorConfig {
            features,
            ..TranslatorConfig::default()
        })
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// A callback failed and this instance can't produce a module anymore.
    pub fn is_poisoned(&self) -> bool {
        self.failure.is_some()
    }

    pub fn is_translating(&self) -> bool {
        self.translation.is_some()
    }

    fn poison(&mut self, err: TranslatorError) -> TranslatorError {
        error!("Shader translation failed: {}", err);
        self.translation = None;
        self.failure = Some(err.clone());
        err
    }

    fn with_translation<T>(&mut self, f: impl FnOnce(&mut Translation) -> Result<T>) -> Result<T> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let Some(translation) = self.translation.as_mut() else {
            return Err(self.poison(ControlFlowError::NotStarted.into()));
        };
        f(translation).map_err(|err| self.poison(err))
    }

    /// Begin a shader: declares resources, variables and the dispatch loop.
    pub fn start_translation(&mut self, info: ShaderInfo) -> Result<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if self.translation.is_some() {
            return Err(self.poison(ControlFlowError::AlreadyStarted.into()));
        }
        debug!(
            "Translating {:?} shader: {} registers, {} float constants, {} labels",
            info.shader_type,
            info.register_count,
            info.float_constant_count,
            info.label_addresses.len()
        );
        match Translation::new(info, self.features, self.debug.emit_debug_names) {
            Ok(translation) => {
                self.translation = Some(translation);
                Ok(())
            }
            Err(err) => Err(self.poison(err)),
        }
    }

    pub fn process_label(&mut self, address: u32) -> Result<()> {
        self.with_translation(|t| t.label(address))
    }

    pub fn process_exec_begin(&mut self, exec: &ExecInstruction) -> Result<()> {
        self.with_translation(|t| t.exec_begin(exec))
    }

    pub fn process_exec_end(&mut self, exec: &ExecInstruction) -> Result<()> {
        self.with_translation(|t| t.exec_end(exec))
    }

    pub fn process_loop_start(&mut self, instr: &LoopStartInstruction) -> Result<()> {
        self.with_translation(|t| t.loop_start(instr))
    }

    pub fn process_loop_end(&mut self, instr: &LoopEndInstruction) -> Result<()> {
        self.with_translation(|t| t.loop_end(instr))
    }

    pub fn process_jump(&mut self, instr: &JumpInstruction) -> Result<()> {
        self.with_translation(|t| t.jump(instr))
    }

    pub fn process_alu(&mut self, instr: &AluInstruction) -> Result<()> {
        self.with_translation(|t| t.alu(instr))
    }

    pub fn process_vertex_fetch(&mut self, instr: &VertexFetchInstruction) -> Result<()> {
        self.with_translation(|t| t.vertex_fetch(instr))
    }

    /// Texture sampling isn't translated; the result is written as zeros.
    pub fn process_texture_fetch(&mut self, instr: &TextureFetchInstruction) -> Result<()> {
        self.with_translation(|t| {
            warn!("Texture fetch not translated, writing zeros");
            t.update_instruction_predication(instr.is_predicated, instr.predicate_condition)?;
            t.store_result(&instr.result, None)
        })
    }

    /// Finish the shader and return the SPIR-V module bytes.
    pub fn complete_translation(&mut self) -> Result<Vec<u8>> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let Some(translation) = self.translation.take() else {
            return Err(self.poison(ControlFlowError::NotStarted.into()));
        };
        let shader_type = translation.info.shader_type;
        let words = translation.complete().map_err(|err| self.poison(err))?;
        if self.debug.validate_structure {
            validate::check_module(&words).map_err(|err| self.poison(err))?;
        }
        debug!("Translated {:?} shader: {} words", shader_type, words.len());
        Ok(bytemuck::cast_slice(&words).to_vec())
    }
}
