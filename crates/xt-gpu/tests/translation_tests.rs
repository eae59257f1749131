//! Tests for whole-module translation: stages, resources, features and fetch

use std::collections::HashSet;

use rspirv::dr::{Instruction as SpirvInstruction, Module, Operand};
use rspirv::spirv::{
    Capability, Decoration, ExecutionMode, ExecutionModel, Op, StorageClass, Word,
};
use xt_core::{Features, SpirvVersion, TranslatorConfig, TranslatorError, UnsupportedError};
use xt_gpu::shader::builder::GENERATOR_ID;
use xt_gpu::shader::validate::{check_module, parse_module, words_from_bytes};
use xt_gpu::shader::*;
use xt_gpu::vertex::VertexFormat;
use xt_gpu::xenos::ShaderType;

fn config(features: Features) -> TranslatorConfig {
    TranslatorConfig {
        features,
        ..TranslatorConfig::default()
    }
}

fn translate_words(program: &ShaderProgram, features: Features) -> Vec<u32> {
    let bytes = program.translate(&config(features)).unwrap();
    assert_eq!(bytes.len() % 4, 0);
    words_from_bytes(&bytes)
}

fn translate(program: &ShaderProgram, features: Features) -> Module {
    parse_module(&translate_words(program, features)).unwrap()
}

fn single_exec(shader_type: ShaderType, body: Vec<Instruction>) -> ShaderProgram {
    let mut program = ShaderProgram::new(shader_type, 4, 16);
    program.push(Instruction::Exec {
        exec: ExecInstruction::unconditional().ending(),
        body,
    });
    program
}

fn count_ops(module: &Module, op: Op) -> usize {
    module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .filter(|inst| inst.class.opcode == op)
        .count()
}

fn capabilities(module: &Module) -> Vec<Capability> {
    module
        .capabilities
        .iter()
        .filter_map(|inst| match inst.operands.first() {
            Some(Operand::Capability(cap)) => Some(*cap),
            _ => None,
        })
        .collect()
}

fn extensions(module: &Module) -> Vec<String> {
    module
        .extensions
        .iter()
        .filter_map(|inst| match inst.operands.first() {
            Some(Operand::LiteralString(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn execution_modes(module: &Module) -> Vec<ExecutionMode> {
    module
        .execution_modes
        .iter()
        .filter_map(|inst| match inst.operands.get(1) {
            Some(Operand::ExecutionMode(mode)) => Some(*mode),
            _ => None,
        })
        .collect()
}

/// Number of ids in the entry point interface list.
fn interface_len(module: &Module) -> usize {
    module.entry_points[0].operands.len() - 3
}

fn global_storage_classes(module: &Module) -> Vec<StorageClass> {
    module
        .types_global_values
        .iter()
        .filter(|inst| inst.class.opcode == Op::Variable)
        .filter_map(|inst| match inst.operands.first() {
            Some(Operand::StorageClass(class)) => Some(*class),
            _ => None,
        })
        .collect()
}

fn global(module: &Module, id: Word) -> Option<&SpirvInstruction> {
    module
        .types_global_values
        .iter()
        .find(|inst| inst.result_id == Some(id))
}

fn id_operand(operand: Option<&Operand>) -> Option<Word> {
    match operand {
        Some(Operand::IdRef(id)) => Some(*id),
        _ => None,
    }
}

/// `id` is a float constant vector of `components` zeros.
fn is_float_zero_vector(module: &Module, id: Word, components: usize) -> bool {
    let Some(composite) = global(module, id) else {
        return false;
    };
    composite.class.opcode == Op::ConstantComposite
        && composite.operands.len() == components
        && composite.operands.iter().all(|operand| {
            id_operand(Some(operand))
                .and_then(|id| global(module, id))
                .is_some_and(|constant| {
                    constant.class.opcode == Op::Constant
                        && constant.operands == [Operand::LiteralBit32(0.0f32.to_bits())]
                        && constant
                            .result_type
                            .and_then(|ty| global(module, ty))
                            .is_some_and(|ty| ty.class.opcode == Op::TypeFloat)
                })
        })
}

fn mov(dst: InstructionResult, src: InstructionOperand) -> Instruction {
    Instruction::Alu(AluInstruction::new(AluVectorOpcode::Max, vec![src, src], dst))
}

#[test]
fn test_empty_pixel_shader() {
    let program = ShaderProgram::new(ShaderType::Pixel, 0, 0);
    let words = translate_words(&program, Features::default());
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[1], 0x0001_0000);
    assert_eq!(words[2], GENERATOR_ID);

    let summary = check_module(&words).unwrap();
    assert_eq!(summary.functions, 1);
    assert_eq!(summary.loop_merges, 1);

    let module = parse_module(&words).unwrap();
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(
        module.entry_points[0].operands[0],
        Operand::ExecutionModel(ExecutionModel::Fragment)
    );
    assert_eq!(
        module.entry_points[0].operands[2],
        Operand::LiteralString("main".to_string())
    );
    assert_eq!(execution_modes(&module), vec![ExecutionMode::OriginUpperLeft]);
    // No inputs or outputs, and resources are only listed from 1.4.
    assert_eq!(interface_len(&module), 0);
}

#[test]
fn test_empty_vertex_shader() {
    let program = ShaderProgram::new(ShaderType::Vertex, 1, 0);
    let module = translate(&program, Features::default());
    assert_eq!(
        module.entry_points[0].operands[0],
        Operand::ExecutionModel(ExecutionModel::Vertex)
    );
    assert!(execution_modes(&module).is_empty());
    // gl_VertexIndex and gl_PerVertex.
    assert_eq!(interface_len(&module), 2);
    // r0.x receives the vertex index.
    assert_eq!(count_ops(&module, Op::ConvertSToF), 1);
    let classes = global_storage_classes(&module);
    assert!(classes.contains(&StorageClass::Input));
    assert!(classes.contains(&StorageClass::Output));
}

#[test]
fn test_version_word() {
    let program = ShaderProgram::new(ShaderType::Pixel, 0, 0);
    let words = translate_words(&program, Features::all(SpirvVersion::V1_5));
    assert_eq!(words[1], 0x0001_0500);
}

#[test]
fn test_shared_memory_storage_class() {
    let program = ShaderProgram::new(ShaderType::Pixel, 0, 0);

    let old = translate(&program, Features::default());
    let classes = global_storage_classes(&old);
    assert!(!classes.contains(&StorageClass::StorageBuffer));
    // Bool/loop constants, fetch constants and shared memory.
    assert_eq!(classes.iter().filter(|&&c| c == StorageClass::Uniform).count(), 3);

    let features = Features {
        spirv_version: SpirvVersion::V1_3,
        ..Features::default()
    };
    let new = translate(&program, features);
    let classes = global_storage_classes(&new);
    assert_eq!(classes.iter().filter(|&&c| c == StorageClass::StorageBuffer).count(), 1);
    assert_eq!(interface_len(&new), 0);
}

#[test]
fn test_interface_lists_resources_from_1_4() {
    let program = ShaderProgram::new(ShaderType::Vertex, 2, 8);
    let features = Features {
        spirv_version: SpirvVersion::V1_4,
        ..Features::default()
    };
    let module = translate(&program, features);
    // Two stage variables, four resource blocks.
    assert_eq!(interface_len(&module), 6);
}

#[test]
fn test_float_controls() {
    let program = ShaderProgram::new(ShaderType::Pixel, 0, 0);

    let features = Features {
        float_controls: true,
        ..Features::default()
    };
    let module = translate(&program, features);
    assert!(capabilities(&module).contains(&Capability::SignedZeroInfNanPreserve));
    assert_eq!(extensions(&module), vec!["SPV_KHR_float_controls".to_string()]);
    assert!(execution_modes(&module).contains(&ExecutionMode::SignedZeroInfNanPreserve));

    let module = translate(&program, Features::all(SpirvVersion::V1_4));
    assert!(capabilities(&module).contains(&Capability::SignedZeroInfNanPreserve));
    assert!(extensions(&module).is_empty());

    let module = translate(&program, Features::default());
    assert!(!capabilities(&module).contains(&Capability::SignedZeroInfNanPreserve));
}

#[test]
fn test_clip_and_cull_capabilities() {
    let program = ShaderProgram::new(ShaderType::Vertex, 1, 0);

    let module = translate(&program, Features::all(SpirvVersion::V1_0));
    let caps = capabilities(&module);
    assert!(caps.contains(&Capability::ClipDistance));
    assert!(caps.contains(&Capability::CullDistance));

    let module = translate(&program, Features::default());
    let caps = capabilities(&module);
    assert!(!caps.contains(&Capability::ClipDistance));
    assert!(!caps.contains(&Capability::CullDistance));

    // Pixel shaders have no per-vertex outputs.
    let pixel = ShaderProgram::new(ShaderType::Pixel, 1, 0);
    let module = translate(&pixel, Features::all(SpirvVersion::V1_0));
    assert!(!capabilities(&module).contains(&Capability::ClipDistance));
}

#[test]
fn test_register_array_has_no_stride() {
    // Registers and float constants are both float4[8] here.
    let program = ShaderProgram::new(ShaderType::Pixel, 8, 8);
    let module = translate(&program, Features::default());

    let strided: HashSet<Word> = module
        .annotations
        .iter()
        .filter(|inst| inst.operands.get(1) == Some(&Operand::Decoration(Decoration::ArrayStride)))
        .filter_map(|inst| id_operand(inst.operands.first()))
        .collect();
    assert!(!strided.is_empty());

    let function_arrays: Vec<Word> = module.functions[0].blocks[0]
        .instructions
        .iter()
        .filter(|inst| inst.class.opcode == Op::Variable)
        .filter_map(|inst| inst.result_type)
        .filter_map(|pointer| global(&module, pointer).and_then(|p| id_operand(p.operands.get(1))))
        .filter(|&ty| global(&module, ty).is_some_and(|inst| inst.class.opcode == Op::TypeArray))
        .collect();
    assert_eq!(function_arrays.len(), 1);
    assert!(!strided.contains(&function_arrays[0]));
}

#[test]
fn test_position_export() {
    let program = single_exec(
        ShaderType::Vertex,
        vec![mov(InstructionResult::position(0b1111), InstructionOperand::float_constant(3))],
    );
    let module = translate(&program, Features::default());
    check_module(&translate_words(&program, Features::default())).unwrap();
    assert!(count_ops(&module, Op::Store) >= 2);
}

#[test]
fn test_clamped_result_uses_nclamp() {
    let program = single_exec(
        ShaderType::Pixel,
        vec![Instruction::Alu(AluInstruction::new(
            AluVectorOpcode::Mul,
            vec![InstructionOperand::register(0), InstructionOperand::float_constant(2).negated()],
            InstructionResult::register(1, 0b0111).clamped(),
        ))],
    );
    let module = translate(&program, Features::default());
    assert_eq!(count_ops(&module, Op::FMul), 1);
    assert!(count_ops(&module, Op::FNegate) >= 1);
    assert!(count_ops(&module, Op::ExtInst) >= 1);
}

#[test]
fn test_cube_is_unsupported() {
    let program = single_exec(
        ShaderType::Pixel,
        vec![Instruction::Alu(AluInstruction::new(
            AluVectorOpcode::Cube,
            vec![InstructionOperand::register(0), InstructionOperand::register(1)],
            InstructionResult::register(2, 0b1111),
        ))],
    );
    let err = program.translate(&TranslatorConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        TranslatorError::Unsupported(UnsupportedError::AluVectorOpcode(_))
    ));
}

#[test]
fn test_texture_fetch_writes_zero() {
    let program = single_exec(
        ShaderType::Pixel,
        vec![Instruction::TextureFetch(TextureFetchInstruction {
            is_predicated: false,
            predicate_condition: false,
            result: InstructionResult::register(1, 0b1111),
        })],
    );
    let words = translate_words(&program, Features::default());
    check_module(&words).unwrap();
}

//=============================================================================
// Vertex fetch
//=============================================================================

fn vertex_fetch(attributes: VertexFetchAttributes, write_mask: u32) -> Instruction {
    Instruction::VertexFetch(VertexFetchInstruction {
        is_predicated: false,
        predicate_condition: false,
        index_operand: InstructionOperand::register(0),
        fetch_constant_index: 0,
        result: InstructionResult::register(1, write_mask),
        attributes,
    })
}

#[test]
fn test_fetch_unorm8() {
    let attributes = VertexFetchAttributes {
        stride: 1,
        ..VertexFetchAttributes::new(VertexFormat::K8_8_8_8)
    };
    let program = single_exec(ShaderType::Vertex, vec![vertex_fetch(attributes, 0b1111)]);
    let module = translate(&program, Features::default());
    assert_eq!(count_ops(&module, Op::BitFieldUExtract), 4);
    assert_eq!(count_ops(&module, Op::ConvertUToF), 1);
    assert_eq!(count_ops(&module, Op::ConvertFToS), 1);
    assert_eq!(count_ops(&module, Op::VectorTimesScalar), 1);
    // Endian swap selects between swapped and unswapped values.
    assert_eq!(count_ops(&module, Op::Select), 2);
}

#[test]
fn test_fetch_snorm_mixed_widths() {
    let attributes = VertexFetchAttributes {
        is_signed: true,
        stride: 1,
        ..VertexFetchAttributes::new(VertexFormat::K2_10_10_10)
    };
    let program = single_exec(ShaderType::Vertex, vec![vertex_fetch(attributes, 0b1111)]);
    let module = translate(&program, Features::default());
    assert_eq!(count_ops(&module, Op::BitFieldSExtract), 4);
    assert_eq!(count_ops(&module, Op::ConvertSToF), 2);
    assert_eq!(count_ops(&module, Op::VectorTimesScalar), 0);
}

#[test]
fn test_fetch_float_zero_stride() {
    let attributes = VertexFetchAttributes::new(VertexFormat::K32_32Float);
    let program = single_exec(ShaderType::Vertex, vec![vertex_fetch(attributes, 0b0011)]);
    let module = translate(&program, Features::default());
    // The index isn't read when every vertex shares the data.
    assert_eq!(count_ops(&module, Op::ConvertFToS), 0);
    assert_eq!(count_ops(&module, Op::Bitcast), 2);
}

#[test]
fn test_fetch_pads_missing_components_with_zero() {
    let attributes = VertexFetchAttributes::new(VertexFormat::K32_32Float);
    let program = single_exec(ShaderType::Vertex, vec![vertex_fetch(attributes, 0b1111)]);
    let module = translate(&program, Features::default());

    let padded: Vec<&SpirvInstruction> = module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .filter(|inst| inst.class.opcode == Op::CompositeConstruct && inst.operands.len() == 2)
        .filter(|inst| {
            id_operand(inst.operands.get(1)).is_some_and(|id| is_float_zero_vector(&module, id, 2))
        })
        .collect();
    assert_eq!(padded.len(), 1);

    // X and Y come straight from the reinterpreted words, Z and W follow as zeros.
    let decoded = id_operand(padded[0].operands.first()).unwrap();
    let bitcast = module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .find(|inst| inst.result_id == Some(decoded))
        .unwrap();
    assert_eq!(bitcast.class.opcode, Op::Bitcast);
}

#[test]
fn test_fetch_only_constant_components() {
    use SwizzleSource::*;
    let attributes = VertexFetchAttributes {
        stride: 4,
        ..VertexFetchAttributes::new(VertexFormat::K32_32_32_32Float)
    };
    let instruction = Instruction::VertexFetch(VertexFetchInstruction {
        is_predicated: false,
        predicate_condition: false,
        index_operand: InstructionOperand::register(0),
        fetch_constant_index: 3,
        result: InstructionResult::register(1, 0b1111).with_swizzle([Zero, One, Zero, One]),
        attributes,
    });
    let program = single_exec(ShaderType::Vertex, vec![instruction]);
    let module = translate(&program, Features::default());
    assert_eq!(count_ops(&module, Op::ShiftRightLogical), 0);
    assert_eq!(count_ops(&module, Op::ConvertFToS), 0);
}

#[test]
fn test_fetch_undefined_format() {
    let attributes = VertexFetchAttributes::new(VertexFormat::Undefined);
    let program = single_exec(ShaderType::Vertex, vec![vertex_fetch(attributes, 0b1111)]);
    let err = program.translate(&TranslatorConfig::default()).unwrap_err();
    assert_eq!(err, UnsupportedError::VertexFormat(63).into());
}
