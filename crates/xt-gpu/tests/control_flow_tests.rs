//! Control flow lowering: exec coalescing, predication, jumps and loops

use rspirv::dr::{Module, Operand};
use rspirv::spirv::Op;
use xt_core::{ControlFlowError, Features, TranslatorConfig, TranslatorError};
use xt_gpu::shader::validate::{check_parsed, parse_module, words_from_bytes};
use xt_gpu::shader::*;
use xt_gpu::xenos::ShaderType;

fn add(dst: u32) -> Instruction {
    Instruction::Alu(AluInstruction::new(
        AluVectorOpcode::Add,
        vec![InstructionOperand::register(0), InstructionOperand::register(1)],
        InstructionResult::register(dst, 0b1111),
    ))
}

fn setp_eq() -> Instruction {
    Instruction::Alu(AluInstruction::new(
        AluVectorOpcode::SetpEqPush,
        vec![InstructionOperand::register(0), InstructionOperand::register(1)],
        InstructionResult::default(),
    ))
}

fn exec(exec: ExecInstruction, body: Vec<Instruction>) -> Instruction {
    Instruction::Exec { exec, body }
}

fn jump(target_address: u32) -> Instruction {
    Instruction::Jump(JumpInstruction {
        jump_type: ExecType::Unconditional,
        bool_constant_index: 0,
        condition: false,
        target_address,
    })
}

fn program(shader_type: ShaderType, instructions: Vec<Instruction>) -> ShaderProgram {
    ShaderProgram {
        instructions,
        ..ShaderProgram::new(shader_type, 4, 8)
    }
}

fn translate(program: &ShaderProgram) -> Module {
    let bytes = program.translate(&TranslatorConfig::default()).unwrap();
    parse_module(&words_from_bytes(&bytes)).unwrap()
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

#[test]
fn test_straight_line_shader() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![exec(ExecInstruction::unconditional().ending(), vec![add(2)])],
    ));
    let summary = check_parsed(&module).unwrap();
    assert_eq!(summary.loop_merges, 1);
    assert_eq!(summary.selection_merges, 0);
    assert_eq!(summary.switch_cases, 0);
    assert_eq!(count_ops(&module, Op::FAdd), 1);
}

#[test]
fn test_matching_execs_share_one_conditional() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![
            exec(ExecInstruction::conditional(5, true), vec![add(2)]),
            exec(ExecInstruction::conditional(5, true), vec![add(3)]),
        ],
    ));
    assert_eq!(check_parsed(&module).unwrap().selection_merges, 1);
}

#[test]
fn test_different_condition_opens_new_conditional() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![
            exec(ExecInstruction::conditional(5, true), vec![add(2)]),
            exec(ExecInstruction::conditional(5, false), vec![add(3)]),
            exec(ExecInstruction::conditional(6, false), vec![add(3)]),
        ],
    ));
    assert_eq!(check_parsed(&module).unwrap().selection_merges, 3);
}

#[test]
fn test_predicate_write_splits_execs() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![
            exec(ExecInstruction::predicated(true), vec![setp_eq()]),
            exec(ExecInstruction::predicated(true), vec![add(2)]),
        ],
    ));
    assert_eq!(check_parsed(&module).unwrap().selection_merges, 2);
}

#[test]
fn test_instruction_predicate_reuses_exec_check() {
    let predicated_add = |condition| match add(2) {
        Instruction::Alu(alu) => Instruction::Alu(alu.predicated(condition)),
        other => other,
    };

    let same = translate(&program(
        ShaderType::Pixel,
        vec![exec(ExecInstruction::predicated(true), vec![predicated_add(true)])],
    ));
    assert_eq!(check_parsed(&same).unwrap().selection_merges, 1);

    let opposite = translate(&program(
        ShaderType::Pixel,
        vec![exec(ExecInstruction::predicated(true), vec![predicated_add(false)])],
    ));
    assert_eq!(check_parsed(&opposite).unwrap().selection_merges, 2);
}

#[test]
fn test_jump_builds_dispatch_switch() {
    let module = translate(&program(
        ShaderType::Vertex,
        vec![
            exec(ExecInstruction::unconditional(), vec![add(2)]),
            jump(4),
            exec(ExecInstruction::unconditional(), vec![add(3)]),
            Instruction::Label(4),
            exec(ExecInstruction::unconditional().ending(), vec![add(1)]),
        ],
    ));
    let summary = check_parsed(&module).unwrap();
    assert_eq!(summary.switch_cases, 2);
    assert_eq!(summary.loop_merges, 1);
    // The loop header and continue block each merge program counters.
    assert_eq!(count_ops(&module, Op::Phi), 2);
}

#[test]
fn test_labels_without_jumps() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![
            Instruction::Label(0),
            exec(ExecInstruction::unconditional(), vec![add(2)]),
            Instruction::Label(2),
            exec(ExecInstruction::unconditional().ending(), vec![add(3)]),
        ],
    ));
    assert_eq!(check_parsed(&module).unwrap().switch_cases, 2);
    assert_eq!(count_ops(&module, Op::CopyObject), 1);
}

#[test]
fn test_counted_loop() {
    let module = translate(&program(
        ShaderType::Vertex,
        vec![
            Instruction::LoopStart(LoopStartInstruction {
                loop_constant_index: 3,
                is_repeat: false,
                loop_skip_address: 3,
            }),
            Instruction::Label(1),
            exec(ExecInstruction::unconditional(), vec![add(2)]),
            Instruction::LoopEnd(LoopEndInstruction {
                loop_constant_index: 3,
                is_predicated_break: true,
                predicate_condition: true,
                loop_body_address: 1,
            }),
            Instruction::Label(3),
            exec(ExecInstruction::unconditional().ending(), vec![add(3)]),
        ],
    ));
    let summary = check_parsed(&module).unwrap();
    assert_eq!(summary.switch_cases, 3);
    // Dispatch switch, loop start skip check and loop end break check.
    assert_eq!(summary.selection_merges, 3);
    assert_eq!(count_ops(&module, Op::BitFieldSExtract), 1);
    assert!(count_ops(&module, Op::LogicalOr) >= 1);
}

#[test]
fn test_kill_only_in_pixel_shaders() {
    let kill = || {
        Instruction::Alu(AluInstruction::new(
            AluVectorOpcode::KillGt,
            vec![InstructionOperand::register(0), InstructionOperand::float_constant(1)],
            InstructionResult::default(),
        ))
    };
    let pixel = translate(&program(
        ShaderType::Pixel,
        vec![exec(ExecInstruction::unconditional(), vec![kill()])],
    ));
    assert_eq!(check_parsed(&pixel).unwrap().kills, 1);
    assert_eq!(count_ops(&pixel, Op::Any), 1);

    let vertex = translate(&program(
        ShaderType::Vertex,
        vec![exec(ExecInstruction::unconditional(), vec![kill()])],
    ));
    assert_eq!(check_parsed(&vertex).unwrap().kills, 0);
}

#[test]
fn test_switch_cases_match_labels() {
    let module = translate(&program(
        ShaderType::Pixel,
        vec![
            jump(7),
            Instruction::Label(5),
            jump(9),
            Instruction::Label(7),
            jump(5),
            Instruction::Label(9),
        ],
    ));
    let switch = module
        .functions
        .iter()
        .flat_map(|f| f.blocks.iter())
        .flat_map(|b| b.instructions.iter())
        .find(|inst| inst.class.opcode == Op::Switch)
        .unwrap();
    let mut values: Vec<u32> = switch.operands[2..]
        .chunks(2)
        .filter_map(|pair| match pair[0] {
            Operand::LiteralBit32(v) => Some(v),
            _ => None,
        })
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 5, 7, 9]);
}

//=============================================================================
// Malformed control flow
//=============================================================================

fn translate_err(program: &ShaderProgram) -> TranslatorError {
    program.translate(&TranslatorConfig::default()).unwrap_err()
}

#[test]
fn test_jump_to_unknown_label() {
    let err = translate_err(&program(ShaderType::Pixel, vec![jump(6), Instruction::Label(2)]));
    assert_eq!(err, ControlFlowError::UnknownLabel { target: 6 }.into());
}

#[test]
fn test_loop_end_without_start() {
    let err = translate_err(&program(
        ShaderType::Pixel,
        vec![
            Instruction::Label(1),
            Instruction::LoopEnd(LoopEndInstruction {
                loop_constant_index: 0,
                is_predicated_break: false,
                predicate_condition: false,
                loop_body_address: 1,
            }),
        ],
    ));
    assert_eq!(err, ControlFlowError::UnbalancedLoopEnd { loop_constant: 0 }.into());
}

#[test]
fn test_unclosed_loop() {
    let err = translate_err(&program(
        ShaderType::Pixel,
        vec![
            Instruction::LoopStart(LoopStartInstruction {
                loop_constant_index: 0,
                is_repeat: true,
                loop_skip_address: 2,
            }),
            Instruction::Label(2),
        ],
    ));
    assert_eq!(err, ControlFlowError::UnclosedLoop { open: 1 }.into());
}

#[test]
fn test_duplicate_label_poisons() {
    let mut translator = ShaderTranslator::with_features(Features::default());
    translator
        .start_translation(ShaderInfo::new(ShaderType::Pixel, 2, 0).with_labels([3]))
        .unwrap();
    translator.process_label(3).unwrap();
    let err = translator.process_label(3).unwrap_err();
    assert_eq!(err, ControlFlowError::DuplicateLabel { address: 3 }.into());
    assert!(translator.is_poisoned());
    assert_eq!(translator.complete_translation().unwrap_err(), err);
}

#[test]
fn test_declared_label_never_reached() {
    let mut translator = ShaderTranslator::with_features(Features::default());
    translator
        .start_translation(ShaderInfo::new(ShaderType::Pixel, 2, 0).with_labels([3]))
        .unwrap();
    let err = translator.complete_translation().unwrap_err();
    assert_eq!(err, ControlFlowError::UnknownLabel { target: 3 }.into());
}
