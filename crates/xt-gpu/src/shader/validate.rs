//! Structural self-check of translated modules
//!
//! Not a replacement for spirv-val: this parses the module back and checks
//! the block structure the translator is responsible for. Every block ends in
//! a terminator, merge and continue targets name blocks of the same function,
//! and switch case literals are unique.

use std::collections::HashSet;

use rspirv::dr::{load_words, Module, Operand};
use rspirv::spirv::{Op, Word};
use xt_core::{Result, TranslatorError};

/// Counts gathered while checking a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleSummary {
    pub functions: usize,
    pub blocks: usize,
    pub selection_merges: usize,
    pub loop_merges: usize,
    pub switch_cases: usize,
    pub kills: usize,
}

/// Reinterpret little-endian module bytes as words.
///
/// Trailing bytes that don't fill a word are ignored.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Parse a module from words.
pub fn parse_module(words: &[u32]) -> Result<Module> {
    load_words(words).map_err(|err| TranslatorError::Builder(format!("unparsable module: {:?}", err)))
}

fn is_terminator(op: Op) -> bool {
    matches!(
        op,
        Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable
    )
}

fn id_operand(operand: Option<&Operand>) -> Option<Word> {
    match operand {
        Some(Operand::IdRef(id)) => Some(*id),
        _ => None,
    }
}

fn fail(message: String) -> TranslatorError {
    TranslatorError::Builder(message)
}

/// Check the structure of a parsed module.
pub fn check_parsed(module: &Module) -> Result<ModuleSummary> {
    let mut summary = ModuleSummary {
        functions: module.functions.len(),
        ..ModuleSummary::default()
    };

    for function in &module.functions {
        let labels: HashSet<Word> = function
            .blocks
            .iter()
            .filter_map(|block| block.label.as_ref().and_then(|label| label.result_id))
            .collect();
        summary.blocks += function.blocks.len();

        for block in &function.blocks {
            let label = block.label.as_ref().and_then(|l| l.result_id).unwrap_or(0);
            match block.instructions.last() {
                Some(last) if is_terminator(last.class.opcode) => {}
                _ => return Err(fail(format!("block %{} is not terminated", label))),
            }

            for inst in &block.instructions {
                match inst.class.opcode {
                    Op::SelectionMerge | Op::LoopMerge => {
                        let targets = if inst.class.opcode == Op::LoopMerge { 2 } else { 1 };
                        for operand in inst.operands.iter().take(targets) {
                            let target = id_operand(Some(operand));
                            if !target.is_some_and(|t| labels.contains(&t)) {
                                return Err(fail(format!(
                                    "merge in block %{} names a missing block {:?}",
                                    label, operand
                                )));
                            }
                        }
                        if inst.class.opcode == Op::LoopMerge {
                            summary.loop_merges += 1;
                        } else {
                            summary.selection_merges += 1;
                        }
                    }
                    Op::Switch => {
                        let mut values = HashSet::new();
                        for pair in inst.operands.get(2..).unwrap_or(&[]).chunks(2) {
                            let value = match pair.first() {
                                Some(Operand::LiteralBit32(v)) => u64::from(*v),
                                Some(Operand::LiteralBit64(v)) => *v,
                                other => {
                                    return Err(fail(format!("switch case literal {:?}", other)))
                                }
                            };
                            if !values.insert(value) {
                                return Err(fail(format!("switch case {} appears twice", value)));
                            }
                            if !id_operand(pair.get(1)).is_some_and(|t| labels.contains(&t)) {
                                return Err(fail(format!("switch case {} has no block", value)));
                            }
                        }
                        summary.switch_cases += values.len();
                    }
                    Op::Kill => summary.kills += 1,
                    _ => {}
                }
            }
        }
    }
    Ok(summary)
}

/// Parse and check a module.
pub fn check_module(words: &[u32]) -> Result<ModuleSummary> {
    let module = parse_module(words)?;
    check_parsed(&module)
}
