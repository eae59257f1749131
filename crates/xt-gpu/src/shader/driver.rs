//! Replaying a parsed program into the translator

use std::collections::BTreeSet;

use xt_core::{Result, TranslatorConfig};

use super::translator::{ShaderInfo, ShaderTranslator};
use super::ucode::Instruction;
use crate::xenos::ShaderType;

/// A parsed shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub shader_type: ShaderType,
    pub register_count: u32,
    pub float_constant_count: u32,
    pub instructions: Vec<Instruction>,
}

impl ShaderProgram {
    pub fn new(shader_type: ShaderType, register_count: u32, float_constant_count: u32) -> Self {
        Self {
            shader_type,
            register_count,
            float_constant_count,
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    /// Addresses of every `Label` in the program, exec bodies included.
    pub fn label_addresses(&self) -> BTreeSet<u32> {
        fn collect(instructions: &[Instruction], labels: &mut BTreeSet<u32>) {
            for instruction in instructions {
                match instruction {
                    Instruction::Label(address) => {
                        labels.insert(*address);
                    }
                    Instruction::Exec { body, .. } => collect(body, labels),
                    _ => {}
                }
            }
        }
        let mut labels = BTreeSet::new();
        collect(&self.instructions, &mut labels);
        labels
    }

    pub fn shader_info(&self) -> ShaderInfo {
        ShaderInfo::new(self.shader_type, self.register_count, self.float_constant_count)
            .with_labels(self.label_addresses())
    }

    /// Feed the program to `translator` in order and return the module bytes.
    pub fn translate_with(&self, translator: &mut ShaderTranslator) -> Result<Vec<u8>> {
        translator.start_translation(self.shader_info())?;
        replay(&self.instructions, translator)?;
        translator.complete_translation()
    }

    /// Translate with a fresh translator.
    pub fn translate(&self, config: &TranslatorConfig) -> Result<Vec<u8>> {
        self.translate_with(&mut ShaderTranslator::new(config))
    }
}

fn replay(instructions: &[Instruction], translator: &mut ShaderTranslator) -> Result<()> {
    for instruction in instructions {
        match instruction {
            Instruction::Label(address) => translator.process_label(*address)?,
            Instruction::Exec { exec, body } => {
                translator.process_exec_begin(exec)?;
                replay(body, translator)?;
                translator.process_exec_end(exec)?;
            }
            Instruction::LoopStart(instr) => translator.process_loop_start(instr)?,
            Instruction::LoopEnd(instr) => translator.process_loop_end(instr)?,
            Instruction::Jump(instr) => translator.process_jump(instr)?,
            Instruction::Alu(instr) => translator.process_alu(instr)?,
            Instruction::VertexFetch(instr) => translator.process_vertex_fetch(instr)?,
            Instruction::TextureFetch(instr) => translator.process_texture_fetch(instr)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ucode::{ExecInstruction, JumpInstruction, ExecType};

    #[test]
    fn test_label_addresses_include_exec_bodies() {
        let mut program = ShaderProgram::new(ShaderType::Pixel, 2, 0);
        program
            .push(Instruction::Label(4))
            .push(Instruction::Exec {
                exec: ExecInstruction::unconditional(),
                body: vec![Instruction::Label(9)],
            })
            .push(Instruction::Jump(JumpInstruction {
                jump_type: ExecType::Unconditional,
                bool_constant_index: 0,
                condition: false,
                target_address: 4,
            }));
        assert_eq!(program.label_addresses().into_iter().collect::<Vec<_>>(), vec![4, 9]);
        let info = program.shader_info();
        assert_eq!(info.register_count, 2);
        assert_eq!(info.label_addresses.len(), 2);
    }
}
