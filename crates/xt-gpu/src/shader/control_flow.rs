//! Structured control flow for Xenos shaders
//!
//! Exec blocks and predicated instructions become `if` selections. Execs with
//! the same condition are coalesced into one selection unless p0 changed in
//! between. Jumps and loops are lowered into a single dispatch loop whose body
//! is a switch over a virtual program counter: every label is a case, and a
//! jump stores the target into the counter phi of the loop continue block.
//!
//! ```text
//! header:   pc = phi(0 from entry, pc_next from continue); loop_merge
//! body:     switch pc { 0: ..., L1: ..., L2: ... } default: switch_merge
//! continue: pc_next = phi(target from each jump); branch header
//! merge:    epilogue; return
//! ```

use rspirv::dr::Operand;
use rspirv::spirv::{LoopControl, SelectionControl, StorageClass, Word};
use tracing::trace;
use xt_core::{ControlFlowError, Result};

use super::builder::ModuleBuilder;
use super::translator::Translation;
use super::ucode::{ExecInstruction, ExecType, JumpInstruction, LoopEndInstruction, LoopStartInstruction};

/// What an open exec conditional tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExecSource {
    BoolConstant(u32),
    Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ExecConditional {
    pub source: ExecSource,
    pub condition: bool,
    pub merge: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PredicateConditional {
    pub condition: bool,
    pub merge: Word,
}

/// Open selections at the current insertion point
///
/// An instruction-level predicate check is always the innermost one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum Conditional {
    #[default]
    Closed,
    Exec(ExecConditional),
    Predicate(PredicateConditional),
    ExecAndPredicate(ExecConditional, PredicateConditional),
}

impl Conditional {
    pub fn exec(&self) -> Option<&ExecConditional> {
        match self {
            Conditional::Exec(exec) | Conditional::ExecAndPredicate(exec, _) => Some(exec),
            _ => None,
        }
    }

    pub fn predicate(&self) -> Option<&PredicateConditional> {
        match self {
            Conditional::Predicate(predicate) | Conditional::ExecAndPredicate(_, predicate) => {
                Some(predicate)
            }
            _ => None,
        }
    }

    fn with_predicate(self, predicate: PredicateConditional) -> Self {
        match self {
            Conditional::Closed | Conditional::Predicate(_) => Conditional::Predicate(predicate),
            Conditional::Exec(exec) | Conditional::ExecAndPredicate(exec, _) => {
                Conditional::ExecAndPredicate(exec, predicate)
            }
        }
    }

    fn without_predicate(self) -> Self {
        match self {
            Conditional::Exec(exec) | Conditional::ExecAndPredicate(exec, _) => Conditional::Exec(exec),
            _ => Conditional::Closed,
        }
    }
}

/// Program counter switch, present when the shader has labels
#[derive(Debug)]
struct DispatchSwitch {
    /// The loop body block, left open until every case is known.
    header_index: usize,
    header_label: Word,
    merge: Word,
    pc_current: Word,
    cases: Vec<(u32, Word)>,
}

/// The dispatch loop wrapping the whole shader body
#[derive(Debug)]
pub(super) struct Dispatch {
    loop_header: Word,
    loop_continue: Word,
    loop_merge: Word,
    pc_next: Word,
    switch: Option<DispatchSwitch>,
    /// (next program counter, predecessor block) per edge into the continue block.
    next_pc_edges: Vec<(Word, Word)>,
}

impl Dispatch {
    /// Open the loop at the current insertion point and enter its first case.
    pub fn open(b: &mut ModuleBuilder, has_switch: bool) -> Result<Self> {
        let pre_header = b.current_label()?;
        let loop_header = b.id();
        let loop_body = b.id();
        let loop_continue = b.id();
        let loop_merge = b.id();
        let pc_next = b.id();
        b.branch(loop_header)?;

        b.begin_block(Some(loop_header))?;
        let pc_current = if has_switch {
            let int = b.types.int;
            let zero = b.int_constant(0);
            Some(b.phi(int, None, [(zero, pre_header), (pc_next, loop_continue)])?)
        } else {
            None
        };
        b.loop_merge(loop_merge, loop_continue, LoopControl::DONT_UNROLL, [])?;
        b.branch(loop_body)?;

        b.begin_block(Some(loop_body))?;
        let switch = match pc_current {
            Some(pc_current) => {
                let header_index = b.suspend_block()?;
                let merge = b.id();
                let case_0 = b.id();
                b.begin_block(Some(case_0))?;
                Some(DispatchSwitch {
                    header_index,
                    header_label: loop_body,
                    merge,
                    pc_current,
                    cases: vec![(0, case_0)],
                })
            }
            None => None,
        };

        Ok(Self {
            loop_header,
            loop_continue,
            loop_merge,
            pc_next,
            switch,
            next_pc_edges: Vec::new(),
        })
    }

    pub fn has_switch(&self) -> bool {
        self.switch.is_some()
    }

    pub fn has_case(&self, address: u32) -> bool {
        self.switch
            .as_ref()
            .is_some_and(|switch| switch.cases.iter().any(|&(value, _)| value == address))
    }

    /// Where `exece` and falling off the end go.
    fn break_target(&self) -> Word {
        self.switch.as_ref().map_or(self.loop_merge, |switch| switch.merge)
    }

    /// Branch from the current block to the next iteration with `pc` as the counter.
    fn continue_with(&mut self, b: &mut ModuleBuilder, pc: u32) -> Result<()> {
        let value = b.int_constant(pc as i32);
        let predecessor = b.current_label()?;
        self.next_pc_edges.push((value, predecessor));
        b.branch(self.loop_continue)?;
        Ok(())
    }

    /// Emit the switch, the continue block and the loop merge.
    ///
    /// Leaves the insertion point in the loop merge block.
    pub fn close(&mut self, b: &mut ModuleBuilder) -> Result<()> {
        b.branch_if_open(self.break_target())?;

        let has_switch = self.switch.is_some();
        if let Some(switch) = self.switch.take() {
            b.resume_block(switch.header_index, switch.header_label)?;
            b.selection_merge(switch.merge, SelectionControl::DONT_FLATTEN)?;
            b.switch(
                switch.pc_current,
                switch.merge,
                switch
                    .cases
                    .iter()
                    .map(|&(value, label)| (Operand::LiteralBit32(value), label)),
            )?;
            b.begin_block(Some(switch.merge))?;
            b.branch(self.loop_merge)?;
        }

        b.begin_block(Some(self.loop_continue))?;
        if has_switch {
            let int = b.types.int;
            if self.next_pc_edges.is_empty() {
                // Labels without jumps: an impossible counter ends the loop.
                let invalid = b.int_constant(-1);
                b.copy_object(int, Some(self.pc_next), invalid)?;
            } else {
                b.phi(int, Some(self.pc_next), self.next_pc_edges.iter().copied())?;
            }
        }
        b.branch(self.loop_header)?;

        b.begin_block(Some(self.loop_merge))?;
        Ok(())
    }
}

impl Translation {
    //=========================================================================
    // Conditionals
    //=========================================================================

    /// Make the exec-level conditional match an exec or jump condition.
    pub(super) fn update_exec_conditional(
        &mut self,
        exec_type: ExecType,
        bool_constant_index: u32,
        condition: bool,
    ) -> Result<()> {
        let source = match exec_type {
            ExecType::Unconditional => None,
            ExecType::Conditional => Some(ExecSource::BoolConstant(bool_constant_index)),
            ExecType::Predicated => Some(ExecSource::Predicate),
        };
        match (source, self.conditional.exec()) {
            (None, None) => return Ok(()),
            (Some(source), Some(open))
                if !self.predicate_written && open.source == source && open.condition == condition =>
            {
                return Ok(());
            }
            _ => {}
        }

        self.close_exec_conditionals()?;
        let Some(source) = source else {
            return Ok(());
        };

        self.b.ensure_build_point_available()?;
        let condition_id = match source {
            ExecSource::BoolConstant(index) => self.load_bool_constant(index)?,
            ExecSource::Predicate => self.load_predicate()?,
        };
        let merge = self.open_selection(condition_id, condition)?;
        self.conditional = Conditional::Exec(ExecConditional {
            source,
            condition,
            merge,
        });
        Ok(())
    }

    /// Guard the next instruction with p0 if it is predicated.
    pub(super) fn update_instruction_predication(&mut self, predicated: bool, condition: bool) -> Result<()> {
        if !predicated {
            return self.close_instruction_predication();
        }
        if let Some(open) = self.conditional.predicate() {
            if open.condition == condition {
                return Ok(());
            }
            self.close_instruction_predication()?;
        }
        // The exec already checks the same predicate value, unless setp changed it.
        if !self.predicate_written
            && self
                .conditional
                .exec()
                .is_some_and(|exec| exec.source == ExecSource::Predicate && exec.condition == condition)
        {
            return Ok(());
        }

        self.b.ensure_build_point_available()?;
        let predicate = self.load_predicate()?;
        let merge = self.open_selection(predicate, condition)?;
        self.conditional = self
            .conditional
            .with_predicate(PredicateConditional { condition, merge });
        Ok(())
    }

    pub(super) fn close_instruction_predication(&mut self) -> Result<()> {
        if let Some(predicate) = self.conditional.predicate().copied() {
            self.b.branch_if_open(predicate.merge)?;
            self.b.begin_block(Some(predicate.merge))?;
            self.conditional = self.conditional.without_predicate();
        }
        Ok(())
    }

    pub(super) fn close_exec_conditionals(&mut self) -> Result<()> {
        self.close_instruction_predication()?;
        if let Some(exec) = self.conditional.exec().copied() {
            self.b.branch_if_open(exec.merge)?;
            self.b.begin_block(Some(exec.merge))?;
            self.conditional = Conditional::Closed;
        }
        self.predicate_written = false;
        Ok(())
    }

    /// Branch into a new block when `condition_id == expected`, returning the merge block.
    fn open_selection(&mut self, condition_id: Word, expected: bool) -> Result<Word> {
        let merge = self.b.id();
        let inner = self.b.id();
        self.b.selection_merge(merge, SelectionControl::NONE)?;
        let (true_label, false_label) = if expected { (inner, merge) } else { (merge, inner) };
        self.b
            .branch_conditional(condition_id, true_label, false_label, [])?;
        self.b.begin_block(Some(inner))?;
        Ok(merge)
    }

    fn load_predicate(&mut self) -> Result<Word> {
        let boolean = self.b.types.boolean;
        Ok(self.b.load(boolean, None, self.var_predicate, None, [])?)
    }

    /// `(bool_constants[index >> 7][(index >> 5) & 3] >> (index & 31)) & 1 != 0`
    fn load_bool_constant(&mut self, index: u32) -> Result<Word> {
        let uint = self.b.types.uint;
        let boolean = self.b.types.boolean;
        let pointer = self.b.pointer_type(StorageClass::Uniform, uint);
        let indices = [
            self.b.int_constant(0),
            self.b.int_constant((index >> 7) as i32),
            self.b.int_constant(((index >> 5) & 3) as i32),
        ];
        let chain = self
            .b
            .access_chain(pointer, None, self.bool_loop_constants, indices)?;
        let word = self.b.load(uint, None, chain, None, [])?;
        let bit = self.b.uint_constant(1 << (index & 31));
        let masked = self.b.bitwise_and(uint, None, word, bit)?;
        let zero = self.b.uint_constant(0);
        Ok(self.b.i_not_equal(boolean, None, masked, zero)?)
    }

    fn load_loop_constant(&mut self, index: u32) -> Result<Word> {
        let uint = self.b.types.uint;
        let pointer = self.b.pointer_type(StorageClass::Uniform, uint);
        let indices = [
            self.b.int_constant(1),
            self.b.int_constant((index >> 2) as i32),
            self.b.int_constant((index & 3) as i32),
        ];
        let chain = self
            .b
            .access_chain(pointer, None, self.bool_loop_constants, indices)?;
        Ok(self.b.load(uint, None, chain, None, [])?)
    }

    //=========================================================================
    // Control flow instructions
    //=========================================================================

    fn check_label(&self, target: u32) -> Result<()> {
        let known = self.info.label_addresses.contains(&target) || (target == 0 && self.dispatch.has_switch());
        if !known {
            return Err(ControlFlowError::UnknownLabel { target }.into());
        }
        Ok(())
    }

    pub(super) fn label(&mut self, address: u32) -> Result<()> {
        trace!("label {}", address);
        if !self.dispatch.has_switch() || !self.info.label_addresses.contains(&address) {
            return Err(ControlFlowError::LabelOutsideDispatch { address }.into());
        }
        if address == 0 {
            // Case 0 is the start of the program.
            return Ok(());
        }
        if self.dispatch.has_case(address) {
            return Err(ControlFlowError::DuplicateLabel { address }.into());
        }

        self.close_exec_conditionals()?;
        let case = self.b.id();
        if let Some(switch) = self.dispatch.switch.as_mut() {
            switch.cases.push((address, case));
        }
        self.b.branch_if_open(case)?;
        self.b.begin_block(Some(case))?;
        Ok(())
    }

    pub(super) fn exec_begin(&mut self, exec: &ExecInstruction) -> Result<()> {
        trace!("exec {:?} b{} == {}", exec.exec_type, exec.bool_constant_index, exec.condition);
        self.update_exec_conditional(exec.exec_type, exec.bool_constant_index, exec.condition)
    }

    pub(super) fn exec_end(&mut self, exec: &ExecInstruction) -> Result<()> {
        if exec.is_end {
            trace!("exece");
            self.close_instruction_predication()?;
            let target = self.dispatch.break_target();
            self.b.branch_if_open(target)?;
        }
        Ok(())
    }

    pub(super) fn loop_start(&mut self, instr: &LoopStartInstruction) -> Result<()> {
        trace!("loop i{} skip to {}", instr.loop_constant_index, instr.loop_skip_address);
        self.check_label(instr.loop_skip_address)?;

        // Loop control is outside execs.
        self.close_exec_conditionals()?;
        self.b.ensure_build_point_available()?;

        let uint = self.b.types.uint;
        let int = self.b.types.int;
        let uint4 = self.b.types.uint_vector(4);
        let int4 = self.b.types.int_vector(4);
        let boolean = self.b.types.boolean;
        let loop_constant = self.load_loop_constant(instr.loop_constant_index)?;
        let int_0 = self.b.int_constant(0);
        let int_8 = self.b.int_constant(8);

        // Push the count: XYZ moves to YZW, X is the new count.
        let count_stack = self.b.load(uint4, None, self.var_loop_count, None, [])?;
        let count = self
            .b
            .bit_field_u_extract(uint, None, loop_constant, int_0, int_8)?;
        let mut counts = vec![count];
        for i in 0..3 {
            counts.push(self.b.composite_extract(uint, None, count_stack, [i])?);
        }
        let counts = self.b.composite_construct(uint4, None, counts)?;
        self.b.store(self.var_loop_count, counts, None, [])?;

        // Push aL, repeating the enclosing one for `repeat` loops.
        let address_stack = self.b.load(int4, None, self.var_address_relative, None, [])?;
        let mut addresses = Vec::with_capacity(4);
        for i in 0..3 {
            addresses.push(self.b.composite_extract(int, None, address_stack, [i])?);
        }
        let address = if instr.is_repeat {
            addresses[0]
        } else {
            let raw = self
                .b
                .bit_field_u_extract(uint, None, loop_constant, int_8, int_8)?;
            self.b.bitcast(int, None, raw)?
        };
        addresses.insert(0, address);
        let addresses = self.b.composite_construct(int4, None, addresses)?;
        self.b.store(self.var_address_relative, addresses, None, [])?;

        // The count is checked at the end, so skip the body if it's zero.
        let zero = self.b.uint_constant(0);
        let is_zero = self.b.i_equal(boolean, None, count, zero)?;
        let skip = self.b.id();
        let body = self.b.id();
        self.b.selection_merge(body, SelectionControl::NONE)?;
        self.b.branch_conditional(is_zero, skip, body, [1, 2])?;

        self.b.begin_block(Some(skip))?;
        self.dispatch.continue_with(&mut self.b, instr.loop_skip_address)?;

        self.b.begin_block(Some(body))?;
        self.open_loops += 1;
        Ok(())
    }

    pub(super) fn loop_end(&mut self, instr: &LoopEndInstruction) -> Result<()> {
        trace!("endloop i{} body at {}", instr.loop_constant_index, instr.loop_body_address);
        if self.open_loops == 0 {
            return Err(ControlFlowError::UnbalancedLoopEnd {
                loop_constant: instr.loop_constant_index,
            }
            .into());
        }
        self.check_label(instr.loop_body_address)?;

        self.close_exec_conditionals()?;
        self.b.ensure_build_point_available()?;

        let uint = self.b.types.uint;
        let int = self.b.types.int;
        let uint4 = self.b.types.uint_vector(4);
        let int4 = self.b.types.int_vector(4);
        let boolean = self.b.types.boolean;

        let count_stack = self.b.load(uint4, None, self.var_loop_count, None, [])?;
        let count_old = self.b.composite_extract(uint, None, count_stack, [0])?;
        let one = self.b.uint_constant(1);
        let count = self.b.i_sub(uint, None, count_old, one)?;
        let address_stack = self.b.load(int4, None, self.var_address_relative, None, [])?;

        // Break if count == 0 || p0 == condition, without needing OpLogicalNot:
        //   continue if count != 0
        //   continue if count != 0 && p0, when breaking on !p0
        //   break if count == 0 || p0, when breaking on p0
        let break_is_true = instr.is_predicated_break && instr.predicate_condition;
        let zero = self.b.uint_constant(0);
        let mut condition = if break_is_true {
            self.b.i_equal(boolean, None, count, zero)?
        } else {
            self.b.i_not_equal(boolean, None, count, zero)?
        };
        if instr.is_predicated_break {
            let predicate = self.load_predicate()?;
            condition = if instr.predicate_condition {
                self.b.logical_or(boolean, None, condition, predicate)?
            } else {
                self.b.logical_and(boolean, None, condition, predicate)?
            };
        }

        let continue_block = self.b.id();
        let break_block = self.b.id();
        self.b.selection_merge(break_block, SelectionControl::NONE)?;
        if break_is_true {
            self.b
                .branch_conditional(condition, break_block, continue_block, [1, 2])?;
        } else {
            self.b
                .branch_conditional(condition, continue_block, break_block, [2, 1])?;
        }

        // Continue: store the decremented count, step aL, go back to the body.
        self.b.begin_block(Some(continue_block))?;
        let counts = self.b.composite_insert(uint4, None, count, count_stack, [0])?;
        self.b.store(self.var_loop_count, counts, None, [])?;
        let loop_constant = self.load_loop_constant(instr.loop_constant_index)?;
        let loop_constant = self.b.bitcast(int, None, loop_constant)?;
        let int_16 = self.b.int_constant(16);
        let int_8 = self.b.int_constant(8);
        let step = self
            .b
            .bit_field_s_extract(int, None, loop_constant, int_16, int_8)?;
        let address_old = self.b.composite_extract(int, None, address_stack, [0])?;
        let address = self.b.i_add(int, None, address_old, step)?;
        let addresses = self
            .b
            .composite_insert(int4, None, address, address_stack, [0])?;
        self.b.store(self.var_address_relative, addresses, None, [])?;
        self.dispatch.continue_with(&mut self.b, instr.loop_body_address)?;

        // Break: pop both stacks, YZW to XYZ with zero in W.
        self.b.begin_block(Some(break_block))?;
        let mut counts = Vec::with_capacity(4);
        let mut addresses = Vec::with_capacity(4);
        for i in 1..4 {
            counts.push(self.b.composite_extract(uint, None, count_stack, [i])?);
            addresses.push(self.b.composite_extract(int, None, address_stack, [i])?);
        }
        counts.push(zero);
        addresses.push(self.b.int_constant(0));
        let counts = self.b.composite_construct(uint4, None, counts)?;
        self.b.store(self.var_loop_count, counts, None, [])?;
        let addresses = self.b.composite_construct(int4, None, addresses)?;
        self.b.store(self.var_address_relative, addresses, None, [])?;

        self.open_loops -= 1;
        Ok(())
    }

    pub(super) fn jump(&mut self, instr: &JumpInstruction) -> Result<()> {
        trace!("jmp {:?} to {}", instr.jump_type, instr.target_address);
        self.check_label(instr.target_address)?;

        // A jump is an `if` like an exec and can share its selection.
        self.update_exec_conditional(instr.jump_type, instr.bool_constant_index, instr.condition)?;
        // The jump itself is at the control flow level, not predicated per instruction.
        self.close_instruction_predication()?;

        if self.b.is_terminated() {
            return Ok(());
        }
        self.dispatch.continue_with(&mut self.b, instr.target_address)
    }

    /// Close everything still open and finish the dispatch loop.
    pub(super) fn finish_control_flow(&mut self) -> Result<()> {
        if self.open_loops != 0 {
            return Err(ControlFlowError::UnclosedLoop { open: self.open_loops }.into());
        }
        if let Some(&missing) = self
            .info
            .label_addresses
            .iter()
            .find(|&&address| address != 0 && !self.dispatch.has_case(address))
        {
            return Err(ControlFlowError::UnknownLabel { target: missing }.into());
        }
        self.close_exec_conditionals()?;
        self.dispatch.close(&mut self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERGE_A: Word = 10;
    const MERGE_B: Word = 11;

    fn exec(merge: Word) -> ExecConditional {
        ExecConditional {
            source: ExecSource::BoolConstant(3),
            condition: true,
            merge,
        }
    }

    #[test]
    fn test_conditional_transitions() {
        let predicate = PredicateConditional {
            condition: false,
            merge: MERGE_B,
        };
        let state = Conditional::Closed.with_predicate(predicate);
        assert_eq!(state, Conditional::Predicate(predicate));
        assert!(state.exec().is_none());
        assert_eq!(state.without_predicate(), Conditional::Closed);

        let state = Conditional::Exec(exec(MERGE_A)).with_predicate(predicate);
        assert_eq!(state, Conditional::ExecAndPredicate(exec(MERGE_A), predicate));
        assert_eq!(state.predicate().map(|p| p.merge), Some(MERGE_B));
        assert_eq!(state.without_predicate(), Conditional::Exec(exec(MERGE_A)));
    }

    #[test]
    fn test_predicate_replaced_not_nested() {
        let first = PredicateConditional {
            condition: true,
            merge: MERGE_A,
        };
        let second = PredicateConditional {
            condition: false,
            merge: MERGE_B,
        };
        let state = Conditional::Predicate(first).with_predicate(second);
        assert_eq!(state, Conditional::Predicate(second));
    }
}
