//! The fetch/decode/execute loop and the semantics of every opcode.
//!
//! The interpreter owns the VM plus the delegates it calls out through for
//! everything that isn't pure computation (output, input, save/restore
//! file selection, windowing, sound, tracing). Execution is fully
//! synchronous: an opcode that needs a line of input blocks on the input
//! delegate; one that schedules a routine (timed READ, SOUND_EFFECT) runs
//! it to completion inline via `call_routine_sync` before continuing.

use crate::addressing::{self, PackedKind};
use crate::disassembler;
use crate::error::{ZError, ZResult};
use crate::instruction::{Instruction, InstructionForm, OperandCount, OperandType};
use crate::io::{
    InputSource, OutputSink, ReadOutcome, SaveChooser, SoundDelegate, TraceSink, WindowDelegate,
};
use crate::quetzal::save::{restore_undo_snapshot, take_undo_snapshot};
use crate::quetzal::{RestoreGame, SaveGame};
use crate::text;
use crate::vm::{CallFrame, VM};
use crate::zrand::ZRand;
use log::{debug, warn};
use std::time::Duration;

/// What the caller of `step()` should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Continue,
    Quit,
}

pub struct Interpreter {
    pub vm: VM,
    output: Box<dyn OutputSink>,
    input: Box<dyn InputSource>,
    save_chooser: Box<dyn SaveChooser>,
    window: Box<dyn WindowDelegate>,
    sound: Box<dyn SoundDelegate>,
    trace: Option<Box<dyn TraceSink>>,
    rng: ZRand,
    /// OUTPUT_STREAM 1 (screen), on by default.
    stream1_enabled: bool,
    /// OUTPUT_STREAM 2 (transcript); tracked but never written anywhere, since
    /// transcript file handling is a front-end concern.
    stream2_enabled: bool,
    /// OUTPUT_STREAM 3 redirect stack: (table address, accumulated text).
    /// Nested streams 3 are legal; the innermost one wins.
    memory_streams: Vec<(u32, String)>,
}

impl Interpreter {
    pub fn new(
        vm: VM,
        output: Box<dyn OutputSink>,
        input: Box<dyn InputSource>,
        save_chooser: Box<dyn SaveChooser>,
        window: Box<dyn WindowDelegate>,
        sound: Box<dyn SoundDelegate>,
    ) -> Self {
        Interpreter {
            vm,
            output,
            input,
            save_chooser,
            window,
            sound,
            trace: None,
            rng: ZRand::new_entropy(),
            stream1_enabled: true,
            stream2_enabled: false,
            memory_streams: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Box<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Seeds the RNG deterministically. Intended for tests; a real session
    /// seeds from entropy (the default).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ZRand::new_seeded(seed);
        self
    }

    // -- main loop --------------------------------------------------------

    pub fn run(&mut self) -> ZResult<()> {
        loop {
            if self.step()? == ExecutionResult::Quit {
                self.output.quit();
                return Ok(());
            }
        }
    }

    /// Runs at most `limit` instructions; used by tests that want to bound
    /// a run without risking an infinite loop from a malformed program.
    pub fn run_with_limit(&mut self, limit: usize) -> ZResult<ExecutionResult> {
        for _ in 0..limit {
            let result = self.step()?;
            if result == ExecutionResult::Quit {
                self.output.quit();
                return Ok(result);
            }
        }
        Ok(ExecutionResult::Continue)
    }

    pub fn step(&mut self) -> ZResult<ExecutionResult> {
        let addr = self.vm.pc;
        let version = self.vm.game.header.version;
        let inst = Instruction::decode(&self.vm.game.memory, addr as usize, version)?;

        if let Some(sink) = self.trace.as_mut() {
            sink.trace(&disassembler::format_instruction(addr, &inst, version));
        }

        self.vm.pc = addr + inst.size as u32;
        self.dispatch(&inst)
    }

    fn dispatch(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        match inst.form {
            InstructionForm::Extended => self.execute_ext(inst),
            _ => match inst.operand_count {
                OperandCount::OP0 => self.execute_0op(inst),
                OperandCount::OP1 => self.execute_1op(inst),
                OperandCount::OP2 => self.execute_2op(inst),
                OperandCount::VAR => self.execute_var(inst),
            },
        }
    }

    // -- operand / store / branch plumbing --------------------------------

    /// Resolves one already-decoded operand: a Variable-typed operand names
    /// a variable whose *value* is the real operand; constants are used
    /// literally.
    fn resolve_operand(&mut self, inst: &Instruction, index: usize) -> ZResult<u16> {
        match inst.operand_types[index] {
            OperandType::Variable => self.vm.read_variable(inst.operands[index] as u8),
            _ => Ok(inst.operands[index]),
        }
    }

    fn operands(&mut self, inst: &Instruction) -> ZResult<Vec<u16>> {
        let mut out = Vec::with_capacity(inst.operands.len());
        for i in 0..inst.operands.len() {
            out.push(self.resolve_operand(inst, i)?);
        }
        Ok(out)
    }

    fn store_result(&mut self, inst: &Instruction, value: u16) -> ZResult<()> {
        match inst.store_var {
            Some(var) => self.vm.write_variable(var, value),
            None => Ok(()),
        }
    }

    /// Applies a branch instruction's sense/offset given the tested
    /// condition. Offsets 0/1 are the RFALSE/RTRUE pseudo-targets.
    fn do_branch(&mut self, inst: &Instruction, condition: bool) -> ZResult<ExecutionResult> {
        let Some(branch) = &inst.branch else {
            return Ok(ExecutionResult::Continue);
        };
        if condition != branch.on_true {
            return Ok(ExecutionResult::Continue);
        }
        match branch.offset {
            0 => self.do_return(0),
            1 => self.do_return(1),
            n => {
                self.vm.pc = (self.vm.pc as i64 + n as i64 - 2) as u32;
                Ok(ExecutionResult::Continue)
            }
        }
    }

    /// Pops the current call frame, restoring the caller's locals, PC, and
    /// evaluation-stack depth, writing `value` to the frame's store
    /// variable if it had one. Returning from the outermost frame halts.
    fn do_return(&mut self, value: u16) -> ZResult<ExecutionResult> {
        let frame = self.vm.call_stack.pop().ok_or(ZError::NoActiveFrame)?;
        self.vm.stack.truncate(frame.stack_base);
        if self.vm.call_stack.is_empty() {
            return Ok(ExecutionResult::Quit);
        }
        self.vm.pc = frame.return_pc;
        if let Some(store_var) = frame.return_store {
            self.vm.write_variable(store_var, value)?;
        }
        Ok(ExecutionResult::Continue)
    }

    /// CALL/CALL_VS/.../CALL_VN2: a null packed address stores 0 (or
    /// discards) without creating a frame.
    fn do_call(&mut self, packed_addr: u16, args: &[u16], store_var: Option<u8>) -> ZResult<()> {
        if packed_addr == 0 {
            if let Some(var) = store_var {
                self.vm.write_variable(var, 0)?;
            }
            return Ok(());
        }

        let routine_addr = addressing::unpack(packed_addr, PackedKind::Routine, &self.vm.game.header);
        let num_locals_byte = self.vm.read_byte(routine_addr)?;
        if num_locals_byte > 15 {
            return Err(ZError::CorruptedStoryFile(format!(
                "routine at {routine_addr:#06x} declares {num_locals_byte} locals (max 15)"
            )));
        }
        let num_locals = num_locals_byte as usize;

        let mut locals = [0u16; 15];
        let mut cursor = routine_addr + 1;
        if self.vm.game.header.version <= 4 {
            for slot in locals.iter_mut().take(num_locals) {
                *slot = self.vm.read_word(cursor)?;
                cursor += 2;
            }
        }
        for (slot, &arg) in locals.iter_mut().zip(args.iter()).take(num_locals) {
            *slot = arg;
        }

        let stack_base = self.vm.stack.len();
        self.vm.call_stack.push(CallFrame {
            return_pc: self.vm.pc,
            return_store: store_var,
            num_locals: num_locals as u8,
            locals,
            stack_base,
            num_args: args.len().min(u8::MAX as usize) as u8,
        });
        self.vm.pc = cursor;
        debug!("call to {routine_addr:#06x}, {num_locals} locals, {} args", args.len());
        Ok(())
    }

    /// Runs a routine synchronously to completion and returns its result,
    /// for callbacks the VM itself invokes (timed-input routine, SOUND's
    /// on-completion routine). The result is captured through a dedicated
    /// stack-variable store so it survives arbitrarily nested calls inside.
    fn call_routine_sync(&mut self, packed_addr: u16, args: &[u16]) -> ZResult<u16> {
        if packed_addr == 0 {
            return Ok(0);
        }
        let target_depth = self.vm.call_depth();
        self.do_call(packed_addr, args, Some(0))?;
        while self.vm.call_depth() > target_depth {
            if self.step()? == ExecutionResult::Quit {
                return Ok(0);
            }
        }
        Ok(self.vm.pop())
    }

    // -- output routing -----------------------------------------------------

    /// Routes text through whichever output stream is currently selected.
    /// While a memory stream (3) is open, nothing reaches the screen.
    fn emit(&mut self, text: &str) {
        if let Some((_, buf)) = self.memory_streams.last_mut() {
            buf.push_str(text);
            return;
        }
        if self.stream1_enabled {
            self.output.emit(text);
        }
    }

    // -- 0OP ----------------------------------------------------------------

    fn execute_0op(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        match inst.opcode {
            0x00 => self.do_return(1), // rtrue
            0x01 => self.do_return(0), // rfalse
            0x02 => {
                // print
                let s = inst.text.clone().unwrap_or_default();
                self.emit(&s);
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // print_ret
                let s = inst.text.clone().unwrap_or_default();
                self.emit(&s);
                self.emit("\n");
                self.do_return(1)
            }
            0x04 => Ok(ExecutionResult::Continue), // nop
            0x05 => self.execute_save_branching(inst),
            0x06 => self.execute_restore_branching(inst),
            0x07 => self.do_restart(),
            0x08 => {
                // ret_popped
                let value = self.vm.pop();
                self.do_return(value)
            }
            0x09 => {
                if self.vm.game.header.version >= 5 {
                    // catch: token identifying the current frame for THROW.
                    let depth = self.vm.call_depth() as u16;
                    self.store_result(inst, depth)?;
                } else {
                    self.vm.pop();
                }
                Ok(ExecutionResult::Continue)
            }
            0x0A => Ok(ExecutionResult::Quit), // quit
            0x0B => {
                self.emit("\n");
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.show_status()?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // verify
                let ok = self.verify_checksum();
                self.do_branch(inst, ok)
            }
            0x0E => Err(ZError::UnsupportedOperation(
                "0OP opcode 0x0E is reserved for the Extended instruction form (v5+)".into(),
            )),
            0x0F => self.do_branch(inst, true), // piracy: no protection implemented, report genuine
            other => Err(ZError::UnsupportedOperation(format!(
                "unassigned 0OP opcode {other:#04x}"
            ))),
        }
    }

    fn do_restart(&mut self) -> ZResult<ExecutionResult> {
        self.vm.reset();
        self.stream1_enabled = true;
        self.stream2_enabled = false;
        self.memory_streams.clear();
        Ok(ExecutionResult::Continue)
    }

    fn verify_checksum(&self) -> bool {
        let header = &self.vm.game.header;
        let len = header.len_file.min(self.vm.game.original_memory.len());
        if len <= 0x40 {
            return false;
        }
        let sum: u32 = self.vm.game.original_memory[0x40..len]
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
        (sum & 0xffff) as u16 == header.checksum_file
    }

    fn show_status(&mut self) -> ZResult<()> {
        let location = self.vm.read_global(0x10)?;
        let a = self.vm.read_global(0x11)? as i16;
        let b = self.vm.read_global(0x12)?;
        let location_name = self.vm.get_object_name(location).unwrap_or_default();
        let right = if self.vm.game.header.flags1 & 0x02 != 0 {
            format!("Time: {a:02}:{b:02}")
        } else {
            format!("Score: {a}  Moves: {b}")
        };
        self.window.set_cursor(1, 1);
        self.emit(&format!("{location_name}  {right}\n"));
        Ok(())
    }

    fn do_save_to_chooser(&mut self) -> bool {
        let Some(path) = self.save_chooser.choose_save_path("game.qzl") else {
            return false;
        };
        match SaveGame::save_to_file(&self.vm, &path) {
            Ok(()) => true,
            Err(e) => {
                warn!("save failed: {e}");
                false
            }
        }
    }

    /// Returns true only if a save file was both chosen and successfully
    /// applied to the running VM.
    fn do_restore_from_chooser(&mut self) -> bool {
        let Some(path) = self.save_chooser.choose_restore_path() else {
            return false;
        };
        let restore = match RestoreGame::from_file(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("restore failed: {e}");
                return false;
            }
        };
        match restore.restore_to_vm(&mut self.vm) {
            Ok(()) => true,
            Err(e) => {
                warn!("restore failed: {e}");
                false
            }
        }
    }

    /// SAVE in short form: v1-3 branches, v4 stores 1/0. (v5+ stories use
    /// the Extended form instead; see execute_ext.)
    fn execute_save_branching(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let ok = self.do_save_to_chooser();
        if self.vm.game.header.version <= 3 {
            self.do_branch(inst, ok)
        } else {
            self.store_result(inst, ok as u16)?;
            Ok(ExecutionResult::Continue)
        }
    }

    /// RESTORE in short form. On success `restore_to_vm` has already set
    /// `self.vm.pc` from the save file's Stks chunk, so execution simply
    /// resumes there — RESTORE itself does not branch or store in that case.
    fn execute_restore_branching(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        if self.do_restore_from_chooser() {
            if self.vm.game.header.version <= 3 {
                return Ok(ExecutionResult::Continue);
            }
            self.store_result(inst, 2)?;
            return Ok(ExecutionResult::Continue);
        }
        if self.vm.game.header.version <= 3 {
            self.do_branch(inst, false)
        } else {
            self.store_result(inst, 0)?;
            Ok(ExecutionResult::Continue)
        }
    }

    // -- 1OP ------------------------------------------------------------

    fn execute_1op(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let ops = self.operands(inst)?;
        match inst.opcode {
            0x00 => self.do_branch(inst, ops[0] == 0), // jz
            0x01 => {
                // get_sibling
                let sibling = self.vm.get_sibling(ops[0])?;
                self.store_result(inst, sibling)?;
                self.do_branch(inst, sibling != 0)
            }
            0x02 => {
                // get_child
                let child = self.vm.get_child(ops[0])?;
                self.store_result(inst, child)?;
                self.do_branch(inst, child != 0)
            }
            0x03 => {
                // get_parent
                let parent = self.vm.get_parent(ops[0])?;
                self.store_result(inst, parent)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // get_prop_len: the operand is itself a property data address
                let len = self.vm.get_prop_len(ops[0] as usize)?;
                self.store_result(inst, len as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                // inc
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)? as i16;
                self.vm.write_variable(var, value.wrapping_add(1) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                // dec
                let var = ops[0] as u8;
                let value = self.vm.read_variable(var)? as i16;
                self.vm.write_variable(var, value.wrapping_sub(1) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                // print_addr
                let abbrev_addr = self.vm.game.header.abbrev_table as u32;
                let (s, _) = text::decode_string(&self.vm.game.memory, ops[0] as u32, abbrev_addr)?;
                self.emit(&s);
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                // call_1s
                self.do_call(ops[0], &[], inst.store_var)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // remove_obj
                self.vm.remove_object(ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                // print_obj
                let name = self.vm.get_object_name(ops[0])?;
                self.emit(&name);
                Ok(ExecutionResult::Continue)
            }
            0x0B => self.do_return(ops[0]), // ret
            0x0C => {
                // jump: unconditional, same offset arithmetic as a taken branch
                let offset = ops[0] as i16;
                self.vm.pc = (self.vm.pc as i64 + offset as i64 - 2) as u32;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // print_paddr
                let s = text::decode_string_at_packed_addr(&self.vm.game.memory, ops[0], &self.vm.game.header)?;
                self.emit(&s);
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                // load: reading variable 0 peeks, it does not pop
                let var = ops[0] as u8;
                let value = if var == 0 { self.vm.peek() } else { self.vm.read_variable(var)? };
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                if self.vm.game.header.version >= 5 {
                    // call_1n
                    self.do_call(ops[0], &[], None)?;
                } else {
                    // not
                    self.store_result(inst, !ops[0])?;
                }
                Ok(ExecutionResult::Continue)
            }
            other => Err(ZError::UnsupportedOperation(format!("unassigned 1OP opcode {other:#04x}"))),
        }
    }

    // -- 2OP ------------------------------------------------------------

    fn execute_2op(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let ops = self.operands(inst)?;
        match inst.opcode {
            0x01 => {
                // je: true if operand 0 equals any other operand
                let condition = ops[1..].iter().any(|&v| v == ops[0]);
                self.do_branch(inst, condition)
            }
            0x02 => self.do_branch(inst, (ops[0] as i16) < (ops[1] as i16)), // jl
            0x03 => self.do_branch(inst, (ops[0] as i16) > (ops[1] as i16)), // jg
            0x04 => {
                // dec_chk
                let var = ops[0] as u8;
                let value = (self.vm.read_variable(var)? as i16).wrapping_sub(1);
                self.vm.write_variable(var, value as u16)?;
                self.do_branch(inst, value < ops[1] as i16)
            }
            0x05 => {
                // inc_chk
                let var = ops[0] as u8;
                let value = (self.vm.read_variable(var)? as i16).wrapping_add(1);
                self.vm.write_variable(var, value as u16)?;
                self.do_branch(inst, value > ops[1] as i16)
            }
            0x06 => {
                // jin
                let parent = self.vm.get_parent(ops[0])?;
                self.do_branch(inst, parent == ops[1])
            }
            0x07 => self.do_branch(inst, ops[0] & ops[1] == ops[1]), // test
            0x08 => {
                self.store_result(inst, ops[0] | ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.store_result(inst, ops[0] & ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                // test_attr
                let set = self.vm.test_attribute(ops[0], ops[1] as u8)?;
                self.do_branch(inst, set)
            }
            0x0B => {
                self.vm.set_attribute(ops[0], ops[1] as u8, true)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                self.vm.set_attribute(ops[0], ops[1] as u8, false)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // store: writing variable 0 replaces the top of the stack
                // rather than pushing a new element.
                let var = ops[0] as u8;
                if var == 0 {
                    self.vm.pop();
                    self.vm.push(ops[1])?;
                } else {
                    self.vm.write_variable(var, ops[1])?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                self.vm.insert_object(ops[0], ops[1])?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                // loadw
                let addr = (ops[0] as u32).wrapping_add(2 * ops[1] as u32);
                let value = self.vm.read_word(addr)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                // loadb
                let addr = (ops[0] as u32).wrapping_add(ops[1] as u32);
                let value = self.vm.read_byte(addr)? as u16;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                let value = self.vm.get_property(ops[0], ops[1] as u8)?;
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                let addr = self.vm.get_property_addr(ops[0], ops[1] as u8)?;
                self.store_result(inst, addr as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                let next = self.vm.get_next_property(ops[0], ops[1] as u8)?;
                self.store_result(inst, next as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                self.store_result(inst, (ops[0] as i16).wrapping_add(ops[1] as i16) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                self.store_result(inst, (ops[0] as i16).wrapping_sub(ops[1] as i16) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                self.store_result(inst, (ops[0] as i16).wrapping_mul(ops[1] as i16) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => {
                if ops[1] == 0 {
                    return Err(ZError::DivisionByZero);
                }
                self.store_result(inst, (ops[0] as i16).wrapping_div(ops[1] as i16) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x18 => {
                if ops[1] == 0 {
                    return Err(ZError::DivisionByZero);
                }
                self.store_result(inst, (ops[0] as i16).wrapping_rem(ops[1] as i16) as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 => {
                // call_2s
                self.do_call(ops[0], &ops[1..2], inst.store_var)?;
                Ok(ExecutionResult::Continue)
            }
            0x1A => {
                // call_2n
                self.do_call(ops[0], &ops[1..2], None)?;
                Ok(ExecutionResult::Continue)
            }
            0x1B => {
                self.window.set_colors(ops[0], ops[1]);
                Ok(ExecutionResult::Continue)
            }
            0x1C => {
                // throw: unwind to the frame CATCH captured, then return through it
                let target = ops[1] as usize;
                self.vm.call_stack.truncate(target);
                self.do_return(ops[0])
            }
            other => Err(ZError::UnsupportedOperation(format!("unassigned 2OP opcode {other:#04x}"))),
        }
    }

    // -- VAR ------------------------------------------------------------

    fn execute_var(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        if inst.opcode == 0x04 {
            return self.execute_read(inst);
        }

        let ops = self.operands(inst)?;
        match inst.opcode {
            0x00 => {
                // call / call_vs
                self.do_call(ops[0], &ops[1..], inst.store_var)?;
                Ok(ExecutionResult::Continue)
            }
            0x01 => {
                // storew
                let addr = (ops[0] as u32).wrapping_add(2 * ops[1] as u32);
                self.vm.write_word(addr, ops[2])?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                // storeb
                let addr = (ops[0] as u32).wrapping_add(ops[1] as u32);
                self.vm.write_byte(addr, ops[2] as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                self.vm.put_property(ops[0], ops[1] as u8, ops[2])?;
                Ok(ExecutionResult::Continue)
            }
            0x05 => {
                // print_char
                self.emit(&((ops[0] as u8) as char).to_string());
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                // print_num
                self.emit(&(ops[0] as i16).to_string());
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                let value = self.rng.random(ops[0] as i16);
                self.store_result(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                self.vm.push(ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // pull
                let var = ops[0] as u8;
                let value = self.vm.pop();
                self.vm.write_variable(var, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                self.window.split(ops[0]);
                Ok(ExecutionResult::Continue)
            }
            0x0B => {
                self.window.set_window(ops[0]);
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // call_vs2
                self.do_call(ops[0], &ops[1..], inst.store_var)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                self.window.erase_window(ops[0] as i16);
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                self.window.erase_line(ops[0]);
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                self.window.set_cursor(ops[0], ops[1]);
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                // get_cursor: the window delegate has no read-back path, so
                // this reports the conventional top-left default.
                let table = ops[0] as u32;
                self.vm.write_word(table, 1)?;
                self.vm.write_word(table + 2, 1)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                self.window.set_text_style(ops[0]);
                Ok(ExecutionResult::Continue)
            }
            0x12 => Ok(ExecutionResult::Continue), // buffer_mode: word-wrap is a front-end concern
            0x13 => {
                self.execute_output_stream(&ops)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => Ok(ExecutionResult::Continue), // input_stream: file input source not modeled
            0x15 => {
                self.execute_sound_effect(&ops)?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                let ch = self.input.read_char();
                self.store_result(inst, ch as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => self.execute_scan_table(inst, &ops),
            0x18 => {
                // not (v5+ VAR form)
                self.store_result(inst, !ops[0])?;
                Ok(ExecutionResult::Continue)
            }
            0x19 => {
                // call_vn
                self.do_call(ops[0], &ops[1..], None)?;
                Ok(ExecutionResult::Continue)
            }
            0x1A => {
                // call_vn2
                self.do_call(ops[0], &ops[1..], None)?;
                Ok(ExecutionResult::Continue)
            }
            0x1B => {
                // tokenise text-buffer parse-buffer [dictionary [flags]]
                let dictionary = match ops.get(2).copied().unwrap_or(0) {
                    0 => None,
                    addr => Some(addr as u32),
                };
                let flags = ops.get(3).copied().unwrap_or(0) as u8;
                self.vm.parse_text(ops[0] as u32, ops[1] as u32, flags, dictionary)?;
                Ok(ExecutionResult::Continue)
            }
            0x1C => self.execute_encode_text(&ops),
            0x1D => self.execute_copy_table(&ops),
            0x1E => self.execute_print_table(&ops),
            0x1F => {
                // check_arg_count
                let frame = self.vm.call_stack.last().ok_or(ZError::NoActiveFrame)?;
                let condition = ops[0] <= frame.num_args as u16;
                self.do_branch(inst, condition)
            }
            other => Err(ZError::UnsupportedOperation(format!("unassigned VAR opcode {other:#04x}"))),
        }
    }

    fn execute_output_stream(&mut self, ops: &[u16]) -> ZResult<()> {
        let stream = ops[0] as i16;
        match stream {
            1 => self.stream1_enabled = true,
            -1 => self.stream1_enabled = false,
            2 => self.stream2_enabled = true,
            -2 => self.stream2_enabled = false,
            3 => {
                let table = ops.get(1).copied().ok_or_else(|| {
                    ZError::UnsupportedOperation("output_stream 3 requires a table address".into())
                })? as u32;
                self.memory_streams.push((table, String::new()));
            }
            -3 => {
                if let Some((table, buf)) = self.memory_streams.pop() {
                    let bytes: Vec<u8> = buf.bytes().collect();
                    self.vm.write_word(table, bytes.len() as u16)?;
                    for (i, b) in bytes.iter().enumerate() {
                        self.vm.write_byte(table + 2 + i as u32, *b)?;
                    }
                }
            }
            4 | -4 => {} // stream 4 (command script) not modeled
            _ => {}
        }
        Ok(())
    }

    fn execute_sound_effect(&mut self, ops: &[u16]) -> ZResult<()> {
        let number = ops[0];
        let effect = ops.get(1).copied().unwrap_or(2);
        match effect {
            2 => {
                let packed_volume = ops.get(2).copied().unwrap_or(0xff);
                let volume = (packed_volume & 0xff) as u8;
                let repeats = ((packed_volume >> 8) & 0xff) as u8;
                let routine = ops.get(3).copied().unwrap_or(0);
                self.sound.play(number, volume, repeats, routine as u32);
                if routine != 0 {
                    self.call_routine_sync(routine, &[])?;
                }
            }
            3 | 4 => self.sound.stop_all(),
            _ => {}
        }
        Ok(())
    }

    fn execute_scan_table(&mut self, inst: &Instruction, ops: &[u16]) -> ZResult<ExecutionResult> {
        let x = ops[0];
        let table = ops[1] as u32;
        let len = ops[2];
        let form = ops.get(3).copied().unwrap_or(0x82) as u8;
        let entry_size = ((form & 0x7f) as u32).max(1);
        let is_word = form & 0x80 != 0;

        let mut found = 0u16;
        for i in 0..len {
            let addr = table + i as u32 * entry_size;
            let value = if is_word { self.vm.read_word(addr)? } else { self.vm.read_byte(addr)? as u16 };
            if value == x {
                found = addr as u16;
                break;
            }
        }
        self.store_result(inst, found)?;
        self.do_branch(inst, found != 0)
    }

    fn execute_encode_text(&mut self, ops: &[u16]) -> ZResult<ExecutionResult> {
        let text_buffer = ops[0] as u32;
        let length = ops[1] as usize;
        let from = ops[2] as usize;
        let coded_buffer = ops[3] as u32;

        let mut word = String::with_capacity(length);
        for i in 0..length {
            word.push(self.vm.read_byte(text_buffer + (from + i) as u32)? as char);
        }
        let encoded = text::encode_word(&word, self.vm.game.header.version)?;
        for (i, &b) in encoded.iter().enumerate() {
            self.vm.write_byte(coded_buffer + i as u32, b)?;
        }
        Ok(ExecutionResult::Continue)
    }

    fn execute_copy_table(&mut self, ops: &[u16]) -> ZResult<ExecutionResult> {
        let first = ops[0] as u32;
        let second = ops[1] as u32;
        let size = ops[2] as i16;
        let n = size.unsigned_abs() as u32;

        if ops[1] == 0 {
            for i in 0..n {
                self.vm.write_byte(first + i, 0)?;
            }
        } else if size < 0 {
            for i in 0..n {
                let b = self.vm.read_byte(first + i)?;
                self.vm.write_byte(second + i, b)?;
            }
        } else {
            let mut buf = Vec::with_capacity(n as usize);
            for i in 0..n {
                buf.push(self.vm.read_byte(first + i)?);
            }
            for (i, b) in buf.into_iter().enumerate() {
                self.vm.write_byte(second + i as u32, b)?;
            }
        }
        Ok(ExecutionResult::Continue)
    }

    fn execute_print_table(&mut self, ops: &[u16]) -> ZResult<ExecutionResult> {
        let table = ops[0] as u32;
        let width = ops[1] as u32;
        let height = ops.get(2).copied().unwrap_or(1) as u32;
        let skip = ops.get(3).copied().unwrap_or(0) as u32;

        for row in 0..height {
            let row_addr = table + row * (width + skip);
            let mut line = String::with_capacity(width as usize);
            for col in 0..width {
                line.push(self.vm.read_byte(row_addr + col)? as char);
            }
            self.emit(&line);
            if row + 1 < height {
                self.emit("\n");
            }
        }
        Ok(ExecutionResult::Continue)
    }

    fn execute_read(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let version = self.vm.game.header.version;
        let operand_values = self.operands(inst)?;
        let text_buffer = operand_values[0] as u32;
        let parse_buffer = operand_values.get(1).copied().unwrap_or(0) as u32;
        let time_limit = operand_values.get(2).copied().unwrap_or(0);
        let time_routine = operand_values.get(3).copied().unwrap_or(0);

        if version <= 3 {
            self.show_status()?;
        }

        let line = loop {
            if time_limit > 0 && time_routine != 0 {
                let deadline = Duration::from_millis(time_limit as u64 * 100);
                match self.input.read_line_with_deadline(deadline) {
                    ReadOutcome::Line(l) => break l,
                    ReadOutcome::Timeout => {
                        let aborted = self.call_routine_sync(time_routine, &[])? != 0;
                        if aborted {
                            if version >= 5 {
                                self.store_result(inst, 0)?;
                            }
                            return Ok(ExecutionResult::Continue);
                        }
                    }
                }
            } else {
                break self.input.read_line();
            }
        };

        let lowered = line.to_ascii_lowercase();
        self.write_text_buffer(text_buffer, &lowered)?;
        if parse_buffer != 0 {
            self.vm.parse_text(text_buffer, parse_buffer, 0, None)?;
        }
        if version >= 5 {
            self.store_result(inst, 10)?; // terminator: newline
        }
        Ok(ExecutionResult::Continue)
    }

    fn write_text_buffer(&mut self, addr: u32, text: &str) -> ZResult<()> {
        let max_len = self.vm.read_byte(addr)? as usize;
        let bytes: Vec<u8> = text.bytes().take(max_len).collect();
        if self.vm.game.header.version >= 5 {
            self.vm.write_byte(addr + 1, bytes.len() as u8)?;
            for (i, &b) in bytes.iter().enumerate() {
                self.vm.write_byte(addr + 2 + i as u32, b)?;
            }
        } else {
            for (i, &b) in bytes.iter().enumerate() {
                self.vm.write_byte(addr + 1 + i as u32, b)?;
            }
            self.vm.write_byte(addr + 1 + bytes.len() as u32, 0)?;
        }
        Ok(())
    }

    // -- Extended (v5+) ---------------------------------------------------

    fn execute_ext(&mut self, inst: &Instruction) -> ZResult<ExecutionResult> {
        let ext_opcode = inst.ext_opcode.unwrap_or(0);
        let ops = self.operands(inst)?;
        match ext_opcode {
            0x00 => {
                // save
                let ok = self.do_save_to_chooser();
                self.store_result(inst, ok as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x01 => {
                // restore
                let ok = self.do_restore_from_chooser();
                self.store_result(inst, if ok { 2 } else { 0 })?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                // log_shift
                let value = ops[0];
                let places = ops[1] as i16;
                let result = if places >= 0 {
                    value.wrapping_shl(places as u32)
                } else {
                    value.wrapping_shr((-places) as u32)
                };
                self.store_result(inst, result)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // art_shift: arithmetic (sign-preserving) shift
                let value = ops[0] as i16;
                let places = ops[1] as i16;
                let result = if places >= 0 {
                    value.wrapping_shl(places as u32)
                } else {
                    value.wrapping_shr((-places) as u32)
                };
                self.store_result(inst, result as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // set_font: only font 1 is available
                let result = if ops[0] == 1 { 1 } else { 0 };
                self.store_result(inst, result)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // save_undo
                self.vm.undo = Some(take_undo_snapshot(&self.vm, inst.store_var));
                self.store_result(inst, 1)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                // restore_undo
                match self.vm.undo.take() {
                    Some(snapshot) => {
                        restore_undo_snapshot(&mut self.vm, snapshot)?;
                        Ok(ExecutionResult::Continue)
                    }
                    None => {
                        self.store_result(inst, 0)?;
                        Ok(ExecutionResult::Continue)
                    }
                }
            }
            0x0B => {
                // print_unicode
                let ch = char::from_u32(ops[0] as u32).unwrap_or('?');
                self.emit(&ch.to_string());
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // check_unicode: bit 0 = can print, bit 1 = can read
                let can = char::from_u32(ops[0] as u32).is_some();
                self.store_result(inst, if can { 3 } else { 0 })?;
                Ok(ExecutionResult::Continue)
            }
            other => Err(ZError::UnsupportedOperation(format!(
                "v6 screen-model extended opcode {other:#04x} not supported"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{BufferOutput, NullSaveChooser, ScriptedInput};
    use crate::vm::Game;

    struct NullWindow;
    impl WindowDelegate for NullWindow {}
    struct NullSound;
    impl SoundDelegate for NullSound {}

    fn build_interpreter(memory: Vec<u8>) -> Interpreter {
        let game = Game::from_memory(memory).unwrap();
        let vm = VM::new(game);
        Interpreter::new(
            vm,
            Box::new(BufferOutput::default()),
            Box::new(ScriptedInput::default()),
            Box::new(NullSaveChooser),
            Box::new(NullWindow),
            Box::new(NullSound),
        )
    }

    fn minimal_v3_memory(code: &[u8]) -> Vec<u8> {
        let mut memory = vec![0u8; 0x400];
        memory[0x00] = 3;
        memory[0x04] = 0x02; // high mem base
        memory[0x06] = 0x01; // initial pc high byte
        memory[0x07] = 0x00; // initial pc low byte -> 0x0100
        memory[0x0a] = 0x00; // object table (unused by these tests)
        memory[0x0b] = 0x40;
        memory[0x0c] = 0x00; // globals
        memory[0x0d] = 0x20;
        memory[0x0e] = 0x02; // static mem base
        memory[0x0f] = 0x00;
        memory[0x100..0x100 + code.len()].copy_from_slice(code);
        memory
    }

    #[test]
    fn add_instruction_stores_sum_and_advances_pc() {
        // long form ADD: opcode 0x14, both small constants, 5 + 3 -> stack
        let memory = minimal_v3_memory(&[0x54, 0x05, 0x03, 0x00]);
        let mut interp = build_interpreter(memory);
        interp.step().unwrap();
        assert_eq!(interp.vm.pop(), 8);
        assert_eq!(interp.vm.pc, 0x104);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        // long form DIV: opcode 0x17, both small constants, 5 / 0
        let memory = minimal_v3_memory(&[0x57, 0x05, 0x00, 0x00]);
        let mut interp = build_interpreter(memory);
        assert!(interp.step().is_err());
    }

    #[test]
    fn jump_moves_pc_by_signed_offset() {
        // short form JUMP, 1OP small constant #05
        let memory = minimal_v3_memory(&[0x9C, 0x05]);
        let mut interp = build_interpreter(memory);
        interp.step().unwrap();
        assert_eq!(interp.vm.pc, 0x100 + 2 + 5 - 2);
    }

    #[test]
    fn quit_halts_execution() {
        let memory = minimal_v3_memory(&[0xBA]); // short form 0OP quit
        let mut interp = build_interpreter(memory);
        assert_eq!(interp.step().unwrap(), ExecutionResult::Quit);
    }

    #[test]
    fn call_with_null_address_stores_zero_without_pushing_a_frame() {
        // variable form CALL, one large-constant operand (0), store var 0
        let memory = minimal_v3_memory(&[0xE0, 0x3F, 0x00, 0x00, 0x00]);
        let mut interp = build_interpreter(memory);
        let depth_before = interp.vm.call_depth();
        interp.step().unwrap();
        assert_eq!(interp.vm.call_depth(), depth_before);
        assert_eq!(interp.vm.pop(), 0);
    }

    #[test]
    fn routine_declaring_too_many_locals_is_corrupted_story_file() {
        let mut memory = minimal_v3_memory(&[]);
        memory[0x200] = 16; // routine at 0x200 with an illegal 16 locals
        // variable form CALL, large-constant operand 0x0100 (packed -> *2 = 0x0200), store var 0
        memory[0x100] = 0xE0;
        memory[0x101] = 0x3F;
        memory[0x102] = 0x01;
        memory[0x103] = 0x00;
        memory[0x104] = 0x00;
        let mut interp = build_interpreter(memory);
        assert!(interp.step().is_err());
    }

    #[test]
    fn print_emits_inline_string_text() {
        // print "a", immediately followed by quit
        let mut memory = minimal_v3_memory(&[]);
        let word: u16 = 0x8000 | (6u16 << 10) | (5u16 << 5) | 5u16;
        memory[0x100] = 0xB2; // short form 0OP print
        memory[0x101] = (word >> 8) as u8;
        memory[0x102] = (word & 0xff) as u8;
        memory[0x103] = 0xBA; // quit
        let mut interp = build_interpreter(memory);
        interp.run_with_limit(2).unwrap();
    }

    #[test]
    fn je_in_variable_form_supports_more_than_two_operands() {
        // variable-form JE: small 5, small 3, small 5, branch true +4 —
        // true because operand 0 matches the third operand, not the second.
        let memory = minimal_v3_memory(&[0xC1, 0x5F, 0x05, 0x03, 0x05, 0xC4]);
        let mut interp = build_interpreter(memory);
        interp.step().unwrap();
        assert_eq!(interp.vm.pc, 0x106 + 4 - 2);
    }

    #[test]
    fn scan_table_consumes_its_own_branch_byte() {
        // variable-form SCAN_TABLE: x=7, table=0x0200 (word entries), len=2,
        // store result on the stack, branch true +5 if found.
        let mut memory = minimal_v3_memory(&[]);
        memory[0x100] = 0xF7;
        memory[0x101] = 0x47; // types: small, large, small, omitted
        memory[0x102] = 0x07; // x
        memory[0x103] = 0x02; // table addr high byte
        memory[0x104] = 0x00; // table addr low byte -> 0x0200
        memory[0x105] = 0x02; // len
        memory[0x106] = 0x00; // store result var (stack)
        memory[0x107] = 0xC5; // branch true, single-byte offset 5
        memory[0x200] = 0x00;
        memory[0x201] = 0x05; // table[0] = 5
        memory[0x202] = 0x00;
        memory[0x203] = 0x07; // table[1] = 7, matches x

        let mut interp = build_interpreter(memory);
        interp.step().unwrap();
        assert_eq!(interp.vm.pop(), 0x202);
        assert_eq!(interp.vm.pc, 0x108 + 5 - 2);
    }
}
