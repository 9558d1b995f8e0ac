//! Single-instruction formatting, the shared mechanism behind the
//! `--trace` instruction-trace sink. Deliberately limited to rendering one
//! already-decoded instruction — routine discovery and whole-story
//! disassembly are a program-analysis feature, not part of the VM.

use crate::instruction::{Instruction, OperandType};

/// Renders one instruction as `<addr>: 0x<opcode> <mnemonic> (<form>)
/// [<operands>] [<bytes-consumed>]`.
pub fn format_instruction(addr: u32, inst: &Instruction, version: u8) -> String {
    let operands: Vec<String> = inst
        .operands
        .iter()
        .zip(inst.operand_types.iter())
        .map(|(value, ty)| match ty {
            OperandType::Variable => format!("V{value:02x}"),
            _ => format!("#{value:04x}"),
        })
        .collect();

    format!(
        "{addr:05x}: 0x{:02x} {} ({:?}) [{}] [{}]",
        inst.opcode,
        inst.name(version),
        inst.form,
        operands.join(", "),
        inst.size,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    #[test]
    fn formats_a_decoded_instruction() {
        let memory = vec![0x41, 0x34, 0x78, 0x80, 0x00, 0x00];
        let inst = Instruction::decode(&memory, 0, 3).unwrap();
        let line = format_instruction(0, &inst, 3);
        assert!(line.starts_with("00000: 0x01 je"));
        assert!(line.contains("#0034"));
    }
}
