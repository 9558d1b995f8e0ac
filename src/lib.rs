#![allow(dead_code)]

pub mod addressing;
pub mod cli_io;
pub mod dictionary;
pub mod disassembler;
pub mod error;
pub mod header;
pub mod headless;
pub mod instruction;
pub mod interpreter;
pub mod io;
pub mod objects;
pub mod opcode_tables;
pub mod quetzal;
pub mod text;
pub mod vm;
pub mod zrand;

#[cfg(test)]
mod tests {
    use crate::headless::{BufferOutput, NullSaveChooser, ScriptedInput};
    use crate::interpreter::{ExecutionResult, Interpreter};
    use crate::io::{SoundDelegate, WindowDelegate};
    use crate::vm::{Game, VM};
    use test_log::test;

    struct NullWindow;
    impl WindowDelegate for NullWindow {}
    struct NullSound;
    impl SoundDelegate for NullSound {}

    fn minimal_memory(version: u8, code: &[u8]) -> Vec<u8> {
        let mut memory = vec![0u8; 0x10000];
        memory[0x00] = version;
        memory[0x04] = 0x10; // high memory base
        memory[0x06] = 0x50; // initial PC
        memory[0x07] = 0x00;
        memory[0x0c] = 0x01; // globals
        memory[0x0d] = 0x00;
        memory[0x0e] = 0x02; // static memory base
        memory[0x0f] = 0x00;
        memory[0x5000..0x5000 + code.len()].copy_from_slice(code);
        memory
    }

    #[test]
    fn test_interpreter_simple() {
        // print_num 42, new_line, quit
        let memory = minimal_memory(3, &[0xE6, 0x7F, 42, 0xBB, 0xBA]);
        let game = Game::from_memory(memory).unwrap();
        let vm = VM::new(game);
        let mut interp = Interpreter::new(
            vm,
            Box::new(BufferOutput::default()),
            Box::new(ScriptedInput::default()),
            Box::new(NullSaveChooser),
            Box::new(NullWindow),
            Box::new(NullSound),
        );

        interp.run().unwrap();
    }

    #[test]
    fn quit_reaches_execution_result_quit_via_run_with_limit() {
        let memory = minimal_memory(3, &[0xBA]);
        let game = Game::from_memory(memory).unwrap();
        let vm = VM::new(game);
        let mut interp = Interpreter::new(
            vm,
            Box::new(BufferOutput::default()),
            Box::new(ScriptedInput::default()),
            Box::new(NullSaveChooser),
            Box::new(NullWindow),
            Box::new(NullSound),
        );

        assert_eq!(interp.run_with_limit(5).unwrap(), ExecutionResult::Quit);
    }
}
