//! End-to-end scenarios driven through the public `Interpreter`/`VM` API,
//! each built from literal instruction bytes rather than a bundled game file.

use zmtrellis::headless::{BufferOutput, NullSaveChooser, ScriptedInput};
use zmtrellis::interpreter::{ExecutionResult, Interpreter};
use zmtrellis::io::{SoundDelegate, WindowDelegate};
use zmtrellis::quetzal::{RestoreGame, SaveGame};
use zmtrellis::vm::{Game, VM};

struct NullWindow;
impl WindowDelegate for NullWindow {}
struct NullSound;
impl SoundDelegate for NullSound {}

fn minimal_v3_memory(code: &[u8]) -> Vec<u8> {
    let mut memory = vec![0u8; 0x400];
    memory[0x00] = 3;
    memory[0x04] = 0x02;
    memory[0x06] = 0x01;
    memory[0x07] = 0x00; // initial PC 0x0100
    memory[0x0a] = 0x00;
    memory[0x0b] = 0x40;
    memory[0x0c] = 0x00;
    memory[0x0d] = 0x20;
    memory[0x0e] = 0x02;
    memory[0x0f] = 0x00;
    memory[0x100..0x100 + code.len()].copy_from_slice(code);
    memory
}

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

#[test]
fn add_constants_stores_sum_and_advances_pc() {
    // long 2OP ADD: small 5, small 3, store var 0
    let memory = minimal_v3_memory(&[0x54, 0x05, 0x03, 0x00]);
    let mut interp = build_interpreter(memory);
    interp.step().unwrap();
    assert_eq!(interp.vm.pop(), 8);
    assert_eq!(interp.vm.pc, 0x1004);
}

#[test]
fn je_with_matching_variables_branches_true_by_four() {
    // long 2OP JE: variable 1, variable 1, branch byte 0xC4 (sense=1, single-byte, offset=4)
    let memory = minimal_v3_memory(&[0x41, 0x01, 0x01, 0xC4]);
    let mut interp = build_interpreter(memory);
    let pc_after_instruction = 0x1004u32;
    interp.step().unwrap();
    assert_eq!(interp.vm.pc, pc_after_instruction + 4 - 2);
}

#[test]
fn call_v3_packed_address_invokes_routine_with_one_argument() {
    // routine at byte address 0x2468 (paddr 0x1234 * 2), zero locals, one RET instruction
    let mut memory = minimal_v3_memory(&[]);
    memory[0x2468] = 0; // 0 locals
    memory[0x2469] = 0x0B; // ret (1OP short form), operand: variable
    memory[0x246A] = 0x01; // local 1 (the passed argument)
                            // variable-form CALL: large constant 0x1234, variable 5, store var 0xFF
    memory[0x100] = 0xE0;
    memory[0x101] = 0x2F; // operand types: 00 (large), 10 (var), 11, 11
    memory[0x102] = 0x12;
    memory[0x103] = 0x34;
    memory[0x104] = 0x05; // operand: variable 5 (a local of the implicit top-level frame, which has
                           // zero locals, so this reads 0 — only the call itself is under test here)
    memory[0x105] = 0xFF;

    let mut interp = build_interpreter(memory);
    interp.step().unwrap(); // CALL
    assert_eq!(interp.vm.pc, 0x2469);
    assert_eq!(interp.vm.call_depth(), 2);
}

#[test]
fn print_inline_string_emits_text_then_quits() {
    // Z-chars 6,7,5 -> "ab" in alphabet A0, with a trailing shift-to-A2 as padding
    let mut memory = minimal_v3_memory(&[]);
    let word: u16 = 0x8000 | (6u16 << 10) | (7u16 << 5) | 5u16;
    memory[0x100] = 0xB2; // print (short 0OP)
    memory[0x101] = (word >> 8) as u8;
    memory[0x102] = (word & 0xff) as u8;
    memory[0x103] = 0xBA; // quit

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
    assert_eq!(interp.run_with_limit(2).unwrap(), ExecutionResult::Quit);
}

fn build_object_story() -> Vec<u8> {
    let mut memory = vec![0u8; 0x1000];
    memory[0x00] = 3;
    memory[0x04] = 0x08;
    memory[0x06] = 0x08;
    memory[0x0a] = 0x00; // object table at 0x0040
    memory[0x0b] = 0x40;
    memory[0x0e] = 0x08;
    memory[0x0f] = 0x00;

    let obj_tree_base = 0x0040 + 31 * 2;
    let entry_size = 9;
    let obj5 = obj_tree_base + 4 * entry_size;

    let prop_table_addr: usize = 0x0300;
    memory[obj5 + 7] = (prop_table_addr >> 8) as u8;
    memory[obj5 + 8] = (prop_table_addr & 0xff) as u8;
    memory[prop_table_addr] = 0; // no short name
    memory[prop_table_addr + 1] = 0; // property list terminator

    // object 5's attribute 12 lives in byte offset 1 (attr 8-15), bit 3
    memory[obj5 + 1] |= 1 << 3;
    memory
}

#[test]
fn object_attribute_test_and_clear() {
    let memory = build_object_story();
    let game = Game::from_memory(memory).unwrap();
    let vm = VM::new(game);
    assert!(vm.test_attribute(5, 12).unwrap());

    let mut vm = vm;
    vm.set_attribute(5, 12, false).unwrap();
    assert!(!vm.test_attribute(5, 12).unwrap());
}

#[test]
fn save_then_restore_preserves_the_current_pc() {
    let dir = std::env::temp_dir();
    let save_path = dir.join(format!("zmtrellis-e2e-pc-{}.qzl", std::process::id()));

    let memory = minimal_v3_memory(&[0x54, 0x05, 0x03, 0x00, 0xBA]); // ADD, then QUIT
    let mut interp = build_interpreter(memory.clone());
    interp.step().unwrap(); // past the ADD, so pc has moved off the initial PC
    let pc_before_save = interp.vm.pc;
    assert_ne!(pc_before_save, interp.vm.game.header.initial_pc as u32);

    SaveGame::save_to_file(&interp.vm, &save_path).unwrap();

    let game2 = Game::from_memory(memory).unwrap();
    let mut vm2 = VM::new(game2);
    let restore = RestoreGame::from_file(&save_path).unwrap();
    restore.restore_to_vm(&mut vm2).unwrap();

    assert_eq!(vm2.pc, pc_before_save);

    let _ = std::fs::remove_file(&save_path);
}

#[test]
fn save_then_restore_under_a_different_story_is_rejected() {
    let dir = std::env::temp_dir();
    let save_path = dir.join(format!("zmtrellis-e2e-{}.qzl", std::process::id()));

    let memory_s1 = minimal_v3_memory(&[0xBA]);
    let game_s1 = Game::from_memory(memory_s1).unwrap();
    let vm_s1 = VM::new(game_s1);
    SaveGame::save_to_file(&vm_s1, &save_path).unwrap();

    let mut memory_s2 = minimal_v3_memory(&[0xBA]);
    memory_s2[0x12] = b'9'; // different serial number -> fingerprint mismatch
    let game_s2 = Game::from_memory(memory_s2).unwrap();
    let mut vm_s2 = VM::new(game_s2);

    let restore = RestoreGame::from_file(&save_path).unwrap();
    let result = restore.restore_to_vm(&mut vm_s2);
    assert!(result.is_err());
    assert_eq!(vm_s2.pc, vm_s2.game.header.initial_pc as u32);

    let _ = std::fs::remove_file(&save_path);
}
