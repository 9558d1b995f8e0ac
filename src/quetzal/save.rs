//! Writes a Quetzal save file from the running VM. Mirrors restore.rs's
//! chunk layout in reverse.

use crate::error::ZResult;
use crate::quetzal::chunks::{IFhdChunk, IntDChunk, StksChunk};
use crate::quetzal::compressed_memory::CMemChunk;
use crate::quetzal::iff::IffFile;
use crate::vm::VM;
use log::info;
use std::path::Path;

pub struct SaveGame;

impl SaveGame {
    /// Serializes the VM's current state to a Quetzal (.qzl/.sav) file.
    pub fn save_to_file(vm: &VM, path: &Path) -> ZResult<()> {
        let mut iff = IffFile::new();

        let ifhd = IFhdChunk::from_vm(vm);
        iff.add_chunk(*b"IFhd", ifhd.to_bytes());

        let cmem = CMemChunk::from_memory(
            &vm.game.memory[..vm.game.header.base_static_mem as usize],
            &vm.game.original_memory[..vm.game.header.base_static_mem as usize],
        );
        iff.add_chunk(*b"CMem", cmem.to_bytes());

        let stks = StksChunk::from_vm(vm);
        iff.add_chunk(*b"Stks", stks.to_bytes());

        iff.add_chunk(*b"IntD", IntDChunk::new().to_bytes());

        iff.write_to_file(path)?;
        info!("game saved to {path:?}");
        Ok(())
    }
}

/// A single in-process snapshot for SAVE_UNDO / RESTORE_UNDO: same state,
/// no file I/O. `result_var` is SAVE_UNDO's own store byte, re-used on
/// restore to write the "freshly restored" value 2 into the right place.
pub fn take_undo_snapshot(vm: &VM, result_var: Option<u8>) -> crate::vm::UndoSnapshot {
    crate::vm::UndoSnapshot {
        memory: vm.game.memory.clone(),
        stack: vm.stack.clone(),
        call_stack: vm.call_stack.clone(),
        pc: vm.pc,
        result_var,
    }
}

pub fn restore_undo_snapshot(vm: &mut VM, snapshot: crate::vm::UndoSnapshot) -> ZResult<()> {
    vm.game.memory = snapshot.memory;
    vm.stack = snapshot.stack;
    vm.call_stack = snapshot.call_stack;
    vm.pc = snapshot.pc;
    if let Some(var) = snapshot.result_var {
        vm.write_variable(var, 2)?;
    }
    Ok(())
}
