//! Loads a Quetzal save file and restores it into a running VM.

use crate::error::{ZError, ZResult};
use crate::quetzal::chunks::{IFhdChunk, StksChunk};
use crate::quetzal::compressed_memory::decompress_memory;
use crate::quetzal::iff::IffFile;
use crate::vm::VM;
use log::{debug, info};
use std::path::Path;

pub struct RestoreGame {
    iff: IffFile,
}

impl RestoreGame {
    pub fn from_file(path: &Path) -> ZResult<Self> {
        info!("loading save game from {path:?}");
        let iff = IffFile::read_from_file(path)?;

        if &iff.form_type != b"IFZS" {
            return Err(ZError::SaveIncompatible(format!(
                "not a Quetzal save file (form type {:?})",
                std::str::from_utf8(&iff.form_type).unwrap_or("<invalid>")
            )));
        }
        if iff.find_chunk(b"IFhd").is_none() {
            return Err(ZError::SaveIncompatible("missing IFhd chunk".into()));
        }
        if iff.find_chunk(b"CMem").is_none() && iff.find_chunk(b"UMem").is_none() {
            return Err(ZError::SaveIncompatible(
                "missing memory chunk (CMem or UMem)".into(),
            ));
        }
        if iff.find_chunk(b"Stks").is_none() {
            return Err(ZError::SaveIncompatible("missing Stks chunk".into()));
        }

        Ok(RestoreGame { iff })
    }

    /// Restores the save into `vm`. The fingerprint (release, serial,
    /// checksum, and initial PC) must match exactly; a save from a
    /// different story, or a different release/serial/checksum of the
    /// same story, is rejected outright rather than loaded with a warning.
    pub fn restore_to_vm(&self, vm: &mut VM) -> ZResult<()> {
        let ifhd_chunk = self
            .iff
            .find_chunk(b"IFhd")
            .ok_or_else(|| ZError::SaveIncompatible("missing IFhd chunk".into()))?;
        let ifhd = IFhdChunk::from_bytes(&ifhd_chunk.data)?;

        let mut game_serial = [0u8; 6];
        game_serial.copy_from_slice(&vm.game.memory[0x12..0x18]);

        let expected_pc = vm.game.header.initial_pc as u32;
        if ifhd.release != vm.game.header.release
            || ifhd.serial != game_serial
            || ifhd.checksum != vm.game.header.checksum_file
            || ifhd.initial_pc != expected_pc
        {
            return Err(ZError::SaveIncompatible(
                "save fingerprint (release/serial/checksum/initial PC) does not match the running story"
                    .into(),
            ));
        }

        let dynamic_size = vm.game.header.base_static_mem as usize;
        if let Some(cmem_chunk) = self.iff.find_chunk(b"CMem") {
            debug!("restoring from CMem chunk");
            let original_dynamic = &vm.game.original_memory[..dynamic_size];
            let restored = decompress_memory(&cmem_chunk.data, original_dynamic)?;
            vm.game.memory[..dynamic_size].copy_from_slice(&restored);
        } else if let Some(umem_chunk) = self.iff.find_chunk(b"UMem") {
            debug!("restoring from UMem chunk");
            if umem_chunk.data.len() != dynamic_size {
                return Err(ZError::SaveIncompatible(format!(
                    "UMem size {} does not match dynamic memory size {dynamic_size}",
                    umem_chunk.data.len()
                )));
            }
            vm.game.memory[..dynamic_size].copy_from_slice(&umem_chunk.data);
        }

        let stks_chunk = self
            .iff
            .find_chunk(b"Stks")
            .ok_or_else(|| ZError::SaveIncompatible("missing Stks chunk".into()))?;
        let stks = StksChunk {
            data: stks_chunk.data.clone(),
        };
        stks.restore_to_vm(vm)?;

        info!("game restored ({} call frames)", vm.call_stack.len());
        Ok(())
    }
}
