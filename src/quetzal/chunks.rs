//! Quetzal chunk payloads: IFhd (fingerprint), UMem (raw memory), Stks
//! (call stack), IntD (interpreter-specific, unused but written for
//! forward compatibility with other interpreters reading our saves).

use crate::error::{ZError, ZResult};
use crate::vm::{CallFrame, VM};

/// Interface-header chunk: the fingerprint RESTORE checks before trusting
/// a save belongs to the running story.
pub struct IFhdChunk {
    pub release: u16,
    pub serial: [u8; 6],
    pub checksum: u16,
    pub initial_pc: u32,
}

impl IFhdChunk {
    pub fn from_vm(vm: &VM) -> Self {
        let header = &vm.game.header;
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&vm.game.memory[0x12..0x18]);

        IFhdChunk {
            release: header.release,
            serial,
            checksum: header.checksum_file,
            initial_pc: vm.game.header.initial_pc as u32,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(13);
        bytes.extend_from_slice(&self.release.to_be_bytes());
        bytes.extend_from_slice(&self.serial);
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        let pc_bytes = self.initial_pc.to_be_bytes();
        bytes.extend_from_slice(&pc_bytes[1..]); // 3-byte big-endian PC
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> ZResult<Self> {
        if data.len() < 13 {
            return Err(ZError::SaveIncompatible("IFhd chunk too small".into()));
        }
        let release = u16::from_be_bytes([data[0], data[1]]);
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&data[2..8]);
        let checksum = u16::from_be_bytes([data[8], data[9]]);
        let initial_pc = ((data[10] as u32) << 16) | ((data[11] as u32) << 8) | data[12] as u32;

        Ok(IFhdChunk {
            release,
            serial,
            checksum,
            initial_pc,
        })
    }
}

/// Uncompressed dynamic-memory chunk, used as a fallback to CMem.
pub struct UMemChunk {
    pub memory: Vec<u8>,
}

impl UMemChunk {
    pub fn from_vm(vm: &VM) -> Self {
        let dynamic_size = vm.game.header.base_static_mem as usize;
        UMemChunk {
            memory: vm.game.memory[..dynamic_size].to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.memory.clone()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        UMemChunk { memory: data }
    }
}

/// Call-stack + evaluation-stack chunk.
pub struct StksChunk {
    pub data: Vec<u8>,
}

impl StksChunk {
    /// The outermost (dummy) frame never returns, so its stored "return PC"
    /// slot is otherwise unused; Quetzal reserves it, and we repurpose it to
    /// carry the VM's current PC so RESTORE knows where to resume.
    pub fn from_vm(vm: &VM) -> Self {
        let mut data = Vec::new();

        for (frame_idx, frame) in vm.call_stack.iter().enumerate() {
            let stored_pc = if frame_idx == 0 { vm.pc } else { frame.return_pc };
            let pc_bytes = stored_pc.to_be_bytes();
            data.extend_from_slice(&pc_bytes[1..]);

            let mut flags = frame.num_locals & 0x0f;
            if frame.return_store.is_some() {
                flags |= 0x10;
            }
            data.push(flags);

            if let Some(var) = frame.return_store {
                data.push(var);
            } else {
                data.push(0);
            }

            // Bitmask of which locals were supplied as arguments (low bits).
            let arg_mask: u8 = if frame.num_args >= 8 {
                0xff
            } else {
                (1u16 << frame.num_args).wrapping_sub(1) as u8
            };
            data.push(arg_mask);

            let next_frame_idx = frame_idx + 1;
            let stack_end = if next_frame_idx < vm.call_stack.len() {
                vm.call_stack[next_frame_idx].stack_base
            } else {
                vm.stack.len()
            };
            let stack_size = stack_end.saturating_sub(frame.stack_base);
            data.extend_from_slice(&(stack_size as u16).to_be_bytes());

            for i in 0..frame.num_locals as usize {
                data.extend_from_slice(&frame.locals[i].to_be_bytes());
            }
            for i in frame.stack_base..stack_end {
                data.extend_from_slice(&vm.stack[i].to_be_bytes());
            }
        }

        StksChunk { data }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn restore_to_vm(&self, vm: &mut VM) -> ZResult<()> {
        vm.call_stack.clear();
        vm.stack.clear();

        let data = &self.data;
        let mut offset = 0;
        let mut frame_idx = 0usize;
        let too_short = || ZError::SaveIncompatible("truncated Stks chunk".into());

        while offset < data.len() {
            if offset + 4 > data.len() {
                return Err(too_short());
            }
            let stored_pc = ((data[offset] as u32) << 16)
                | ((data[offset + 1] as u32) << 8)
                | (data[offset + 2] as u32);
            offset += 3;

            // The dummy frame's PC slot carries the VM's resume PC, not a
            // return address (see from_vm); every other frame's is a real
            // return PC for when that call returns.
            let return_pc = if frame_idx == 0 {
                vm.pc = stored_pc;
                0
            } else {
                stored_pc
            };

            let flags = data[offset];
            offset += 1;
            let local_count = (flags & 0x0f) as usize;
            let has_result_var = flags & 0x10 != 0;

            let return_store = if has_result_var {
                let var = *data.get(offset).ok_or_else(too_short)?;
                offset += 1;
                Some(var)
            } else {
                offset += 1; // placeholder byte written by from_vm
                None
            };

            let arg_mask = *data.get(offset).ok_or_else(too_short)?;
            offset += 1;
            let num_args = arg_mask.count_ones() as u8;

            if offset + 2 > data.len() {
                return Err(too_short());
            }
            let stack_count = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
            offset += 2;

            let mut locals = [0u16; 15];
            if offset + local_count * 2 > data.len() {
                return Err(too_short());
            }
            for local in locals.iter_mut().take(local_count) {
                *local = u16::from_be_bytes([data[offset], data[offset + 1]]);
                offset += 2;
            }

            let stack_base = vm.stack.len();
            if offset + stack_count * 2 > data.len() {
                return Err(too_short());
            }
            for _ in 0..stack_count {
                vm.stack
                    .push(u16::from_be_bytes([data[offset], data[offset + 1]]));
                offset += 2;
            }

            vm.call_stack.push(CallFrame {
                return_pc,
                return_store,
                num_locals: local_count as u8,
                locals,
                stack_base,
                num_args,
            });
            frame_idx += 1;
        }

        Ok(())
    }
}

/// Interpreter-specific chunk; we write an identifying tag but no payload.
pub struct IntDChunk {
    pub interpreter_id: [u8; 4],
    pub data: Vec<u8>,
}

impl Default for IntDChunk {
    fn default() -> Self {
        Self::new()
    }
}

impl IntDChunk {
    pub fn new() -> Self {
        IntDChunk {
            interpreter_id: *b"ZMTR",
            data: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.interpreter_id);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}
