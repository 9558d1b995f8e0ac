//! Dictionary binary search and the READ/TOKENISE word tokenizer.

use crate::error::ZResult;
use crate::text;
use crate::vm::VM;
use log::debug;
use std::cmp::Ordering;

/// A lexed token: the word's text and its byte range within the text buffer.
struct Token {
    text: String,
    start: usize,
    len: usize,
}

impl VM {
    fn dictionary_separators(&self, dict_addr: u32) -> ZResult<Vec<u8>> {
        let sep_count = self.read_byte(dict_addr)?;
        let mut seps = Vec::with_capacity(sep_count as usize);
        for i in 0..sep_count as u32 {
            seps.push(self.read_byte(dict_addr + 1 + i)?);
        }
        Ok(seps)
    }

    /// Binary-searches the main dictionary for `word`, returning its
    /// absolute address or 0 if absent.
    pub fn lookup_dictionary(&self, word: &str) -> ZResult<u32> {
        self.lookup_dictionary_in(word, self.game.header.dictionary as u32)
    }

    /// Binary-searches a dictionary table at `dict_addr` (the main
    /// dictionary, or an alternate one named by TOKENISE's operand) for
    /// `word`, returning its absolute address or 0 if absent.
    pub fn lookup_dictionary_in(&self, word: &str, dict_addr: u32) -> ZResult<u32> {
        let sep_count = self.read_byte(dict_addr)? as u32;
        let entry_start = dict_addr + 1 + sep_count;
        let entry_length = self.read_byte(entry_start)? as u32;
        let entry_count = self.read_word(entry_start + 1)? as i32;
        let entries_addr = entry_start + 3;

        let key_bytes = if self.game.header.version <= 3 { 4 } else { 6 };
        let search_key = text::encode_word(word, self.game.header.version)?;

        let mut low = 0i32;
        let mut high = entry_count - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let addr = entries_addr + mid as u32 * entry_length;
            let mut cmp = Ordering::Equal;
            for i in 0..key_bytes {
                let dict_byte = self.read_byte(addr + i)?;
                let search_byte = search_key[i as usize];
                cmp = search_byte.cmp(&dict_byte);
                if cmp != Ordering::Equal {
                    break;
                }
            }
            match cmp {
                Ordering::Less => high = mid - 1,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => {
                    debug!("dictionary: found '{word}' at {addr:#06x}");
                    return Ok(addr);
                }
            }
        }
        debug!("dictionary: '{word}' not found");
        Ok(0)
    }

    fn lex(&self, text_chars: &str, separators: &[u8]) -> Vec<Token> {
        let chars: Vec<char> = text_chars.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;
        let mut word_start: Option<usize> = None;

        let flush = |tokens: &mut Vec<Token>, start: Option<usize>, end: usize, chars: &[char]| {
            if let Some(s) = start {
                if end > s {
                    tokens.push(Token {
                        text: chars[s..end].iter().collect(),
                        start: s,
                        len: end - s,
                    });
                }
            }
        };

        while i < chars.len() {
            let ch = chars[i];
            let is_sep = ch == ' ' || separators.iter().any(|&b| b as char == ch);
            if is_sep {
                flush(&mut tokens, word_start, i, &chars);
                word_start = None;
                if ch != ' ' {
                    // A separator byte is itself tokenized as a one-character word.
                    tokens.push(Token {
                        text: ch.to_string(),
                        start: i,
                        len: 1,
                    });
                }
            } else if word_start.is_none() {
                word_start = Some(i);
            }
            i += 1;
        }
        flush(&mut tokens, word_start, chars.len(), &chars);
        tokens
    }

    /// Runs READ/SREAD's tokenizer: lexes the text buffer and fills the
    /// parse buffer with dictionary lookups.
    ///
    /// `flags` bit 0 suppresses dictionary lookup entirely (TOKENISE only;
    /// READ always passes 0); bit 1 flags unrecognized words with address 1
    /// instead of 0. `dictionary` overrides the story's default dictionary
    /// table, per TOKENISE's optional third operand.
    pub fn parse_text(
        &mut self,
        text_buffer: u32,
        parse_buffer: u32,
        flags: u8,
        dictionary: Option<u32>,
    ) -> ZResult<()> {
        let v5_plus = self.game.header.version >= 5;
        let dict_addr = dictionary.unwrap_or(self.game.header.dictionary as u32);
        let suppress_lookup = flags & 0x01 != 0;
        let flag_unknown = flags & 0x02 != 0;

        let (text_start_offset, text): (u32, String) = if v5_plus {
            let cur_len = self.read_byte(text_buffer + 1)? as usize;
            let mut s = String::with_capacity(cur_len);
            for i in 0..cur_len {
                s.push(self.read_byte(text_buffer + 2 + i as u32)? as char);
            }
            (2, s)
        } else {
            let mut s = String::new();
            let mut i = 0u32;
            loop {
                let ch = self.read_byte(text_buffer + 1 + i)?;
                if ch == 0 {
                    break;
                }
                s.push(ch as char);
                i += 1;
            }
            (1, s)
        };

        let separators = self.dictionary_separators(dict_addr)?;
        let tokens = self.lex(&text, &separators);

        let max_words = self.read_byte(parse_buffer)? as usize;
        let word_count = tokens.len().min(max_words);
        self.write_byte(parse_buffer + 1, word_count as u8)?;

        for (i, token) in tokens.iter().take(word_count).enumerate() {
            let looked_up = if suppress_lookup {
                0
            } else {
                self.lookup_dictionary_in(&token.text.to_ascii_lowercase(), dict_addr)?
            };
            let entry_value = if looked_up == 0 && flag_unknown && !suppress_lookup {
                1
            } else {
                looked_up
            };
            let entry_offset = parse_buffer + 2 + (i * 4) as u32;
            self.write_word(entry_offset, entry_value as u16)?;
            self.write_byte(entry_offset + 2, token.len as u8)?;
            self.write_byte(
                entry_offset + 3,
                (token.start as u32 + text_start_offset) as u8,
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Game;

    fn build_vm_with_dict(words: &[&str]) -> VM {
        let mut memory = vec![0u8; 0x2000];
        memory[0x00] = 3;
        memory[0x04] = 0x10;
        memory[0x06] = 0x50;
        memory[0x08] = 0x01; // dictionary at 0x0100
        memory[0x09] = 0x00;
        memory[0x0c] = 0x01;
        memory[0x0d] = 0x80;
        memory[0x0e] = 0x02;

        let dict = 0x0100usize;
        memory[dict] = 1; // one separator
        memory[dict + 1] = b'.';
        let entry_start = dict + 2;
        memory[entry_start] = 7; // entry length (4 key bytes + 3 data)
        memory[entry_start + 1] = 0;
        memory[entry_start + 2] = words.len() as u8;

        let mut sorted: Vec<_> = words.to_vec();
        sorted.sort();
        let entries_addr = entry_start + 3;
        for (i, w) in sorted.iter().enumerate() {
            let encoded = text::encode_word(w, 3).unwrap();
            let addr = entries_addr + i * 7;
            memory[addr..addr + 4].copy_from_slice(&encoded);
        }

        let game = Game::from_memory(memory).unwrap();
        VM::new(game)
    }

    /// Writes a second, separator-free dictionary table into `vm`'s memory
    /// at `addr`, for exercising TOKENISE's alternate-dictionary operand.
    fn add_alt_dictionary(vm: &mut VM, addr: usize, words: &[&str]) {
        vm.game.memory[addr] = 0; // no separators
        let entry_start = addr + 1;
        vm.game.memory[entry_start] = 7;
        vm.game.memory[entry_start + 1] = 0;
        vm.game.memory[entry_start + 2] = words.len() as u8;
        let mut sorted: Vec<_> = words.to_vec();
        sorted.sort();
        let entries_addr = entry_start + 3;
        for (i, w) in sorted.iter().enumerate() {
            let encoded = text::encode_word(w, 3).unwrap();
            let entry = entries_addr + i * 7;
            vm.game.memory[entry..entry + 4].copy_from_slice(&encoded);
        }
    }

    fn write_text_buffer(vm: &mut VM, addr: usize, word: &[u8]) {
        vm.game.memory[addr] = 20; // max length
        vm.game.memory[addr + 1..addr + 1 + word.len()].copy_from_slice(word);
        vm.game.memory[addr + 1 + word.len()] = 0;
    }

    #[test]
    fn finds_known_word() {
        let vm = build_vm_with_dict(&["north", "south", "look"]);
        assert_ne!(vm.lookup_dictionary("look").unwrap(), 0);
    }

    #[test]
    fn unknown_word_returns_zero() {
        let vm = build_vm_with_dict(&["north", "south"]);
        assert_eq!(vm.lookup_dictionary("xyzzy").unwrap(), 0);
    }

    #[test]
    fn lex_splits_on_separator_and_keeps_it_as_a_word() {
        let vm = build_vm_with_dict(&["look"]);
        let tokens = vm.lex("look.", &[b'.']);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "look");
        assert_eq!(tokens[1].text, ".");
    }

    #[test]
    fn tokenise_suppress_lookup_flag_leaves_dictionary_address_zero() {
        let mut vm = build_vm_with_dict(&["look"]);
        let text_buffer = 0x0300;
        let parse_buffer = 0x0400u32;
        write_text_buffer(&mut vm, text_buffer, b"look");
        vm.game.memory[parse_buffer as usize] = 4; // max words

        vm.parse_text(text_buffer as u32, parse_buffer, 0x01, None).unwrap();

        assert_eq!(vm.read_byte(parse_buffer + 1).unwrap(), 1);
        assert_eq!(vm.read_word(parse_buffer + 2).unwrap(), 0);
    }

    #[test]
    fn tokenise_flags_unknown_words_with_address_one() {
        let mut vm = build_vm_with_dict(&["look"]);
        let text_buffer = 0x0300;
        let parse_buffer = 0x0400u32;
        write_text_buffer(&mut vm, text_buffer, b"xyzzy");
        vm.game.memory[parse_buffer as usize] = 4;

        vm.parse_text(text_buffer as u32, parse_buffer, 0x02, None).unwrap();

        assert_eq!(vm.read_word(parse_buffer + 2).unwrap(), 1);
    }

    #[test]
    fn tokenise_uses_alternate_dictionary_operand_when_given() {
        let mut vm = build_vm_with_dict(&["look"]);
        let alt_dict_addr = 0x0180;
        add_alt_dictionary(&mut vm, alt_dict_addr, &["jump"]);

        let text_buffer = 0x0300;
        let parse_buffer = 0x0400u32;
        write_text_buffer(&mut vm, text_buffer, b"jump");
        vm.game.memory[parse_buffer as usize] = 4;

        vm.parse_text(text_buffer as u32, parse_buffer, 0, Some(alt_dict_addr as u32))
            .unwrap();

        assert_ne!(vm.read_word(parse_buffer + 2).unwrap(), 0);
        assert_eq!(vm.lookup_dictionary("jump").unwrap(), 0); // absent from the main dictionary
    }
}
