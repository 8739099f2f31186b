use heapless::String;

use crate::NAME_MAX;

use super::DIR_ENTRY_SIZE;

/// Most 32-byte slots a long name can occupy (255 chars / 13 per slot).
pub(crate) const MAX_LFN_SLOTS: usize = 20;

/// Streaming accumulator for a VFAT long-name group. The state survives
/// sector and cluster boundary loads, so a group that straddles either is
/// assembled the same as one held in a single sector.
pub(crate) struct LfnState {
    expected: u8,
    checksum: u8,
    seen_mask: u32,
    parts: [[u16; 13]; MAX_LFN_SLOTS],
}

pub(crate) enum LfnAccept {
    Ok,
    /// The slot does not belong to a well-formed group (orphan without the
    /// LAST flag, ordinal out of range, or checksum break).
    Corrupt,
}

impl LfnState {
    pub(crate) fn new() -> Self {
        Self {
            expected: 0,
            checksum: 0,
            seen_mask: 0,
            parts: [[0xFFFF; 13]; MAX_LFN_SLOTS],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.expected = 0;
        self.checksum = 0;
        self.seen_mask = 0;
    }

    /// Feed one long-name slot (attribute 0x0F) in on-disk order.
    pub(crate) fn consume(&mut self, entry: &[u8]) -> LfnAccept {
        debug_assert!(entry.len() >= DIR_ENTRY_SIZE);
        let order = entry[0];
        let seq = order & 0x3F;
        if seq == 0 || seq as usize > MAX_LFN_SLOTS {
            self.clear();
            return LfnAccept::Corrupt;
        }

        let checksum = entry[13];
        if order & 0x40 != 0 {
            // Highest ordinal is stored first; it arms the group.
            self.clear();
            self.expected = seq;
            self.checksum = checksum;
        } else if self.expected == 0 {
            return LfnAccept::Corrupt;
        }
        if seq > self.expected || checksum != self.checksum {
            self.clear();
            return LfnAccept::Corrupt;
        }

        let mut units = [0xFFFFu16; 13];
        let mut at = 0usize;
        for offset in [1usize, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30] {
            units[at] = u16::from_le_bytes([entry[offset], entry[offset + 1]]);
            at += 1;
        }
        let slot = (seq - 1) as usize;
        self.parts[slot] = units;
        self.seen_mask |= 1 << slot;
        LfnAccept::Ok
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.expected != 0 || self.seen_mask != 0
    }

    fn is_complete_for(&self, short_name: &[u8; 11]) -> bool {
        self.expected != 0
            && self.seen_mask == (1u32 << self.expected) - 1
            && self.checksum == short_name_checksum(short_name)
    }

    /// Called at the owning short-name slot. `Ok(true)` hands back the
    /// assembled name, `Ok(false)` means no long name preceded the entry,
    /// and `Err(())` reports a malformed group (the slot before the short
    /// entry did not complete ordinal 1, or the group is not this entry's).
    pub(crate) fn finish(
        &mut self,
        short_name: &[u8; 11],
        out: &mut String<NAME_MAX>,
    ) -> Result<bool, ()> {
        out.clear();
        if !self.is_armed() {
            return Ok(false);
        }
        if !self.is_complete_for(short_name) {
            self.clear();
            return Err(());
        }

        'slots: for slot in 0..self.expected as usize {
            for unit in self.parts[slot] {
                if unit == 0x0000 || unit == 0xFFFF {
                    break 'slots;
                }
                // Keep only printable 7-bit bytes of each UTF-16 code unit,
                // matching the on-wire history of this driver. Names outside
                // that range come back filtered.
                for byte in unit.to_le_bytes() {
                    if byte == 0 || byte > 126 {
                        continue;
                    }
                    if out.push(byte as char).is_err() {
                        break 'slots;
                    }
                }
            }
        }
        self.clear();
        Ok(true)
    }
}

pub(crate) fn short_name_checksum(short: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short.iter() {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
    }
    sum
}

/// Render a packed 8.3 name as `NAME.EXT`, dropping the pad spaces.
pub(crate) fn short_name_text(short: &[u8; 11]) -> String<12> {
    let mut out = String::new();
    for &byte in &short[..8] {
        if byte == b' ' {
            break;
        }
        let _ = out.push(byte as char);
    }
    if short[8] != b' ' {
        let _ = out.push('.');
        for &byte in &short[8..11] {
            if byte == b' ' {
                break;
            }
            let _ = out.push(byte as char);
        }
    }
    out
}

/// Byte-exact match of a user-supplied name against a packed 8.3 entry.
/// Without a dot the whole name must fit the stem and leave only padding;
/// with a dot the stem and extension match their fields separately.
pub(crate) fn short_name_matches(user: &str, short: &[u8; 11]) -> bool {
    let bytes = user.as_bytes();
    let (stem, ext): (&[u8], &[u8]) = match bytes.iter().rposition(|&b| b == b'.') {
        Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
        None => (bytes, &[]),
    };
    if stem.len() > 8 || ext.len() > 3 {
        return false;
    }
    for at in 0..8 {
        let want = stem.get(at).copied().unwrap_or(b' ');
        if short[at] != want {
            return false;
        }
    }
    for at in 0..3 {
        let want = ext.get(at).copied().unwrap_or(b' ');
        if short[8 + at] != want {
            return false;
        }
    }
    true
}

/// Legality check shared by the directory and file operations: non-empty,
/// no leading space, not all spaces, none of the FAT-reserved characters,
/// and within the assembly cap.
pub(crate) fn valid_entry_name(name: &str) -> bool {
    if name.is_empty() || name.len() > NAME_MAX {
        return false;
    }
    let bytes = name.as_bytes();
    if bytes[0] == b' ' {
        return false;
    }
    const ILLEGAL: &[u8] = b"\\/:*?\"<>|";
    if bytes.iter().any(|b| ILLEGAL.contains(b)) {
        return false;
    }
    bytes.iter().any(|&b| b != b' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_lfn_entry(
        seq: u8,
        is_last: bool,
        checksum: u8,
        chars: &[u16],
    ) -> [u8; DIR_ENTRY_SIZE] {
        let mut entry = [0xFFu8; DIR_ENTRY_SIZE];
        entry[0] = seq | if is_last { 0x40 } else { 0 };
        entry[11] = 0x0F;
        entry[12] = 0;
        entry[13] = checksum;
        entry[26] = 0;
        entry[27] = 0;
        let offsets = [1usize, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
        for (at, off) in offsets.iter().enumerate() {
            let value = if at < chars.len() {
                chars[at]
            } else if at == chars.len() {
                0x0000
            } else {
                0xFFFF
            };
            let b = value.to_le_bytes();
            entry[*off] = b[0];
            entry[*off + 1] = b[1];
        }
        entry
    }

    fn utf16(text: &str) -> heapless::Vec<u16, 64> {
        text.encode_utf16().collect()
    }

    fn feed_group(state: &mut LfnState, name: &str, checksum: u8) {
        let units = utf16(name);
        let slots = (units.len() + 12) / 13;
        for seq in (1..=slots).rev() {
            let start = (seq - 1) * 13;
            let end = core::cmp::min(start + 13, units.len());
            let entry = make_lfn_entry(seq as u8, seq == slots, checksum, &units[start..end]);
            assert!(matches!(state.consume(&entry), LfnAccept::Ok));
        }
    }

    #[test]
    fn assembles_multi_slot_long_name() {
        let short = *b"LONGNA~1TXT";
        let checksum = short_name_checksum(&short);
        let mut state = LfnState::new();
        feed_group(&mut state, "LongFileNameData.txt", checksum);

        let mut out = String::new();
        assert_eq!(state.finish(&short, &mut out), Ok(true));
        assert_eq!(out.as_str(), "LongFileNameData.txt");
    }

    #[test]
    fn filters_bytes_outside_printable_ascii() {
        let short = *b"ODD     TXT";
        let checksum = short_name_checksum(&short);
        let mut state = LfnState::new();
        // 0x0141 carries the bytes 0x41 and 0x01; both survive the filter's
        // range test only when <= 126 and nonzero, so 'A' and 0x01 remain.
        let entry = make_lfn_entry(1, true, checksum, &[0x0141, b'b' as u16]);
        assert!(matches!(state.consume(&entry), LfnAccept::Ok));

        let mut out = String::new();
        assert_eq!(state.finish(&short, &mut out), Ok(true));
        assert_eq!(out.as_bytes(), &[0x41, 0x01, b'b']);
    }

    #[test]
    fn incomplete_group_is_corrupt_at_the_short_entry() {
        let short = *b"PART    TXT";
        let checksum = short_name_checksum(&short);
        let mut state = LfnState::new();
        // LAST slot of a 2-slot group arrives, ordinal 1 never does.
        let entry = make_lfn_entry(2, true, checksum, &utf16("tail"));
        assert!(matches!(state.consume(&entry), LfnAccept::Ok));

        let mut out = String::new();
        assert_eq!(state.finish(&short, &mut out), Err(()));
    }

    #[test]
    fn orphan_slot_without_last_flag_is_corrupt() {
        let mut state = LfnState::new();
        let entry = make_lfn_entry(1, false, 0x42, &utf16("x"));
        assert!(matches!(state.consume(&entry), LfnAccept::Corrupt));
    }

    #[test]
    fn checksum_break_rejects_the_group() {
        let short = *b"REAL    TXT";
        let mut state = LfnState::new();
        feed_group(&mut state, "other.txt", 0x13);

        let mut out = String::new();
        assert_eq!(state.finish(&short, &mut out), Err(()));
    }

    #[test]
    fn short_name_renders_with_dot() {
        assert_eq!(short_name_text(b"README  TXT").as_str(), "README.TXT");
        assert_eq!(short_name_text(b"DIR1       ").as_str(), "DIR1");
    }

    #[test]
    fn short_match_requires_exact_fields() {
        assert!(short_name_matches("README.TXT", b"README  TXT"));
        assert!(short_name_matches("DIR1", b"DIR1       "));
        assert!(!short_name_matches("README", b"README  TXT"));
        assert!(!short_name_matches("readme.txt", b"README  TXT"));
        assert!(!short_name_matches("VERYLONGNAME", b"VERYLONGTXT"));
    }

    #[test]
    fn name_validation_rules() {
        assert!(valid_entry_name("notes.txt"));
        assert!(valid_entry_name("My Documents"));
        assert!(!valid_entry_name(""));
        assert!(!valid_entry_name(" leading"));
        assert!(!valid_entry_name("   "));
        assert!(!valid_entry_name("a/b"));
        assert!(!valid_entry_name("what?"));
    }
}
