// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use mii_system::cpu::TraceRecord;

// Spec: WDC W65C02S datasheet, instruction set tables
// Design:
//   Table driven 65C02 disassembler used for the instruction trace ring
//   and the debug console. The table is indexed by opcode and fully
//   covers the 65C02 map; undefined opcodes print as nop with their
//   documented widths.

#[derive(Clone, Copy)]
enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
    ZeroPageIndirect,
    Indirect,
    IndirectX16,
    Relative,
}

impl Mode {
    fn operand_len(self) -> usize {
        match self {
            Mode::Implied | Mode::Accumulator => 0,
            Mode::Immediate
            | Mode::ZeroPage
            | Mode::ZeroPageX
            | Mode::ZeroPageY
            | Mode::IndirectX
            | Mode::IndirectY
            | Mode::ZeroPageIndirect
            | Mode::Relative => 1,
            Mode::Absolute
            | Mode::AbsoluteX
            | Mode::AbsoluteY
            | Mode::Indirect
            | Mode::IndirectX16 => 2,
        }
    }
}

struct OpInfo {
    mnemonic: &'static str,
    mode: Mode,
}

const fn op(mnemonic: &'static str, mode: Mode) -> OpInfo {
    OpInfo { mnemonic, mode }
}

#[rustfmt::skip]
const OPCODES: [OpInfo; 256] = [
    // 0x00
    op("brk", Mode::Implied), op("ora", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("tsb", Mode::ZeroPage), op("ora", Mode::ZeroPage), op("asl", Mode::ZeroPage), op("nop", Mode::Implied),
    op("php", Mode::Implied), op("ora", Mode::Immediate), op("asl", Mode::Accumulator), op("nop", Mode::Implied),
    op("tsb", Mode::Absolute), op("ora", Mode::Absolute), op("asl", Mode::Absolute), op("nop", Mode::Implied),
    // 0x10
    op("bpl", Mode::Relative), op("ora", Mode::IndirectY), op("ora", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("trb", Mode::ZeroPage), op("ora", Mode::ZeroPageX), op("asl", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("clc", Mode::Implied), op("ora", Mode::AbsoluteY), op("inc", Mode::Accumulator), op("nop", Mode::Implied),
    op("trb", Mode::Absolute), op("ora", Mode::AbsoluteX), op("asl", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0x20
    op("jsr", Mode::Absolute), op("and", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("bit", Mode::ZeroPage), op("and", Mode::ZeroPage), op("rol", Mode::ZeroPage), op("nop", Mode::Implied),
    op("plp", Mode::Implied), op("and", Mode::Immediate), op("rol", Mode::Accumulator), op("nop", Mode::Implied),
    op("bit", Mode::Absolute), op("and", Mode::Absolute), op("rol", Mode::Absolute), op("nop", Mode::Implied),
    // 0x30
    op("bmi", Mode::Relative), op("and", Mode::IndirectY), op("and", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("bit", Mode::ZeroPageX), op("and", Mode::ZeroPageX), op("rol", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("sec", Mode::Implied), op("and", Mode::AbsoluteY), op("dec", Mode::Accumulator), op("nop", Mode::Implied),
    op("bit", Mode::AbsoluteX), op("and", Mode::AbsoluteX), op("rol", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0x40
    op("rti", Mode::Implied), op("eor", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("nop", Mode::ZeroPage), op("eor", Mode::ZeroPage), op("lsr", Mode::ZeroPage), op("nop", Mode::Implied),
    op("pha", Mode::Implied), op("eor", Mode::Immediate), op("lsr", Mode::Accumulator), op("nop", Mode::Implied),
    op("jmp", Mode::Absolute), op("eor", Mode::Absolute), op("lsr", Mode::Absolute), op("nop", Mode::Implied),
    // 0x50
    op("bvc", Mode::Relative), op("eor", Mode::IndirectY), op("eor", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("nop", Mode::ZeroPageX), op("eor", Mode::ZeroPageX), op("lsr", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("cli", Mode::Implied), op("eor", Mode::AbsoluteY), op("phy", Mode::Implied), op("nop", Mode::Implied),
    op("nop", Mode::Absolute), op("eor", Mode::AbsoluteX), op("lsr", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0x60
    op("rts", Mode::Implied), op("adc", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("stz", Mode::ZeroPage), op("adc", Mode::ZeroPage), op("ror", Mode::ZeroPage), op("nop", Mode::Implied),
    op("pla", Mode::Implied), op("adc", Mode::Immediate), op("ror", Mode::Accumulator), op("nop", Mode::Implied),
    op("jmp", Mode::Indirect), op("adc", Mode::Absolute), op("ror", Mode::Absolute), op("nop", Mode::Implied),
    // 0x70
    op("bvs", Mode::Relative), op("adc", Mode::IndirectY), op("adc", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("stz", Mode::ZeroPageX), op("adc", Mode::ZeroPageX), op("ror", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("sei", Mode::Implied), op("adc", Mode::AbsoluteY), op("ply", Mode::Implied), op("nop", Mode::Implied),
    op("jmp", Mode::IndirectX16), op("adc", Mode::AbsoluteX), op("ror", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0x80
    op("bra", Mode::Relative), op("sta", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("sty", Mode::ZeroPage), op("sta", Mode::ZeroPage), op("stx", Mode::ZeroPage), op("nop", Mode::Implied),
    op("dey", Mode::Implied), op("bit", Mode::Immediate), op("txa", Mode::Implied), op("nop", Mode::Implied),
    op("sty", Mode::Absolute), op("sta", Mode::Absolute), op("stx", Mode::Absolute), op("nop", Mode::Implied),
    // 0x90
    op("bcc", Mode::Relative), op("sta", Mode::IndirectY), op("sta", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("sty", Mode::ZeroPageX), op("sta", Mode::ZeroPageX), op("stx", Mode::ZeroPageY), op("nop", Mode::Implied),
    op("tya", Mode::Implied), op("sta", Mode::AbsoluteY), op("txs", Mode::Implied), op("nop", Mode::Implied),
    op("stz", Mode::Absolute), op("sta", Mode::AbsoluteX), op("stz", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0xa0
    op("ldy", Mode::Immediate), op("lda", Mode::IndirectX), op("ldx", Mode::Immediate), op("nop", Mode::Implied),
    op("ldy", Mode::ZeroPage), op("lda", Mode::ZeroPage), op("ldx", Mode::ZeroPage), op("nop", Mode::Implied),
    op("tay", Mode::Implied), op("lda", Mode::Immediate), op("tax", Mode::Implied), op("nop", Mode::Implied),
    op("ldy", Mode::Absolute), op("lda", Mode::Absolute), op("ldx", Mode::Absolute), op("nop", Mode::Implied),
    // 0xb0
    op("bcs", Mode::Relative), op("lda", Mode::IndirectY), op("lda", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("ldy", Mode::ZeroPageX), op("lda", Mode::ZeroPageX), op("ldx", Mode::ZeroPageY), op("nop", Mode::Implied),
    op("clv", Mode::Implied), op("lda", Mode::AbsoluteY), op("tsx", Mode::Implied), op("nop", Mode::Implied),
    op("ldy", Mode::AbsoluteX), op("lda", Mode::AbsoluteX), op("ldx", Mode::AbsoluteY), op("nop", Mode::Implied),
    // 0xc0
    op("cpy", Mode::Immediate), op("cmp", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("cpy", Mode::ZeroPage), op("cmp", Mode::ZeroPage), op("dec", Mode::ZeroPage), op("nop", Mode::Implied),
    op("iny", Mode::Implied), op("cmp", Mode::Immediate), op("dex", Mode::Implied), op("nop", Mode::Implied),
    op("cpy", Mode::Absolute), op("cmp", Mode::Absolute), op("dec", Mode::Absolute), op("nop", Mode::Implied),
    // 0xd0
    op("bne", Mode::Relative), op("cmp", Mode::IndirectY), op("cmp", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("nop", Mode::ZeroPageX), op("cmp", Mode::ZeroPageX), op("dec", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("cld", Mode::Implied), op("cmp", Mode::AbsoluteY), op("phx", Mode::Implied), op("nop", Mode::Implied),
    op("nop", Mode::Absolute), op("cmp", Mode::AbsoluteX), op("dec", Mode::AbsoluteX), op("nop", Mode::Implied),
    // 0xe0
    op("cpx", Mode::Immediate), op("sbc", Mode::IndirectX), op("nop", Mode::Immediate), op("nop", Mode::Implied),
    op("cpx", Mode::ZeroPage), op("sbc", Mode::ZeroPage), op("inc", Mode::ZeroPage), op("nop", Mode::Implied),
    op("inx", Mode::Implied), op("sbc", Mode::Immediate), op("nop", Mode::Implied), op("nop", Mode::Implied),
    op("cpx", Mode::Absolute), op("sbc", Mode::Absolute), op("inc", Mode::Absolute), op("nop", Mode::Implied),
    // 0xf0
    op("beq", Mode::Relative), op("sbc", Mode::IndirectY), op("sbc", Mode::ZeroPageIndirect), op("nop", Mode::Implied),
    op("nop", Mode::ZeroPageX), op("sbc", Mode::ZeroPageX), op("inc", Mode::ZeroPageX), op("nop", Mode::Implied),
    op("sed", Mode::Implied), op("sbc", Mode::AbsoluteY), op("plx", Mode::Implied), op("nop", Mode::Implied),
    op("nop", Mode::Absolute), op("sbc", Mode::AbsoluteX), op("inc", Mode::AbsoluteX), op("nop", Mode::Implied),
];

pub struct Disassembler;

impl Disassembler {
    /// Disassemble one instruction, returning the text and its length.
    pub fn disassemble(bytes: &[u8], pc: u16) -> (String, usize) {
        if bytes.is_empty() {
            return ("??".to_string(), 1);
        }
        let info = &OPCODES[bytes[0] as usize];
        let len = 1 + info.mode.operand_len();
        let lo = bytes.get(1).copied().unwrap_or(0);
        let hi = bytes.get(2).copied().unwrap_or(0);
        let word = u16::from(hi) << 8 | u16::from(lo);
        let operand = match info.mode {
            Mode::Implied => String::new(),
            Mode::Accumulator => " a".to_string(),
            Mode::Immediate => format!(" #${:02x}", lo),
            Mode::ZeroPage => format!(" ${:02x}", lo),
            Mode::ZeroPageX => format!(" ${:02x},x", lo),
            Mode::ZeroPageY => format!(" ${:02x},y", lo),
            Mode::Absolute => format!(" ${:04x}", word),
            Mode::AbsoluteX => format!(" ${:04x},x", word),
            Mode::AbsoluteY => format!(" ${:04x},y", word),
            Mode::IndirectX => format!(" (${:02x},x)", lo),
            Mode::IndirectY => format!(" (${:02x}),y", lo),
            Mode::ZeroPageIndirect => format!(" (${:02x})", lo),
            Mode::Indirect => format!(" (${:04x})", word),
            Mode::IndirectX16 => format!(" (${:04x},x)", word),
            Mode::Relative => {
                let target = pc
                    .wrapping_add(2)
                    .wrapping_add(i16::from(lo as i8) as u16);
                format!(" ${:04x}", target)
            }
        };
        (format!("{}{}", info.mnemonic, operand), len)
    }

    /// One line of the instruction trace, VICE monitor style.
    pub fn format_trace(record: &TraceRecord) -> String {
        let mut bytes = String::new();
        for i in 0..3 {
            if i < record.len as usize {
                bytes.push_str(&format!("{:02x} ", record.bytes[i as usize]));
            } else {
                bytes.push_str("   ");
            }
        }
        let (text, _) = Self::disassemble(&record.bytes[..record.len as usize], record.pc);
        format!(
            "{:04x}: {} {:<12} a:{:02x} x:{:02x} y:{:02x} sp:{:02x} p:{:02x}",
            record.pc, bytes, text, record.a, record.x, record.y, record.sp, record.p
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassemble_immediate() {
        let (text, len) = Disassembler::disassemble(&[0xa9, 0x42], 0x0200);
        assert_eq!("lda #$42", text);
        assert_eq!(2, len);
    }

    #[test]
    fn disassemble_absolute_x() {
        let (text, len) = Disassembler::disassemble(&[0xbd, 0x00, 0xc0], 0x0200);
        assert_eq!("lda $c000,x", text);
        assert_eq!(3, len);
    }

    #[test]
    fn disassemble_branch_target() {
        // bne  -2 from $0200 lands back on the branch
        let (text, _) = Disassembler::disassemble(&[0xd0, 0xfe], 0x0200);
        assert_eq!("bne $0200", text);
    }

    #[test]
    fn disassemble_65c02_modes() {
        let (text, _) = Disassembler::disassemble(&[0x12, 0x10], 0x0200);
        assert_eq!("ora ($10)", text);
        let (text, _) = Disassembler::disassemble(&[0x7c, 0x00, 0x30], 0x0200);
        assert_eq!("jmp ($3000,x)", text);
        let (text, _) = Disassembler::disassemble(&[0x80, 0x02], 0x0200);
        assert_eq!("bra $0204", text);
    }

    #[test]
    fn format_trace_line() {
        let record = TraceRecord {
            pc: 0xf800,
            bytes: [0xa9, 0x00, 0x00],
            len: 2,
            a: 0x12,
            x: 0x34,
            y: 0x56,
            sp: 0xfd,
            p: 0x24,
        };
        let line = Disassembler::format_trace(&record);
        assert!(line.starts_with("f800: a9 00 "));
        assert!(line.contains("lda #$00"));
    }
}
