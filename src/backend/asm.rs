//! x86-64 instructions over an unbounded set of virtual registers. Tiling
//! produces them, register allocation replaces every virtual register with
//! a physical one or a stack slot.

use std::fmt::{self, Display};

use crate::middle::mir::Operator;

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PhysicalRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
}

impl PhysicalRegister {
    pub const ARGUMENTS: [PhysicalRegister; 6] = [
        PhysicalRegister::Rdi,
        PhysicalRegister::Rsi,
        PhysicalRegister::Rdx,
        PhysicalRegister::Rcx,
        PhysicalRegister::R8,
        PhysicalRegister::R9,
    ];

    pub const CALLER_SAVED: [PhysicalRegister; 9] = [
        PhysicalRegister::Rax,
        PhysicalRegister::Rcx,
        PhysicalRegister::Rdx,
        PhysicalRegister::Rsi,
        PhysicalRegister::Rdi,
        PhysicalRegister::R8,
        PhysicalRegister::R9,
        PhysicalRegister::R10,
        PhysicalRegister::R11,
    ];

    pub const CALLEE_SAVED: [PhysicalRegister; 5] = [
        PhysicalRegister::Rbx,
        PhysicalRegister::R12,
        PhysicalRegister::R13,
        PhysicalRegister::R14,
        PhysicalRegister::R15,
    ];

    /// Registers handed out by the coloring allocator, in order of preference
    pub const ALLOCATABLE: [PhysicalRegister; 14] = [
        PhysicalRegister::Rcx,
        PhysicalRegister::Rsi,
        PhysicalRegister::Rdi,
        PhysicalRegister::R8,
        PhysicalRegister::R9,
        PhysicalRegister::R10,
        PhysicalRegister::R11,
        PhysicalRegister::Rdx,
        PhysicalRegister::Rax,
        PhysicalRegister::Rbx,
        PhysicalRegister::R12,
        PhysicalRegister::R13,
        PhysicalRegister::R14,
        PhysicalRegister::R15,
    ];

    pub fn as_8_bit(self) -> &'static str {
        match self {
            Self::Rax => "al",
            Self::Rbx => "bl",
            Self::Rcx => "cl",
            Self::Rdx => "dl",
            Self::Rsi => "sil",
            Self::Rdi => "dil",
            Self::Rbp => "bpl",
            Self::Rsp => "spl",
            Self::R8 => "r8b",
            Self::R9 => "r9b",
            Self::R10 => "r10b",
            Self::R11 => "r11b",
            Self::R12 => "r12b",
            Self::R13 => "r13b",
            Self::R14 => "r14b",
            Self::R15 => "r15b",
            Self::Rip => "rip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Physical(PhysicalRegister),
    Virtual(String),
}

impl Register {
    pub const RAX: Register = Register::Physical(PhysicalRegister::Rax);
    pub const RDX: Register = Register::Physical(PhysicalRegister::Rdx);
    pub const RSP: Register = Register::Physical(PhysicalRegister::Rsp);
    pub const RBP: Register = Register::Physical(PhysicalRegister::Rbp);
    pub const RIP: Register = Register::Physical(PhysicalRegister::Rip);

    pub fn virtual_register(name: impl Into<String>) -> Self {
        Register::Virtual(name.into())
    }

    /// Whether liveness and allocation care about this register. The stack,
    /// frame and instruction pointers are managed by hand.
    pub fn is_tracked(&self) -> bool {
        !matches!(
            self,
            Register::Physical(PhysicalRegister::Rsp | PhysicalRegister::Rbp | PhysicalRegister::Rip)
        )
    }
}

impl From<PhysicalRegister> for Register {
    fn from(register: PhysicalRegister) -> Self {
        Register::Physical(register)
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Physical(register) => write!(f, "{register}"),
            Register::Virtual(name) => f.write_str(name),
        }
    }
}

/// `qword ptr [base + index * scale + symbol + displacement]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Memory {
    pub base: Option<Register>,
    pub index: Option<(Register, u8)>,
    pub symbol: Option<String>,
    pub displacement: i64,
}

impl Memory {
    pub fn base(base: Register) -> Self {
        Self {
            base: Some(base),
            ..Default::default()
        }
    }

    pub fn base_with_displacement(base: Register, displacement: i64) -> Self {
        Self {
            base: Some(base),
            displacement,
            ..Default::default()
        }
    }

    /// Address of a data or code label, relative to the instruction pointer
    pub fn symbol(name: impl Into<String>, displacement: i64) -> Self {
        Self {
            base: Some(Register::RIP),
            symbol: Some(name.into()),
            displacement,
            ..Default::default()
        }
    }

    /// Stack slot `index` of the current frame
    pub fn stack_slot(index: usize) -> Self {
        Self::base_with_displacement(Register::RBP, -8 * (index as i64 + 1))
    }

    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.base.iter().chain(self.index.iter().map(|(index, _)| index))
    }

    pub fn map_registers(&self, map: &mut impl FnMut(&Register) -> Register) -> Memory {
        Memory {
            base: self.base.as_ref().map(&mut *map),
            index: self.index.as_ref().map(|(index, scale)| (map(index), *scale)),
            symbol: self.symbol.clone(),
            displacement: self.displacement,
        }
    }
}

impl Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(base) = &self.base {
            parts.push(base.to_string());
        }
        if let Some((index, scale)) = &self.index {
            parts.push(if *scale == 1 {
                index.to_string()
            } else {
                format!("{index}*{scale}")
            });
        }
        if let Some(symbol) = &self.symbol {
            parts.push(symbol.clone());
        }

        let mut address = parts.join(" + ");
        match self.displacement {
            0 if !address.is_empty() => {}
            displacement if address.is_empty() => address = displacement.to_string(),
            displacement if displacement < 0 => {
                address.push_str(&format!(" - {}", displacement.unsigned_abs()))
            }
            displacement => address.push_str(&format!(" + {displacement}")),
        }
        write!(f, "qword ptr [{address}]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Always fits in 32 bits
    Immediate(i64),
    Register(Register),
    Memory(Memory),
}

impl Operand {
    pub fn fits_immediate(value: i64) -> bool {
        i32::try_from(value).is_ok()
    }

    pub fn registers(&self) -> Vec<&Register> {
        match self {
            Operand::Immediate(_) => vec![],
            Operand::Register(register) => vec![register],
            Operand::Memory(memory) => memory.registers().collect(),
        }
    }

    pub fn map_registers(&self, map: &mut impl FnMut(&Register) -> Register) -> Operand {
        match self {
            Operand::Immediate(value) => Operand::Immediate(*value),
            Operand::Register(register) => Operand::Register(map(register)),
            Operand::Memory(memory) => Operand::Memory(memory.map_registers(map)),
        }
    }
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Register(register)
    }
}

impl From<PhysicalRegister> for Operand {
    fn from(register: PhysicalRegister) -> Self {
        Operand::Register(register.into())
    }
}

impl From<Memory> for Operand {
    fn from(memory: Memory) -> Self {
        Operand::Memory(memory)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate(value) => write!(f, "{value}"),
            Operand::Register(register) => write!(f, "{register}"),
            Operand::Memory(memory) => write!(f, "{memory}"),
        }
    }
}

/// Condition codes, printed as the suffix of `j<cc>` and `set<cc>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Condition {
    #[strum(serialize = "e")]
    Equal,
    #[strum(serialize = "ne")]
    NotEqual,
    #[strum(serialize = "l")]
    Less,
    #[strum(serialize = "le")]
    LessOrEqual,
    #[strum(serialize = "g")]
    Greater,
    #[strum(serialize = "ge")]
    GreaterOrEqual,
    #[strum(serialize = "nz")]
    NotZero,
}

impl Condition {
    pub fn from_comparison(operator: Operator) -> Option<Self> {
        match operator {
            Operator::Lt => Some(Condition::Less),
            Operator::Le => Some(Condition::LessOrEqual),
            Operator::Gt => Some(Condition::Greater),
            Operator::Ge => Some(Condition::GreaterOrEqual),
            Operator::Eq => Some(Condition::Equal),
            Operator::Ne => Some(Condition::NotEqual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOperator {
    Add,
    Sub,
    Xor,
    And,
    Or,
}

impl BinaryOperator {
    pub fn from_operator(operator: Operator) -> Option<Self> {
        match operator {
            Operator::Add => Some(BinaryOperator::Add),
            Operator::Sub => Some(BinaryOperator::Sub),
            Operator::Xor => Some(BinaryOperator::Xor),
            Operator::And => Some(BinaryOperator::And),
            Operator::Or => Some(BinaryOperator::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallTarget {
    Direct(String),
    Indirect(Operand),
}

impl Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Direct(name) => f.write_str(name),
            CallTarget::Indirect(operand) => write!(f, "{operand}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `movabs`, for constants wider than 32 bits
    MoveLong { destination: Register, value: i64 },
    Move { destination: Operand, source: Operand },
    LoadEffectiveAddress { destination: Register, source: Memory },
    Compare { left: Operand, right: Operand },
    /// `set<cc>` into the low byte, then zero extended to the whole register
    SetOnFlag { condition: Condition, register: Register },
    Jump { condition: Option<Condition>, label: String },
    /// `arguments` registers carry arguments into the call
    Call { target: CallTarget, arguments: usize },
    Return,
    Binary {
        operator: BinaryOperator,
        destination: Operand,
        source: Operand,
    },
    IMul {
        destination: Register,
        source: Operand,
        immediate: Option<i64>,
    },
    Cqo,
    IDiv(Operand),
    ShiftLeft { destination: Operand, count: u32 },
    Negate(Operand),
    Push(Operand),
    PopRbp,
    Label(String),
    Comment(String),
}

impl Instruction {
    pub fn mov(destination: impl Into<Operand>, source: impl Into<Operand>) -> Self {
        Instruction::Move {
            destination: destination.into(),
            source: source.into(),
        }
    }

    /// Loads any constant, choosing `movabs` when it does not fit in 32 bits
    pub fn move_constant(destination: Register, value: i64) -> Self {
        if Operand::fits_immediate(value) {
            Instruction::mov(destination, Operand::Immediate(value))
        } else {
            Instruction::MoveLong { destination, value }
        }
    }

    pub fn binary(
        operator: BinaryOperator,
        destination: impl Into<Operand>,
        source: impl Into<Operand>,
    ) -> Self {
        Instruction::Binary {
            operator,
            destination: destination.into(),
            source: source.into(),
        }
    }

    pub fn jump(label: impl Into<String>) -> Self {
        Instruction::Jump {
            condition: None,
            label: label.into(),
        }
    }

    /// Registers read, implicit operands included
    pub fn uses(&self) -> Vec<Register> {
        let mut uses = Vec::new();

        match self {
            Instruction::MoveLong { .. }
            | Instruction::SetOnFlag { .. }
            | Instruction::Jump { .. }
            | Instruction::PopRbp
            | Instruction::Label(_)
            | Instruction::Comment(_) => {}
            Instruction::Move {
                destination,
                source,
            } => {
                uses.extend(reads(destination, false));
                uses.extend(reads(source, true));
            }
            Instruction::LoadEffectiveAddress { source, .. } => {
                uses.extend(source.registers().cloned());
            }
            Instruction::Compare { left, right } => {
                uses.extend(reads(left, true));
                uses.extend(reads(right, true));
            }
            Instruction::Call { target, arguments } => {
                if let CallTarget::Indirect(operand) = target {
                    uses.extend(reads(operand, true));
                }
                uses.extend(
                    PhysicalRegister::ARGUMENTS
                        .iter()
                        .take(*arguments)
                        .map(|register| Register::Physical(*register)),
                );
            }
            Instruction::Return => {
                uses.push(Register::RAX);
                uses.extend(PhysicalRegister::CALLEE_SAVED.map(Register::Physical));
            }
            Instruction::Binary {
                destination,
                source,
                ..
            } => {
                uses.extend(reads(destination, true));
                uses.extend(reads(source, true));
            }
            Instruction::IMul {
                destination,
                source,
                immediate,
            } => {
                if immediate.is_none() {
                    uses.push(destination.clone());
                }
                uses.extend(reads(source, true));
            }
            Instruction::Cqo => uses.push(Register::RAX),
            Instruction::IDiv(divisor) => {
                uses.push(Register::RAX);
                uses.push(Register::RDX);
                uses.extend(reads(divisor, true));
            }
            Instruction::ShiftLeft { destination, .. } | Instruction::Negate(destination) => {
                uses.extend(reads(destination, true))
            }
            Instruction::Push(operand) => uses.extend(reads(operand, true)),
        }

        uses.retain(Register::is_tracked);
        uses
    }

    /// Registers written, implicit operands included
    pub fn definitions(&self) -> Vec<Register> {
        let mut definitions = match self {
            Instruction::MoveLong { destination, .. }
            | Instruction::LoadEffectiveAddress { destination, .. }
            | Instruction::IMul { destination, .. } => vec![destination.clone()],
            Instruction::SetOnFlag { register, .. } => vec![register.clone()],
            Instruction::Move {
                destination: Operand::Register(destination),
                ..
            }
            | Instruction::Binary {
                destination: Operand::Register(destination),
                ..
            }
            | Instruction::ShiftLeft {
                destination: Operand::Register(destination),
                ..
            }
            | Instruction::Negate(Operand::Register(destination)) => vec![destination.clone()],
            Instruction::Call { .. } => PhysicalRegister::CALLER_SAVED
                .map(Register::Physical)
                .to_vec(),
            Instruction::Cqo => vec![Register::RDX],
            Instruction::IDiv(_) => vec![Register::RAX, Register::RDX],
            _ => vec![],
        };
        definitions.retain(Register::is_tracked);
        definitions
    }

    /// Every register written in the instruction text, implicit ones excluded
    pub fn mentioned_registers(&self) -> Vec<&Register> {
        match self {
            Instruction::MoveLong { destination, .. } => vec![destination],
            Instruction::Move {
                destination,
                source,
            }
            | Instruction::Binary {
                destination,
                source,
                ..
            } => [destination.registers(), source.registers()].concat(),
            Instruction::LoadEffectiveAddress {
                destination,
                source,
            } => std::iter::once(destination)
                .chain(source.registers())
                .collect(),
            Instruction::Compare { left, right } => {
                [left.registers(), right.registers()].concat()
            }
            Instruction::SetOnFlag { register, .. } => vec![register],
            Instruction::Call {
                target: CallTarget::Indirect(operand),
                ..
            } => operand.registers(),
            Instruction::IMul {
                destination,
                source,
                ..
            } => std::iter::once(destination)
                .chain(source.registers())
                .collect(),
            Instruction::IDiv(operand)
            | Instruction::ShiftLeft {
                destination: operand,
                ..
            }
            | Instruction::Negate(operand)
            | Instruction::Push(operand) => operand.registers(),
            _ => vec![],
        }
    }

    pub fn map_registers(&self, map: &mut impl FnMut(&Register) -> Register) -> Instruction {
        match self {
            Instruction::MoveLong { destination, value } => Instruction::MoveLong {
                destination: map(destination),
                value: *value,
            },
            Instruction::Move {
                destination,
                source,
            } => Instruction::Move {
                destination: destination.map_registers(map),
                source: source.map_registers(map),
            },
            Instruction::LoadEffectiveAddress {
                destination,
                source,
            } => Instruction::LoadEffectiveAddress {
                destination: map(destination),
                source: source.map_registers(map),
            },
            Instruction::Compare { left, right } => Instruction::Compare {
                left: left.map_registers(map),
                right: right.map_registers(map),
            },
            Instruction::SetOnFlag {
                condition,
                register,
            } => Instruction::SetOnFlag {
                condition: *condition,
                register: map(register),
            },
            Instruction::Call {
                target: CallTarget::Indirect(operand),
                arguments,
            } => Instruction::Call {
                target: CallTarget::Indirect(operand.map_registers(map)),
                arguments: *arguments,
            },
            Instruction::Binary {
                operator,
                destination,
                source,
            } => Instruction::Binary {
                operator: *operator,
                destination: destination.map_registers(map),
                source: source.map_registers(map),
            },
            Instruction::IMul {
                destination,
                source,
                immediate,
            } => Instruction::IMul {
                destination: map(destination),
                source: source.map_registers(map),
                immediate: *immediate,
            },
            Instruction::IDiv(operand) => Instruction::IDiv(operand.map_registers(map)),
            Instruction::ShiftLeft { destination, count } => Instruction::ShiftLeft {
                destination: destination.map_registers(map),
                count: *count,
            },
            Instruction::Negate(operand) => Instruction::Negate(operand.map_registers(map)),
            Instruction::Push(operand) => Instruction::Push(operand.map_registers(map)),
            instruction => instruction.clone(),
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Instruction::Comment(_))
    }
}

/// Registers an operand reads. A register written as a whole is not read.
fn reads(operand: &Operand, whole: bool) -> Vec<Register> {
    match operand {
        Operand::Register(register) if whole => vec![register.clone()],
        Operand::Register(_) | Operand::Immediate(_) => vec![],
        Operand::Memory(memory) => memory.registers().cloned().collect(),
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::MoveLong { destination, value } => {
                write!(f, "movabs {destination}, {value}")
            }
            Instruction::Move {
                destination,
                source,
            } => write!(f, "mov {destination}, {source}"),
            Instruction::LoadEffectiveAddress {
                destination,
                source,
            } => write!(f, "lea {destination}, {source}"),
            Instruction::Compare { left, right } => write!(f, "cmp {left}, {right}"),
            Instruction::SetOnFlag {
                condition,
                register,
            } => {
                let low_byte = match register {
                    Register::Physical(physical) => physical.as_8_bit().to_string(),
                    Register::Virtual(name) => format!("{name}b"),
                };
                write!(f, "set{condition} {low_byte}\nmovzx {register}, {low_byte}")
            }
            Instruction::Jump {
                condition: None,
                label,
            } => write!(f, "jmp {label}"),
            Instruction::Jump {
                condition: Some(condition),
                label,
            } => write!(f, "j{condition} {label}"),
            Instruction::Call { target, .. } => write!(f, "call {target}"),
            Instruction::Return => f.write_str("ret"),
            Instruction::Binary {
                operator,
                destination,
                source,
            } => write!(f, "{operator} {destination}, {source}"),
            Instruction::IMul {
                destination,
                source,
                immediate: None,
            } => write!(f, "imul {destination}, {source}"),
            Instruction::IMul {
                destination,
                source,
                immediate: Some(immediate),
            } => write!(f, "imul {destination}, {source}, {immediate}"),
            Instruction::Cqo => f.write_str("cqo"),
            Instruction::IDiv(divisor) => write!(f, "idiv {divisor}"),
            Instruction::ShiftLeft { destination, count } => {
                write!(f, "shl {destination}, {count}")
            }
            Instruction::Negate(operand) => write!(f, "neg {operand}"),
            Instruction::Push(operand) => write!(f, "push {operand}"),
            Instruction::PopRbp => f.write_str("pop rbp"),
            Instruction::Label(label) => write!(f, "{label}:"),
            Instruction::Comment(comment) => write!(f, "## {comment}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_operands_print_every_component() {
        let memory = Memory {
            base: Some(Register::virtual_register("_t0")),
            index: Some((PhysicalRegister::Rcx.into(), 8)),
            symbol: None,
            displacement: -16,
        };

        assert_eq!(memory.to_string(), "qword ptr [_t0 + rcx*8 - 16]");
        assert_eq!(Memory::symbol("GLOBAL_STRING_0", 8).to_string(), "qword ptr [rip + GLOBAL_STRING_0 + 8]");
        assert_eq!(Memory::stack_slot(0).to_string(), "qword ptr [rbp - 8]");
    }

    #[test]
    fn set_on_flag_zero_extends_the_low_byte() {
        let instruction = Instruction::SetOnFlag {
            condition: Condition::LessOrEqual,
            register: Register::RAX,
        };

        assert_eq!(instruction.to_string(), "setle al\nmovzx rax, al");
    }

    #[test]
    fn implicit_operands_count_as_uses_and_definitions() {
        let divide = Instruction::IDiv(Register::virtual_register("d").into());
        assert_eq!(
            divide.uses(),
            vec![Register::RAX, Register::RDX, Register::virtual_register("d")]
        );
        assert_eq!(divide.definitions(), vec![Register::RAX, Register::RDX]);

        let store = Instruction::mov(
            Memory::base(Register::virtual_register("p")),
            Register::virtual_register("v"),
        );
        assert_eq!(
            store.uses(),
            vec![Register::virtual_register("p"), Register::virtual_register("v")]
        );
        assert!(store.definitions().is_empty());

        let call = Instruction::Call {
            target: CallTarget::Direct("f".into()),
            arguments: 2,
        };
        assert_eq!(
            call.uses(),
            vec![
                Register::from(PhysicalRegister::Rdi),
                Register::from(PhysicalRegister::Rsi)
            ]
        );
    }
}
