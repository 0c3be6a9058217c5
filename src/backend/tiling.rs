//! Instruction selection. Every expression is covered by the cheapest
//! combination of instruction patterns, found by trying each pattern that
//! matches a node over the memoized tilings of its subtrees. The cost of a
//! tiling is the number of instructions it emits.

use hashbrown::HashMap;

use crate::{
    backend::asm::{
        BinaryOperator, CallTarget, Condition, Instruction, Memory, Operand, PhysicalRegister,
        Register,
    },
    errors::InternalError,
    internal_error,
    middle::mir::{Expression, Function, Operator, Statement},
};

/// Label every return of `function_name` jumps to
pub fn epilogue_label(function_name: &str) -> String {
    format!("LABEL_FUNCTION_CALL_EPILOGUE_FOR_{function_name}")
}

#[derive(Debug, Clone)]
struct Tiled<T> {
    instructions: Vec<Instruction>,
    value: T,
}

impl<T> Tiled<T> {
    fn new(instructions: Vec<Instruction>, value: T) -> Self {
        Self {
            instructions,
            value,
        }
    }

    fn free(value: T) -> Self {
        Self::new(Vec::new(), value)
    }

    fn cost(&self) -> usize {
        self.instructions
            .iter()
            .filter(|instruction| !instruction.is_comment())
            .count()
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Tiled<U> {
        Tiled::new(self.instructions, f(self.value))
    }
}

fn cheapest<T>(candidates: Vec<Tiled<T>>) -> Option<Tiled<T>> {
    candidates.into_iter().min_by_key(Tiled::cost)
}

fn immediate(expression: &Expression) -> Option<i64> {
    match expression {
        Expression::Constant(value) if Operand::fits_immediate(*value) => Some(*value),
        _ => None,
    }
}

/// `index * scale` with a scale usable in an address
fn scaled(expression: &Expression) -> Option<(&Expression, u8)> {
    match expression {
        Expression::Binary {
            operator: Operator::Mul,
            e1,
            e2,
        } => match e2.as_ref() {
            Expression::Constant(scale @ (1 | 2 | 4 | 8)) => Some((e1.as_ref(), *scale as u8)),
            _ => None,
        },
        _ => None,
    }
}

struct Tiler<'a> {
    function_name: &'a str,
    next_register: usize,
    memo: HashMap<Expression, Tiled<Register>>,
}

impl<'a> Tiler<'a> {
    fn new(function_name: &'a str) -> Self {
        Self {
            function_name,
            next_register: 0,
            memo: HashMap::new(),
        }
    }

    fn fresh(&mut self) -> Register {
        let register = Register::virtual_register(format!("_ASM_REG_{}", self.next_register));
        self.next_register += 1;
        register
    }

    fn tile_expression(&mut self, expression: &Expression) -> Result<Tiled<Register>, InternalError> {
        if let Some(tiled) = self.memo.get(expression) {
            return Ok(tiled.clone());
        }

        let tiled = match expression {
            Expression::Constant(value) => {
                let register = self.fresh();
                Tiled::new(
                    vec![Instruction::move_constant(register.clone(), *value)],
                    register,
                )
            }
            Expression::Name(name) => {
                let register = self.fresh();
                Tiled::new(
                    vec![Instruction::LoadEffectiveAddress {
                        destination: register.clone(),
                        source: Memory::symbol(name.clone(), 0),
                    }],
                    register,
                )
            }
            Expression::Temporary(name) => Tiled::free(Register::virtual_register(name)),
            Expression::Mem(address) => {
                let memory = self.tile_memory(address)?;
                let register = self.fresh();
                let mut instructions = memory.instructions;
                instructions.push(Instruction::mov(register.clone(), memory.value));
                Tiled::new(instructions, register)
            }
            Expression::Binary { operator, e1, e2 } => {
                let candidates = [
                    self.tile_negate(*operator, e1, e2)?,
                    self.tile_generic(*operator, e1, e2)?,
                    self.tile_commutative_reversed(*operator, e1, e2)?,
                    self.tile_comparison(*operator, e1, e2)?,
                    self.tile_lea(expression)?,
                    self.tile_imul_immediate(*operator, e1, e2)?,
                    self.tile_shift(*operator, e1, e2)?,
                ];
                cheapest(candidates.into_iter().flatten().collect())
                    .ok_or_else(|| internal_error!("no instruction pattern covers `{expression}`"))?
            }
        };

        self.memo.insert(expression.clone(), tiled.clone());
        Ok(tiled)
    }

    fn tile_argument(&mut self, expression: &Expression) -> Result<Tiled<Operand>, InternalError> {
        if let Some(value) = immediate(expression) {
            return Ok(Tiled::free(Operand::Immediate(value)));
        }
        self.tile_register_or_memory(expression)
    }

    fn tile_register_or_memory(
        &mut self,
        expression: &Expression,
    ) -> Result<Tiled<Operand>, InternalError> {
        match expression {
            Expression::Mem(address) => Ok(self.tile_memory(address)?.map(Operand::Memory)),
            _ => Ok(self.tile_expression(expression)?.map(Operand::Register)),
        }
    }

    fn tile_constant_or_register(
        &mut self,
        expression: &Expression,
    ) -> Result<Tiled<Operand>, InternalError> {
        match immediate(expression) {
            Some(value) => Ok(Tiled::free(Operand::Immediate(value))),
            None => Ok(self.tile_expression(expression)?.map(Operand::Register)),
        }
    }

    /// The memory word at `address`
    fn tile_memory(&mut self, address: &Expression) -> Result<Tiled<Memory>, InternalError> {
        if let Expression::Name(name) = address {
            return Ok(Tiled::free(Memory::symbol(name.clone(), 0)));
        }

        let mut candidates = self.tile_address_patterns(address)?;
        candidates.push(self.tile_expression(address)?.map(Memory::base));
        cheapest(candidates).ok_or_else(|| internal_error!("cannot address `{address}`"))
    }

    /// Folds base, scaled index and displacement of `address` into one
    /// memory operand where its shape allows
    fn tile_address_patterns(
        &mut self,
        address: &Expression,
    ) -> Result<Vec<Tiled<Memory>>, InternalError> {
        let mut candidates = Vec::new();

        if let Some((index, scale)) = scaled(address) {
            let index = self.tile_expression(index)?;
            candidates.push(index.map(|index| Memory {
                index: Some((index, scale)),
                ..Default::default()
            }));
        }

        let (e1, e2) = match address {
            Expression::Binary {
                operator: Operator::Add,
                e1,
                e2,
            } => (e1.as_ref(), e2.as_ref()),
            _ => return Ok(candidates),
        };

        for (x, y) in [(e1, e2), (e2, e1)] {
            if let Some(displacement) = immediate(y) {
                // [rip + name + c]
                if let Expression::Name(name) = x {
                    candidates.push(Tiled::free(Memory::symbol(name.clone(), displacement)));
                }

                // [x + c]
                let base = self.tile_expression(x)?;
                candidates.push(base.map(|base| Memory::base_with_displacement(base, displacement)));

                // [i * s + c]
                if let Some((index, scale)) = scaled(x) {
                    let index = self.tile_expression(index)?;
                    candidates.push(index.map(|index| Memory {
                        index: Some((index, scale)),
                        displacement,
                        ..Default::default()
                    }));
                }

                // [b + i * s + c]
                if let Expression::Binary {
                    operator: Operator::Add,
                    e1: p,
                    e2: q,
                } = x
                {
                    let (p, q) = (p.as_ref(), q.as_ref());
                    for (base, index) in [(p, q), (q, p)] {
                        let (index, scale) = scaled(index).unwrap_or((index, 1));
                        let base = self.tile_expression(base)?;
                        let index = self.tile_expression(index)?;
                        let mut instructions = base.instructions;
                        instructions.extend(index.instructions);
                        candidates.push(Tiled::new(
                            instructions,
                            Memory {
                                base: Some(base.value),
                                index: Some((index.value, scale)),
                                symbol: None,
                                displacement,
                            },
                        ));
                    }
                }
            }

            // [x + i * s], with a scale of one when y has no usable factor
            let (index, scale) = scaled(y).unwrap_or((y, 1));
            let base = self.tile_expression(x)?;
            let index = self.tile_expression(index)?;
            let mut instructions = base.instructions;
            instructions.extend(index.instructions);
            candidates.push(Tiled::new(
                instructions,
                Memory {
                    base: Some(base.value),
                    index: Some((index.value, scale)),
                    symbol: None,
                    displacement: 0,
                },
            ));
        }

        Ok(candidates)
    }

    fn tile_generic(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        if operator.is_comparison() {
            return Ok(None);
        }

        let left = self.tile_argument(e1)?;
        let right = self.tile_register_or_memory(e2)?;
        let result = self.fresh();
        let mut instructions = left.instructions;
        instructions.extend(right.instructions);

        match operator {
            Operator::Mul => {
                instructions.push(Instruction::mov(result.clone(), left.value));
                instructions.push(Instruction::IMul {
                    destination: result.clone(),
                    source: right.value,
                    immediate: None,
                });
            }
            Operator::Div | Operator::Mod => {
                instructions.push(Instruction::mov(Register::RAX, left.value));
                instructions.push(Instruction::Cqo);
                instructions.push(Instruction::IDiv(right.value));
                let quotient_or_remainder = if operator == Operator::Div {
                    Register::RAX
                } else {
                    Register::RDX
                };
                instructions.push(Instruction::mov(result.clone(), quotient_or_remainder));
            }
            _ => match BinaryOperator::from_operator(operator) {
                Some(binary) => {
                    instructions.push(Instruction::mov(result.clone(), left.value));
                    instructions.push(Instruction::binary(binary, result.clone(), right.value));
                }
                None => return Ok(None),
            },
        }

        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_commutative_reversed(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        if operator.is_comparison() || !operator.is_commutative() {
            return Ok(None);
        }

        let right = self.tile_expression(e2)?;
        let left = self.tile_register_or_memory(e1)?;
        let result = self.fresh();
        let mut instructions = right.instructions;
        instructions.extend(left.instructions);
        instructions.push(Instruction::mov(result.clone(), right.value));
        instructions.push(match BinaryOperator::from_operator(operator) {
            Some(binary) => Instruction::binary(binary, result.clone(), left.value),
            None => Instruction::IMul {
                destination: result.clone(),
                source: left.value,
                immediate: None,
            },
        });

        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_comparison(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        let Some(condition) = Condition::from_comparison(operator) else {
            return Ok(None);
        };

        let left = self.tile_expression(e1)?;
        let right = self.tile_constant_or_register(e2)?;
        let result = self.fresh();
        let mut instructions = left.instructions;
        instructions.extend(right.instructions);
        instructions.push(Instruction::Compare {
            left: left.value.into(),
            right: right.value,
        });
        instructions.push(Instruction::SetOnFlag {
            condition,
            register: Register::RAX,
        });
        instructions.push(Instruction::mov(result.clone(), Register::RAX));

        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_lea(&mut self, expression: &Expression) -> Result<Option<Tiled<Register>>, InternalError> {
        let Some(memory) = cheapest(self.tile_address_patterns(expression)?) else {
            return Ok(None);
        };

        let result = self.fresh();
        let mut instructions = memory.instructions;
        instructions.push(Instruction::LoadEffectiveAddress {
            destination: result.clone(),
            source: memory.value,
        });
        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_imul_immediate(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        let factor = match (operator, immediate(e2)) {
            (Operator::Mul, Some(factor)) => factor,
            _ => return Ok(None),
        };

        let source = self.tile_register_or_memory(e1)?;
        let result = self.fresh();
        let mut instructions = source.instructions;
        instructions.push(Instruction::IMul {
            destination: result.clone(),
            source: source.value,
            immediate: Some(factor),
        });
        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_shift(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        let count = match (operator, e2) {
            (Operator::Mul, Expression::Constant(factor))
                if *factor > 0 && (*factor as u64).is_power_of_two() =>
            {
                factor.trailing_zeros()
            }
            _ => return Ok(None),
        };

        let source = self.tile_argument(e1)?;
        let result = self.fresh();
        let mut instructions = source.instructions;
        instructions.push(Instruction::mov(result.clone(), source.value));
        instructions.push(Instruction::ShiftLeft {
            destination: result.clone().into(),
            count,
        });
        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_negate(
        &mut self,
        operator: Operator,
        e1: &Expression,
        e2: &Expression,
    ) -> Result<Option<Tiled<Register>>, InternalError> {
        if operator != Operator::Sub || *e1 != Expression::ZERO {
            return Ok(None);
        }

        let source = self.tile_argument(e2)?;
        let result = self.fresh();
        let mut instructions = source.instructions;
        instructions.push(Instruction::mov(result.clone(), source.value));
        instructions.push(Instruction::Negate(result.clone().into()));
        Ok(Some(Tiled::new(instructions, result)))
    }

    fn tile_call(
        &mut self,
        function: &Expression,
        arguments: &[Expression],
        return_collector: Option<&str>,
        instructions: &mut Vec<Instruction>,
    ) -> Result<(), InternalError> {
        let target = match function {
            Expression::Name(name) => CallTarget::Direct(name.clone()),
            _ => {
                let target = self.tile_expression(function)?;
                instructions.extend(target.instructions);
                CallTarget::Indirect(target.value.into())
            }
        };

        let mut operands = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let argument = self.tile_argument(argument)?;
            instructions.extend(argument.instructions);
            operands.push(argument.value);
        }

        let stack_arguments = operands.len().saturating_sub(PhysicalRegister::ARGUMENTS.len());
        let padding = stack_arguments % 2;
        if padding > 0 {
            instructions.push(Instruction::binary(
                BinaryOperator::Sub,
                Register::RSP,
                Operand::Immediate(8),
            ));
        }
        for (index, operand) in operands.into_iter().enumerate().rev() {
            match PhysicalRegister::ARGUMENTS.get(index) {
                Some(register) => instructions.push(Instruction::mov(*register, operand)),
                None => instructions.push(Instruction::Push(operand)),
            }
        }

        instructions.push(Instruction::Call {
            target,
            arguments: arguments.len().min(PhysicalRegister::ARGUMENTS.len()),
        });
        if let Some(collector) = return_collector {
            instructions.push(Instruction::mov(
                Register::virtual_register(collector),
                Register::RAX,
            ));
        }
        let scratch = stack_arguments + padding;
        if scratch > 0 {
            instructions.push(Instruction::binary(
                BinaryOperator::Add,
                Register::RSP,
                Operand::Immediate(8 * scratch as i64),
            ));
        }
        Ok(())
    }

    fn tile_statement(&mut self, statement: &Statement) -> Result<Vec<Instruction>, InternalError> {
        self.memo.clear();
        let mut instructions = vec![Instruction::Comment(statement.to_string())];

        match statement {
            Statement::MoveTemp { temporary, source } => {
                let source = self.tile_argument(source)?;
                instructions.extend(source.instructions);
                instructions.push(Instruction::mov(
                    Register::virtual_register(temporary),
                    source.value,
                ));
            }
            Statement::MoveMem { target, source } => {
                let target = self.tile_memory(target)?;
                let source = self.tile_constant_or_register(source)?;
                instructions.extend(target.instructions);
                instructions.extend(source.instructions);
                instructions.push(Instruction::mov(target.value, source.value));
            }
            Statement::Call {
                function,
                arguments,
                return_collector,
            } => {
                self.tile_call(function, arguments, return_collector.as_deref(), &mut instructions)?
            }
            Statement::Jump(label) => instructions.push(Instruction::jump(label.clone())),
            Statement::Label(label) => instructions.push(Instruction::Label(label.clone())),
            Statement::ConditionalJumpFallThrough { condition, label } => {
                let comparison = match condition {
                    Expression::Binary { operator, e1, e2 } => {
                        Condition::from_comparison(*operator).map(|condition| (condition, e1, e2))
                    }
                    _ => None,
                };

                match comparison {
                    Some((condition, e1, e2)) => {
                        let left = self.tile_expression(e1)?;
                        let right = self.tile_constant_or_register(e2)?;
                        instructions.extend(left.instructions);
                        instructions.extend(right.instructions);
                        instructions.push(Instruction::Compare {
                            left: left.value.into(),
                            right: right.value,
                        });
                        instructions.push(Instruction::Jump {
                            condition: Some(condition),
                            label: label.clone(),
                        });
                    }
                    None => {
                        let condition = self.tile_register_or_memory(condition)?;
                        instructions.extend(condition.instructions);
                        instructions.push(Instruction::Compare {
                            left: condition.value,
                            right: Operand::Immediate(0),
                        });
                        instructions.push(Instruction::Jump {
                            condition: Some(Condition::NotZero),
                            label: label.clone(),
                        });
                    }
                }
            }
            Statement::Return(value) => {
                let value = self.tile_argument(value)?;
                instructions.extend(value.instructions);
                instructions.push(Instruction::mov(Register::RAX, value.value));
                instructions.push(Instruction::jump(epilogue_label(self.function_name)));
            }
        }

        Ok(instructions)
    }
}

/// Selects instructions for a whole function. Parameters are moved out of
/// the argument registers and the caller's stack first, and the body ends
/// at the epilogue label.
pub fn tile_function(function: &Function) -> Result<Vec<Instruction>, InternalError> {
    let mut tiler = Tiler::new(&function.name);
    let mut instructions = Vec::new();

    for (index, parameter) in function.arguments.iter().enumerate() {
        let destination = Register::virtual_register(parameter);
        match PhysicalRegister::ARGUMENTS.get(index) {
            Some(register) => instructions.push(Instruction::mov(destination, *register)),
            None => {
                let offset = 16 + 8 * (index - PhysicalRegister::ARGUMENTS.len()) as i64;
                instructions.push(Instruction::mov(
                    destination,
                    Memory::base_with_displacement(Register::RBP, offset),
                ));
            }
        }
    }

    for statement in &function.body {
        instructions.extend(tiler.tile_statement(statement)?);
    }
    instructions.push(Instruction::Label(epilogue_label(&function.name)));

    tracing::trace!(function = %function.name, instructions = instructions.len(), "tiled");
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn virtual_register(name: &str) -> Register {
        Register::virtual_register(name)
    }

    fn tile(statement: Statement) -> Vec<Instruction> {
        Tiler::new("f")
            .tile_statement(&statement)
            .unwrap()
            .into_iter()
            .filter(|instruction| !instruction.is_comment())
            .collect()
    }

    #[test]
    fn loads_fold_displacements_into_the_address() {
        let instructions = tile(Statement::move_temp(
            "x",
            Expression::mem(Expression::binary(Operator::Add, temp("p"), Expression::Constant(8))),
        ));

        assert_eq!(
            instructions,
            vec![Instruction::mov(
                virtual_register("x"),
                Memory::base_with_displacement(virtual_register("p"), 8)
            )]
        );
        assert_eq!(instructions[0].to_string(), "mov x, qword ptr [p + 8]");
    }

    #[test]
    fn scaled_sums_become_a_single_lea() {
        let instructions = tile(Statement::move_temp(
            "x",
            Expression::binary(
                Operator::Add,
                temp("a"),
                Expression::binary(Operator::Mul, temp("b"), Expression::Constant(8)),
            ),
        ));

        assert_eq!(instructions.len(), 2);
        match &instructions[0] {
            Instruction::LoadEffectiveAddress { source, .. } => {
                assert_eq!(source.base, Some(virtual_register("a")));
                assert_eq!(source.index, Some((virtual_register("b"), 8)));
            }
            other => panic!("expected lea, got {other}"),
        }
    }

    #[test]
    fn comparisons_in_conditions_jump_on_flags() {
        let instructions = tile(Statement::ConditionalJumpFallThrough {
            condition: Expression::binary(Operator::Lt, temp("a"), Expression::Constant(10)),
            label: "l0_LOOP".into(),
        });

        assert_eq!(
            instructions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["cmp a, 10", "jl l0_LOOP"]
        );
    }

    #[test]
    fn subtraction_from_zero_negates() {
        let instructions = tile(Statement::move_temp(
            "x",
            Expression::binary(Operator::Sub, Expression::ZERO, temp("a")),
        ));

        assert!(instructions.iter().any(|instruction| matches!(instruction, Instruction::Negate(_))));
        assert!(!instructions.iter().any(|instruction| matches!(instruction, Instruction::Binary { .. })));
    }

    #[test]
    fn division_goes_through_rax_and_rdx() {
        let instructions = tile(Statement::move_temp(
            "x",
            Expression::binary(Operator::Mod, temp("a"), temp("b")),
        ));

        assert_eq!(instructions[0], Instruction::mov(Register::RAX, virtual_register("a")));
        assert_eq!(instructions[1], Instruction::Cqo);
        assert_eq!(instructions[2], Instruction::IDiv(virtual_register("b").into()));
        assert!(matches!(
            &instructions[3],
            Instruction::Move { source: Operand::Register(source), .. } if *source == Register::RDX
        ));
    }

    #[test]
    fn stack_arguments_keep_the_stack_aligned() {
        let instructions = tile(Statement::Call {
            function: Expression::Name("g".into()),
            arguments: (0..7).map(Expression::Constant).collect(),
            return_collector: Some("r".into()),
        });
        let printed = instructions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        assert_eq!(printed.first().map(String::as_str), Some("sub rsp, 8"));
        assert_eq!(printed[1], "push 6");
        assert_eq!(printed[2], "mov r9, 5");
        assert!(printed.contains(&"call g".to_string()));
        assert!(printed.contains(&"mov r, rax".to_string()));
        assert_eq!(printed.last().map(String::as_str), Some("add rsp, 16"));
    }

    #[test]
    fn string_characters_are_addressed_relative_to_the_label() {
        let instructions = tile(Statement::move_temp(
            "s",
            Expression::binary(
                Operator::Add,
                Expression::Name("GLOBAL_STRING_0".into()),
                Expression::Constant(8),
            ),
        ));

        assert_eq!(instructions.len(), 2);
        assert!(matches!(
            &instructions[0],
            Instruction::LoadEffectiveAddress { source, .. } if *source == Memory::symbol("GLOBAL_STRING_0", 8)
        ));
        assert!(instructions[0]
            .to_string()
            .ends_with("qword ptr [rip + GLOBAL_STRING_0 + 8]"));
    }

    #[test]
    fn parameters_past_the_sixth_come_from_the_caller_frame() {
        let function = Function {
            name: "f".into(),
            arguments: (0..7).map(|index| format!("a{index}")).collect(),
            body: vec![Statement::Return(temp("a6"))],
        };

        let instructions = tile_function(&function).unwrap();

        assert_eq!(instructions[0].to_string(), "mov a0, rdi");
        assert_eq!(instructions[6].to_string(), "mov a6, qword ptr [rbp + 16]");
        assert_eq!(
            instructions.last(),
            Some(&Instruction::Label("LABEL_FUNCTION_CALL_EPILOGUE_FOR_f".into()))
        );
    }
}
