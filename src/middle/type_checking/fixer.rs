use hashbrown::HashSet;

use crate::{
    errors::ErrorReporter,
    frontend::{
        ast::{Expression, ExpressionKind, Type, UndecidedTypeId},
        location::Range,
    },
    middle::type_checking::resolution::TypeResolution,
};

/// Replaces every solved undecided type in a checked body with its solution.
/// Types left undecided are reported once each.
pub(super) struct TypeFixer<'c, 'r> {
    resolution: &'c TypeResolution,
    reporter: &'c mut ErrorReporter<'r>,
    reported: HashSet<UndecidedTypeId>,
}

impl<'c, 'r> TypeFixer<'c, 'r> {
    pub(super) fn new(resolution: &'c TypeResolution, reporter: &'c mut ErrorReporter<'r>) -> Self {
        Self {
            resolution,
            reporter,
            reported: HashSet::new(),
        }
    }

    fn fix_type(&mut self, ty: &mut Type, range: Range) {
        let resolved = self.resolution.resolve(ty);

        let mut unsolved = Vec::new();
        collect_undecided(&resolved, &mut unsolved);
        let newly_unsolved = unsolved
            .into_iter()
            .filter(|id| self.reported.insert(*id))
            .count();
        if newly_unsolved > 0 {
            self.reporter.insufficient_type_inference_context(range);
        }

        *ty = resolved;
    }

    pub(super) fn fix(&mut self, expression: &mut Expression) {
        self.fix_type(&mut expression.ty, expression.range);

        match &mut expression.kind {
            ExpressionKind::Literal(_) | ExpressionKind::This | ExpressionKind::Variable(_) => {}
            ExpressionKind::ClassMember {
                type_arguments,
                member_name_range,
                ..
            } => {
                for type_argument in type_arguments {
                    self.fix_type(type_argument, *member_name_range);
                }
            }
            ExpressionKind::TupleConstructor(elements) => {
                elements.iter_mut().for_each(|e| self.fix(e))
            }
            ExpressionKind::ObjectConstructor(fields) => {
                fields.iter_mut().for_each(|f| self.fix(&mut f.expression))
            }
            ExpressionKind::VariantConstructor { data, .. } => self.fix(data),
            ExpressionKind::FieldAccess { expression, .. }
            | ExpressionKind::MethodAccess { expression, .. }
            | ExpressionKind::Unary { expression, .. }
            | ExpressionKind::Panic(expression)
            | ExpressionKind::BuiltinCall {
                argument: expression,
                ..
            } => self.fix(expression),
            ExpressionKind::FunctionApplication {
                function,
                arguments,
            } => {
                self.fix(function);
                arguments.iter_mut().for_each(|e| self.fix(e));
            }
            ExpressionKind::Binary { e1, e2, .. } => {
                self.fix(e1);
                self.fix(e2);
            }
            ExpressionKind::IfElse {
                condition,
                e1,
                e2,
            } => {
                self.fix(condition);
                self.fix(e1);
                self.fix(e2);
            }
            ExpressionKind::Match { matched, cases } => {
                self.fix(matched);
                cases.iter_mut().for_each(|c| self.fix(&mut c.expression));
            }
            ExpressionKind::Lambda {
                parameters,
                captured,
                body,
            } => {
                for parameter in parameters.iter_mut() {
                    self.fix_type(&mut parameter.ty, parameter.range);
                }
                for ty in captured.values_mut() {
                    *ty = self.resolution.resolve(ty);
                }
                self.fix(body);
            }
            ExpressionKind::StatementBlock(block) => {
                for statement in &mut block.statements {
                    self.fix(&mut statement.assigned);
                }
                if let Some(expression) = &mut block.expression {
                    self.fix(expression);
                }
            }
        }
    }
}

fn collect_undecided(ty: &Type, found: &mut Vec<UndecidedTypeId>) {
    match ty {
        Type::Primitive(_) => {}
        Type::Undecided(id) => found.push(*id),
        Type::Identifier { type_arguments, .. } => {
            type_arguments.iter().for_each(|t| collect_undecided(t, found))
        }
        Type::Tuple(elements) => elements.iter().for_each(|t| collect_undecided(t, found)),
        Type::Function {
            argument_types,
            return_type,
        } => {
            argument_types.iter().for_each(|t| collect_undecided(t, found));
            collect_undecided(return_type, found);
        }
    }
}
