// Operator folding. Takes the parser's flat chains and rebuilds them
// as precedence-respecting binary trees. Folding is opportunistic: a
// chain containing an operator outside the table is left flat, a
// warning is recorded, and the compiler lowers the raw chain in
// parser order instead. Assignment folds at the lowest precedence,
// right-associative, which is what hands the compiler its folded
// `lhs = rhs` shape.

use tracing::debug;

use crate::span::Diagnostic;
use crate::syntax::{ElseBranch, Expr, IfStmt, Item, OpTok, SourceFile, Stmt};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Assoc {
    Left,
    Right,
}

fn precedence(text: &str) -> Option<(u8, Assoc)> {
    match text {
        "*" | "/" => Some((70, Assoc::Left)),
        "+" | "-" => Some((60, Assoc::Left)),
        "<" | ">" | "<=" | ">=" => Some((50, Assoc::Left)),
        "==" => Some((45, Assoc::Left)),
        "&&" => Some((30, Assoc::Left)),
        "||" => Some((25, Assoc::Left)),
        "=" => Some((10, Assoc::Right)),
        _ => None,
    }
}

// Folds every expression in the file, accumulating a warning for
// each chain that would not fold. The file always comes back usable.
pub fn fold_source(file: SourceFile, diagnostics: &mut Vec<Diagnostic>) -> SourceFile {
    let items = file
        .items
        .into_iter()
        .map(|item| match item {
            Item::Statement(stmt) => Item::Statement(fold_stmt(stmt, diagnostics)),
            Item::Function(mut decl) => {
                decl.body = decl
                    .body
                    .into_iter()
                    .map(|stmt| fold_stmt(stmt, diagnostics))
                    .collect();
                Item::Function(decl)
            }
            Item::Struct(decl) => Item::Struct(decl),
        })
        .collect();
    SourceFile { items }
}

fn fold_stmt(stmt: Stmt, diagnostics: &mut Vec<Diagnostic>) -> Stmt {
    match stmt {
        Stmt::Binding { name, mutable, init, span } => {
            Stmt::Binding { name, mutable, init: fold_or_keep(init, diagnostics), span }
        }
        Stmt::If(stmt) => Stmt::If(fold_if(stmt, diagnostics)),
        Stmt::While { cond, body, span } => Stmt::While {
            cond: fold_or_keep(cond, diagnostics),
            body: body.into_iter().map(|s| fold_stmt(s, diagnostics)).collect(),
            span,
        },
        Stmt::Return { value, span } => Stmt::Return {
            value: value.map(|expr| fold_or_keep(expr, diagnostics)),
            span,
        },
        Stmt::Expr(expr) => Stmt::Expr(fold_or_keep(expr, diagnostics)),
    }
}

fn fold_if(stmt: IfStmt, diagnostics: &mut Vec<Diagnostic>) -> IfStmt {
    IfStmt {
        cond: fold_or_keep(stmt.cond, diagnostics),
        then_body: stmt
            .then_body
            .into_iter()
            .map(|s| fold_stmt(s, diagnostics))
            .collect(),
        else_branch: stmt.else_branch.map(|branch| match branch {
            ElseBranch::ElseIf(nested) => {
                ElseBranch::ElseIf(Box::new(fold_if(*nested, diagnostics)))
            }
            ElseBranch::Else(body) => ElseBranch::Else(
                body.into_iter().map(|s| fold_stmt(s, diagnostics)).collect(),
            ),
        }),
        span: stmt.span,
    }
}

fn fold_or_keep(expr: Expr, diagnostics: &mut Vec<Diagnostic>) -> Expr {
    match fold_expr(expr.clone()) {
        Ok(folded) => folded,
        Err(op) => {
            debug!(operator = %op.text, "fold fallback: keeping parser order");
            diagnostics.push(Diagnostic::warning(
                format!("operator chain with {:?} was not folded; keeping parser order", op.text),
                Some(op.span),
            ));
            expr
        }
    }
}

// Folds one expression tree. Err carries the operator that defeated
// the fold; the caller keeps the unfolded original.
pub fn fold_expr(expr: Expr) -> Result<Expr, OpTok> {
    match expr {
        Expr::Chain { operands, operators, span: _ } => {
            let operands = operands
                .into_iter()
                .map(fold_expr)
                .collect::<Result<Vec<_>, _>>()?;
            let mut folder = ChainFolder { operands: operands.into_iter(), operators, pos: 0 };
            let folded = folder.climb(0)?;
            debug_assert!(folder.pos == folder.operators.len());
            Ok(folded)
        }
        Expr::Binary { op, lhs, rhs, span } => Ok(Expr::Binary {
            op,
            lhs: Box::new(fold_expr(*lhs)?),
            rhs: Box::new(fold_expr(*rhs)?),
            span,
        }),
        Expr::Member { base, name, name_span, span } => Ok(Expr::Member {
            base: Box::new(fold_expr(*base)?),
            name,
            name_span,
            span,
        }),
        Expr::Call { callee, args, span } => Ok(Expr::Call {
            callee: Box::new(fold_expr(*callee)?),
            args: args.into_iter().map(fold_expr).collect::<Result<Vec<_>, _>>()?,
            span,
        }),
        leaf => Ok(leaf),
    }
}

struct ChainFolder {
    operands: std::vec::IntoIter<Expr>,
    operators: Vec<OpTok>,
    pos: usize,
}

impl ChainFolder {
    fn climb(&mut self, min_prec: u8) -> Result<Expr, OpTok> {
        let mut lhs = match self.operands.next() {
            Some(operand) => operand,
            None => unreachable!("parser guarantees operands.len() == operators.len() + 1"),
        };
        while self.pos < self.operators.len() {
            let op = self.operators[self.pos].clone();
            let (prec, assoc) = match precedence(&op.text) {
                Some(entry) => entry,
                None => return Err(op),
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let next_min = match assoc {
                Assoc::Left => prec + 1,
                Assoc::Right => prec,
            };
            let rhs = self.climb(next_min)?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::LineIndex;
    use crate::syntax;

    fn folded(text: &str) -> Expr {
        let index = LineIndex::new(text);
        let expr = syntax::parse_expression(text, &index).unwrap();
        fold_expr(expr).unwrap()
    }

    // Renders the folded tree in prefix form for easy assertions.
    fn shape(expr: &Expr) -> String {
        match expr {
            Expr::Int(v, _) => v.to_string(),
            Expr::Ident(name, _) => name.clone(),
            Expr::Binary { op, lhs, rhs, .. } => {
                format!("({} {} {})", op.text, shape(lhs), shape(rhs))
            }
            Expr::Call { callee, args, .. } => {
                let args: Vec<String> = args.iter().map(shape).collect();
                format!("{}[{}]", shape(callee), args.join(" "))
            }
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        assert_eq!(shape(&folded("1 + 2 * 3")), "(+ 1 (* 2 3))");
        assert_eq!(shape(&folded("1 * 2 + 3")), "(+ (* 1 2) 3)");
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(shape(&folded("1 - 2 - 3")), "(- (- 1 2) 3)");
        assert_eq!(shape(&folded("8 / 4 / 2")), "(/ (/ 8 4) 2)");
    }

    #[test]
    fn test_comparison_below_arithmetic() {
        assert_eq!(shape(&folded("3 + 4 < 3 * 4")), "(< (+ 3 4) (* 3 4))");
        assert_eq!(shape(&folded("a + 1 == b - 1")), "(== (+ a 1) (- b 1))");
    }

    #[test]
    fn test_logical_lowest_except_assignment() {
        assert_eq!(
            shape(&folded("a < 1 && b > 2 || c == 3")),
            "(|| (&& (< a 1) (> b 2)) (== c 3))"
        );
    }

    #[test]
    fn test_assignment_folds_right() {
        assert_eq!(shape(&folded("a = b + 1")), "(= a (+ b 1))");
        assert_eq!(shape(&folded("a = b = 1")), "(= a (= b 1))");
    }

    #[test]
    fn test_unknown_operator_defeats_fold() {
        let index = LineIndex::new("1 % 2");
        let expr = syntax::parse_expression("1 % 2", &index).unwrap();
        let op = fold_expr(expr).unwrap_err();
        assert_eq!(op.text, "%");
    }

    #[test]
    fn test_fold_recurses_into_call_args() {
        assert_eq!(shape(&folded("f(1 + 2 * 3)")), "f[(+ 1 (* 2 3))]");
    }

    #[test]
    fn test_fold_source_keeps_raw_chain_on_failure() {
        let text = "let x = 1 % 2";
        let index = LineIndex::new(text);
        let file = syntax::parse(text, &index).unwrap();
        let mut diagnostics = Vec::new();
        let file = fold_source(file, &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        match &file.items[0] {
            Item::Statement(Stmt::Binding { init, .. }) => {
                assert!(matches!(init, Expr::Chain { .. }));
            }
            other => panic!("expected binding, got {:?}", other),
        }
    }
}
