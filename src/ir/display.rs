//! Textual IR dump.

use super::{BlockId, ConstValue, DataType, IrTree, StmtId, StmtKind};
use std::fmt::{self, Write};

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::U1 => "u1",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(v) => write!(f, "{}", v),
            ConstValue::Int(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for IrTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push_str("kernel {\n");
        self.write_block_contents(&mut out, self.root(), 1)?;
        out.push_str("}\n");
        f.write_str(&out)
    }
}

fn scope_suffix(scope: Option<StmtId>) -> String {
    match scope {
        Some(scope) => format!(" scope={}", scope),
        None => String::new(),
    }
}

impl IrTree {
    /// One-line rendering of a non-container statement
    pub fn stmt_summary(&self, stmt: StmtId) -> String {
        match self.kind(stmt) {
            StmtKind::Alloca { ty } => format!("{} = alloca {}", stmt, ty),
            StmtKind::Const { value } => format!("{} = const {}", stmt, value),
            StmtKind::LocalLoad { src } => format!("{} = local load [{}]", stmt, src),
            StmtKind::LocalStore { dest, value } => {
                format!("{} : local store [{} <- {}]", stmt, dest, value)
            }
            StmtKind::Op { name, operands } => {
                let args: Vec<String> = operands.iter().map(|op| op.to_string()).collect();
                if args.is_empty() {
                    format!("{} = {}", stmt, name)
                } else {
                    format!("{} = {} {}", stmt, name, args.join(", "))
                }
            }
            StmtKind::Continue {
                scope,
                levels_up,
                from_function_return,
            } => {
                let mut line = format!("{} : continue{}", stmt, scope_suffix(*scope));
                if scope.is_none() || *levels_up != 1 {
                    line.push_str(&format!(" levels_up={}", levels_up));
                }
                if *from_function_return {
                    line.push_str(" (function return)");
                }
                line
            }
            StmtKind::Break {
                scope,
                from_function_return,
            } => {
                let mut line = format!("{} : break{}", stmt, scope_suffix(*scope));
                if *from_function_return {
                    line.push_str(" (function return)");
                }
                line
            }
            StmtKind::WhileControl { mask, cond } => match mask {
                Some(mask) => format!("{} : while control {}, {}", stmt, mask, cond),
                None => format!("{} : while control {}", stmt, cond),
            },
            StmtKind::If { cond, .. } => format!("{} : if {}", stmt, cond),
            StmtKind::Loop { .. } => format!("{} : {}", stmt, self.kind(stmt).name()),
            StmtKind::Offloaded { task_type, .. } => {
                format!("{} : offloaded {}", stmt, task_type.name())
            }
        }
    }

    fn write_block_contents(&self, out: &mut String, block: BlockId, depth: usize) -> fmt::Result {
        for &stmt in &self.block(block).statements {
            self.write_stmt(out, stmt, depth)?;
        }
        Ok(())
    }

    fn write_stmt(&self, out: &mut String, stmt: StmtId, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self.kind(stmt) {
            StmtKind::If {
                cond,
                true_block,
                false_block,
            } => {
                writeln!(out, "{}{} : if {} {{", indent, stmt, cond)?;
                if let Some(block) = true_block {
                    self.write_block_contents(out, *block, depth + 1)?;
                }
                match false_block {
                    Some(block) => {
                        writeln!(out, "{}}} else {{", indent)?;
                        self.write_block_contents(out, *block, depth + 1)?;
                        writeln!(out, "{}}}", indent)?;
                    }
                    None => writeln!(out, "{}}}", indent)?,
                }
            }
            StmtKind::Loop { kind, body } => {
                let header = if kind.is_while_true() {
                    "while true".to_string()
                } else {
                    self.kind(stmt).name().to_string()
                };
                writeln!(out, "{}{} : {} {{", indent, stmt, header)?;
                self.write_block_contents(out, *body, depth + 1)?;
                writeln!(out, "{}}}", indent)?;
            }
            StmtKind::Offloaded { task_type, blocks } => {
                writeln!(out, "{}{} : offloaded {} {{", indent, stmt, task_type.name())?;
                let inner = "  ".repeat(depth + 1);
                for (phase, block) in blocks.phases() {
                    writeln!(out, "{}{} {{", inner, phase.name())?;
                    self.write_block_contents(out, block, depth + 2)?;
                    writeln!(out, "{}}}", inner)?;
                }
                writeln!(out, "{}}}", indent)?;
            }
            _ => writeln!(out, "{}{}", indent, self.stmt_summary(stmt))?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{IrBuilder, OffloadedTaskType};

    #[test]
    fn test_dump_nested_tree() {
        let mut b = IrBuilder::new();
        b.offloaded(OffloadedTaskType::RangeFor, |b, task| {
            let flag = b.const_bool(true);
            b.if_then(flag, |b| {
                b.func_return_cont(task, 2);
            });
        });
        let text = b.finish().to_string();
        let expected = "\
kernel {
  $0 : offloaded range_for {
    body {
      $1 = const true
      $2 : if $1 {
        $3 : continue scope=$0 levels_up=2 (function return)
      }
    }
  }
}
";
        assert_eq!(text, expected);
    }
}
