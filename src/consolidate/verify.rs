use tracing::{debug, warn};

use super::error::{ConsolidationError, ConsolidationResult};
use crate::excel::{check_cell, CellRef, RuleContext, RuleSource, Sheet, ValidationKind, Verdict};

/// Check every populated data cell (row 1 onwards) against the rule bound
/// to its location. The first violation fails with the name of `file_name`.
/// Returns the number of cells that had a rule.
pub fn verify_sheet(
    sheet: &Sheet,
    rules: &dyn RuleSource,
    ctx: &dyn RuleContext,
    file_name: &str,
) -> ConsolidationResult<usize> {
    let mut checked = 0;

    for (row_idx, row) in sheet.rows().filter(|(idx, _)| *idx >= 1) {
        for (col_idx, cell) in row.cells() {
            let at = CellRef::new(row_idx, col_idx);
            let Some(rule) = rules.rule_for(at) else {
                continue;
            };
            checked += 1;

            match check_cell(rule, cell, ctx) {
                Verdict::Pass => {}
                Verdict::Fail(reason) => {
                    return Err(ConsolidationError::ValidationFailure {
                        file: file_name.to_string(),
                        cell: at.to_a1(),
                        reason,
                    });
                }
                Verdict::Unresolved(what) if rule.kind == ValidationKind::Custom => {
                    debug!(cell = %at, "Skipping {}", what);
                }
                Verdict::Unresolved(what) => {
                    warn!(cell = %at, "Cannot resolve {}, treating cell as valid", what);
                }
            }
        }
    }

    debug!(checked, "Validated consolidated sheet");
    Ok(checked)
}
