//! Final balance arithmetic and report text.

use serde::Serialize;

use crate::extract::AccountTree;
use crate::format::{format_yen, group_thousands};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Net balance overflows: baseline {baseline} + expense {expense}")]
    Overflow { baseline: i64, expense: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub net_balance: i64,
    /// `"name: 1,234円"` lines in page order.
    pub securities_lines: Vec<String>,
}

/// Combine the period baseline with month-to-date spending.
///
/// `expense_total` is added as-is; the portal reports spending as a
/// negative figure, so no sign is flipped here.
pub fn reconcile(
    tree: &AccountTree,
    securities_category: &str,
    baseline_total: i64,
    expense_total: i64,
) -> Result<ReportSummary, ReconcileError> {
    let net_balance =
        baseline_total
            .checked_add(expense_total)
            .ok_or(ReconcileError::Overflow {
                baseline: baseline_total,
                expense: expense_total,
            })?;


    let securities_lines = tree
        .bucket(securities_category)
        .unwrap_or_default()
        .iter()
        .map(|record| format!("{}: {}", record.bank_name, format_yen(record.number)))
        .collect();

    Ok(ReportSummary {
        net_balance,
        securities_lines,
    })
}

impl ReportSummary {
    /// Message body sent to the notifier.
    pub fn render(&self, expense_total: i64) -> String {
        format!(
            "[ラッキーマネー]\n{}\n\n[現在の支出]\n{}\n\n[証券口座]\n{}",
            format_yen(self.net_balance),
            group_thousands(expense_total),
            self.securities_lines.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::AccountRecord;

    fn tree() -> AccountTree {
        let mut tree = AccountTree::new();
        tree.push("銀行", AccountRecord::new("X銀行", 1000, 2000));
        tree.push("証券", AccountRecord::new("Yファンド", 500, 500));
        tree.push("証券", AccountRecord::new("A証券", 1_234_567, 1_300_000));
        tree
    }

    #[test]
    fn net_balance_is_baseline_plus_expense() -> Result<(), ReconcileError> {
        let summary = reconcile(&tree(), "証券", 1000, -200)?;
        assert_eq!(summary.net_balance, 800);
        Ok(())
    }

    #[test]
    fn overflowing_balance_is_an_error() {
        assert_eq!(
            reconcile(&tree(), "証券", i64::MAX, 1),
            Err(ReconcileError::Overflow {
                baseline: i64::MAX,
                expense: 1
            })
        );
        assert!(reconcile(&tree(), "証券", i64::MIN, -1).is_err());
        assert!(reconcile(&tree(), "証券", i64::MAX, -1).is_ok());
    }

    #[test]
    fn securities_lines_keep_page_order() -> Result<(), ReconcileError> {
        let summary = reconcile(&tree(), "証券", 0, 0)?;
        assert_eq!(
            summary.securities_lines,
            vec!["Yファンド: 500円", "A証券: 1,234,567円"]
        );
        Ok(())
    }

    #[test]
    fn missing_category_gives_no_lines() -> Result<(), ReconcileError> {
        let summary = reconcile(&tree(), "暗号資産", 10, 0)?;
        assert!(summary.securities_lines.is_empty());
        Ok(())
    }

    #[test]
    fn reconcile_is_deterministic() {
        assert_eq!(
            reconcile(&tree(), "証券", 5, -3),
            reconcile(&tree(), "証券", 5, -3)
        );
    }

    #[test]
    fn render_layout() -> Result<(), ReconcileError> {
        let summary = reconcile(&tree(), "証券", 250_000, -12_345)?;
        assert_eq!(
            summary.render(-12_345),
            "[ラッキーマネー]\n237,655円\n\n[現在の支出]\n-12,345\n\n[証券口座]\nYファンド: 500円\nA証券: 1,234,567円"
        );
        Ok(())
    }
}
