//! Stable reporting order for diagnostics.
//!
//! Diagnostics without a location come first, in the order they were
//! produced. Located diagnostics follow, grouped by unit path and sorted by
//! line then column. Ties keep production order, so two cycles over the same
//! project state report byte-identical lists.

use crate::diagnostic::Diagnostic;
use std::path::Path;

fn sort_key(diag: &Diagnostic) -> Option<(&Path, u32, u32)> {
    diag.location
        .as_ref()
        .map(|l| (l.path.as_path(), l.line, l.column))
}

/// Sorts diagnostics into reporting order in place.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    // `Option` orders `None` before `Some`, and `sort_by` is stable.
    diagnostics.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{Category, DiagnosticCode};
    use crate::location::Location;

    const CODE: DiagnosticCode = DiagnosticCode::new(Category::Analysis, 1);

    fn at(path: &str, line: u32, column: u32, msg: &str) -> Diagnostic {
        Diagnostic::error(CODE, msg).with_location(Location::new(path, line, column))
    }

    fn messages(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn unlocated_first_then_by_path_and_position() {
        let mut diags = vec![
            at("b.kl", 2, 1, "b2"),
            Diagnostic::warning(CODE, "global1"),
            at("a.kl", 5, 3, "a5"),
            at("b.kl", 1, 9, "b1"),
            Diagnostic::info(CODE, "global2"),
            at("a.kl", 5, 1, "a5c1"),
        ];
        sort_diagnostics(&mut diags);
        assert_eq!(
            messages(&diags),
            vec!["global1", "global2", "a5c1", "a5", "b1", "b2"]
        );
    }

    #[test]
    fn ties_keep_production_order() {
        let mut diags = vec![at("a.kl", 1, 1, "first"), at("a.kl", 1, 1, "second")];
        sort_diagnostics(&mut diags);
        assert_eq!(messages(&diags), vec!["first", "second"]);
    }

    #[test]
    fn order_is_independent_of_input_permutation() {
        let base = vec![
            at("c.kl", 1, 1, "c"),
            at("a.kl", 3, 1, "a3"),
            at("a.kl", 1, 1, "a1"),
        ];
        let mut forward = base.clone();
        let mut reversed: Vec<_> = base.into_iter().rev().collect();
        sort_diagnostics(&mut forward);
        sort_diagnostics(&mut reversed);
        assert_eq!(forward, reversed);
    }
}
