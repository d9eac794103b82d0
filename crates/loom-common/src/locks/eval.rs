// Copyright (C) 2025 The loom authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use tracing::warn;

use crate::locks::{BoolOp, LockExpr, LockFuncRegistry, LockSet, LockTerm};
use crate::model::{ObjectRecord, PlayerRecord, WorldState};

/// Everything a lock function may look at: the accessing entity (object
/// and/or account), the accessed object, the world, and the configured
/// permission hierarchy.
pub struct LockCtx<'a> {
    pub accessing_obj: Option<&'a ObjectRecord>,
    pub accessing_player: Option<&'a PlayerRecord>,
    pub accessed: &'a ObjectRecord,
    pub state: &'a dyn WorldState,
    /// Permission tokens ordered lowest to highest; holding a higher token
    /// satisfies a check for a lower one.
    pub perm_hierarchy: &'a [String],
}

impl LockCtx<'_> {
    /// Does any held token satisfy `wanted`, either exactly or by outranking
    /// it in the hierarchy? Tokens outside the hierarchy only match exactly.
    pub fn satisfies_perm(&self, held: &[String], wanted: &str) -> bool {
        let wanted_rank = self.rank(wanted);
        for token in held {
            if token.eq_ignore_ascii_case(wanted) {
                return true;
            }
            if let (Some(held_rank), Some(wanted_rank)) = (self.rank(token), wanted_rank) {
                if held_rank >= wanted_rank {
                    return true;
                }
            }
        }
        false
    }

    fn rank(&self, token: &str) -> Option<usize> {
        self.perm_hierarchy
            .iter()
            .position(|t| t.eq_ignore_ascii_case(token))
    }
}

/// Look up the entry for `access_type` and evaluate it. Absent entry returns
/// the caller-supplied default. A superuser accessor passes everything unless
/// the accessed object opts out of the bypass.
pub fn check_lock(
    locks: &LockSet,
    access_type: &str,
    ctx: &LockCtx<'_>,
    registry: &LockFuncRegistry,
    default: bool,
) -> bool {
    if let Some(player) = ctx.accessing_player {
        if player.superuser && !ctx.accessed.no_superuser_bypass {
            return true;
        }
    }
    let Some(entry) = locks.entry(&access_type.to_lowercase()) else {
        return default;
    };
    eval_expr(&entry.expr, ctx, registry)
}

/// Short-circuit left-to-right evaluation, no precedence between AND and OR.
/// A term whose lock function fails evaluates to false; the failure is logged
/// and the remaining terms still run.
pub fn eval_expr(expr: &LockExpr, ctx: &LockCtx<'_>, registry: &LockFuncRegistry) -> bool {
    let mut acc = eval_term(&expr.first, ctx, registry);
    for (op, term) in &expr.rest {
        match op {
            BoolOp::And => {
                if !acc {
                    continue;
                }
                acc = eval_term(term, ctx, registry);
            }
            BoolOp::Or => {
                if acc {
                    continue;
                }
                acc = eval_term(term, ctx, registry);
            }
        }
    }
    acc
}

fn eval_term(term: &LockTerm, ctx: &LockCtx<'_>, registry: &LockFuncRegistry) -> bool {
    let Some(func) = registry.get(&term.call.func) else {
        // Stored before the function was unregistered; fails closed.
        warn!(func = %term.call.func, "lock function vanished from registry");
        return false;
    };
    let result = match func(ctx, &term.call) {
        Ok(result) => result,
        Err(e) => {
            warn!(func = %term.call.func, error = %e, "lock function failed; treating as false");
            false
        }
    };
    if term.negate { !result } else { result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::parse_entry;
    use crate::locks::{LockCall, LockError};
    use crate::model::world_state::PanicState;
    use crate::model::{Dbref, ObjectRecord, PlayerId, PlayerRecord};
    use test_case::test_case;

    fn test_registry() -> LockFuncRegistry {
        let mut registry = LockFuncRegistry::core();
        registry.register("t", |_, _| Ok(true));
        registry.register("f", |_, _| Ok(false));
        registry.register("boom", |_, call: &LockCall| {
            Err(LockError::BadLockArg(call.func.clone(), "boom".to_string()))
        });
        registry
    }

    struct Fixture {
        accessed: ObjectRecord,
        hierarchy: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                accessed: ObjectRecord::new(Dbref(1), "thing", "core.Object"),
                hierarchy: ["Player", "Builder", "Admin", "Developer"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        }
    }

    fn eval(fixture: &Fixture, expr_str: &str) -> bool {
        let registry = test_registry();
        let state = PanicState;
        let ctx = LockCtx {
            accessing_obj: None,
            accessing_player: None,
            accessed: &fixture.accessed,
            state: &state,
            perm_hierarchy: &fixture.hierarchy,
        };
        let entry = parse_entry(&format!("x:{expr_str}")).unwrap();
        eval_expr(&entry.expr, &ctx, &registry)
    }

    #[test_case("t()", true; "single true")]
    #[test_case("f()", false; "single false")]
    #[test_case("NOT t()", false; "negated true")]
    #[test_case("NOT f()", true; "negated false")]
    #[test_case("t() AND t()", true; "and both")]
    #[test_case("t() AND f()", false; "and right false")]
    #[test_case("f() AND t()", false; "and left false")]
    #[test_case("f() OR t()", true; "or right true")]
    #[test_case("f() OR f()", false; "or both false")]
    #[test_case("t() OR f() AND f()", false; "left to right no precedence")]
    #[test_case("f() OR t() AND t()", true; "or then and")]
    #[test_case("NOT f() AND NOT f()", true; "double negation")]
    fn test_truth_table(expr: &str, expected: bool) {
        let fixture = Fixture::new();
        assert_eq!(eval(&fixture, expr), expected);
    }

    #[test]
    fn test_failing_func_is_false_and_does_not_abort() {
        let fixture = Fixture::new();
        assert!(!eval(&fixture, "boom()"));
        // The OR after the failure still evaluates.
        assert!(eval(&fixture, "boom() OR t()"));
    }

    #[test]
    fn test_check_lock_default_when_absent() {
        let fixture = Fixture::new();
        let registry = test_registry();
        let state = PanicState;
        let ctx = LockCtx {
            accessing_obj: None,
            accessing_player: None,
            accessed: &fixture.accessed,
            state: &state,
            perm_hierarchy: &fixture.hierarchy,
        };
        let locks = LockSet::empty();
        assert!(check_lock(&locks, "edit", &ctx, &registry, true));
        assert!(!check_lock(&locks, "edit", &ctx, &registry, false));
    }

    #[test]
    fn test_superuser_bypass_and_opt_out() {
        let mut fixture = Fixture::new();
        let registry = test_registry();
        let state = PanicState;
        let mut player = PlayerRecord::new(PlayerId(1), "root", "pw");
        player.superuser = true;

        let mut locks = LockSet::empty();
        locks.add("edit:none()", &registry).unwrap();

        let ctx = LockCtx {
            accessing_obj: None,
            accessing_player: Some(&player),
            accessed: &fixture.accessed,
            state: &state,
            perm_hierarchy: &fixture.hierarchy,
        };
        assert!(check_lock(&locks, "edit", &ctx, &registry, false));

        fixture.accessed.no_superuser_bypass = true;
        let ctx = LockCtx {
            accessing_obj: None,
            accessing_player: Some(&player),
            accessed: &fixture.accessed,
            state: &state,
            perm_hierarchy: &fixture.hierarchy,
        };
        assert!(!check_lock(&locks, "edit", &ctx, &registry, false));
    }

    #[test]
    fn test_perm_hierarchy() {
        let fixture = Fixture::new();
        let registry = test_registry();
        let state = PanicState;
        let mut player = PlayerRecord::new(PlayerId(1), "bob", "pw");
        player.permissions = vec!["Admin".to_string()];
        let ctx = LockCtx {
            accessing_obj: None,
            accessing_player: Some(&player),
            accessed: &fixture.accessed,
            state: &state,
            perm_hierarchy: &fixture.hierarchy,
        };
        // Admin outranks Builder, but not Developer.
        assert!(ctx.satisfies_perm(&player.permissions, "Builder"));
        assert!(ctx.satisfies_perm(&player.permissions, "Admin"));
        assert!(!ctx.satisfies_perm(&player.permissions, "Developer"));
        // Tokens outside the hierarchy only match exactly.
        assert!(!ctx.satisfies_perm(&player.permissions, "Wizard"));
    }
}
