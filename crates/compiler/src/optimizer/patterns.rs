//! The rewrite table and its matching engine.
//!
//! Each entry describes a window of intermediates to match and the action
//! that replaces it; the engine checks the window guard, applies the action,
//! and keeps the address table consistent. Constant folding lives here too,
//! including its refusal cases (division by zero, `INT_MIN / -1`), which
//! warn once per site and leave the instructions alone.

use muf_core::{Op, Prim};

use crate::optimizer::{remove_intermediate, window_clear};
use crate::state::{CompileState, IrOp};

/// One element of a match window.
#[derive(Debug, Clone, Copy)]
enum M {
    /// A specific primitive.
    P(Prim),
    /// A specific integer push.
    I(i32),
    /// Any integer push.
    AnyI,
    /// A push of the empty string.
    EmptyStr,
    /// Any string push.
    AnyS,
    /// A specific frame-variable push.
    V(usize),
    /// Any conditional branch.
    AnyIf,
    /// Any scoped-variable push.
    AnySV,
    /// Any local-variable push.
    AnyLV,
}

/// What to do with a matched window.
#[derive(Debug, Clone, Copy)]
enum Action {
    /// Replace the window with this primitive sequence (never longer than
    /// the window).
    Prims(&'static [Prim]),
    /// `int1 int2 <arith>` constant folding.
    Fold,
    /// `n rotate` strength reduction; bails on rotations it cannot name.
    RotateByConst,
    /// `n pick` strength reduction.
    PickByConst,
    /// Variable push + `@`/`!` fuses into a single fetch/store op.
    FuseVar,
    /// `not not <if>` keeps only the branch.
    NotNotIf,
    /// `me @ <str> notify` becomes `<str> tell`.
    StrTell,
}

struct Pattern {
    window: &'static [M],
    action: Action,
}

/// The rewrite table. Longer windows come first so their shorter suffixes
/// cannot shadow them.
static PATTERNS: &[Pattern] = &[
    // me @ swap notify  =>  tell
    Pattern {
        window: &[M::V(0), M::P(Prim::At), M::P(Prim::Swap), M::P(Prim::Notify)],
        action: Action::Prims(&[Prim::Tell]),
    },
    // me @ <str> notify  =>  <str> tell
    Pattern {
        window: &[M::V(0), M::P(Prim::At), M::AnyS, M::P(Prim::Notify)],
        action: Action::StrTell,
    },
    // "" strcmp 0 =  =>  not
    Pattern {
        window: &[M::EmptyStr, M::P(Prim::StrCmp), M::I(0), M::P(Prim::Eq)],
        action: Action::Prims(&[Prim::Not]),
    },
    Pattern {
        window: &[M::EmptyStr, M::P(Prim::StringCmp), M::I(0), M::P(Prim::Eq)],
        action: Action::Prims(&[Prim::Not]),
    },
    // int int arith  =>  folded constant
    Pattern {
        window: &[M::AnyI, M::AnyI, M::P(Prim::Add)],
        action: Action::Fold,
    },
    Pattern {
        window: &[M::AnyI, M::AnyI, M::P(Prim::Sub)],
        action: Action::Fold,
    },
    Pattern {
        window: &[M::AnyI, M::AnyI, M::P(Prim::Mul)],
        action: Action::Fold,
    },
    Pattern {
        window: &[M::AnyI, M::AnyI, M::P(Prim::Div)],
        action: Action::Fold,
    },
    Pattern {
        window: &[M::AnyI, M::AnyI, M::P(Prim::Mod)],
        action: Action::Fold,
    },
    // rot rot swap  =>  swap rot
    Pattern {
        window: &[M::P(Prim::Rot), M::P(Prim::Rot), M::P(Prim::Swap)],
        action: Action::Prims(&[Prim::Swap, Prim::Rot]),
    },
    // not not <if>  =>  <if>
    Pattern {
        window: &[M::P(Prim::Not), M::P(Prim::Not), M::AnyIf],
        action: Action::NotNotIf,
    },
    // variable fetch/store fusion
    Pattern {
        window: &[M::AnySV, M::P(Prim::At)],
        action: Action::FuseVar,
    },
    Pattern {
        window: &[M::AnySV, M::P(Prim::Bang)],
        action: Action::FuseVar,
    },
    Pattern {
        window: &[M::AnyLV, M::P(Prim::At)],
        action: Action::FuseVar,
    },
    Pattern {
        window: &[M::AnyLV, M::P(Prim::Bang)],
        action: Action::FuseVar,
    },
    // strength reductions
    Pattern {
        window: &[M::I(0), M::P(Prim::Eq)],
        action: Action::Prims(&[Prim::Not]),
    },
    Pattern {
        window: &[M::I(1), M::P(Prim::Add)],
        action: Action::Prims(&[Prim::Inc]),
    },
    Pattern {
        window: &[M::I(1), M::P(Prim::Sub)],
        action: Action::Prims(&[Prim::Dec]),
    },
    Pattern {
        window: &[M::AnyI, M::P(Prim::Pick)],
        action: Action::PickByConst,
    },
    Pattern {
        window: &[M::AnyI, M::P(Prim::Rotate)],
        action: Action::RotateByConst,
    },
    // stack shuffle identities
    Pattern {
        window: &[M::P(Prim::Rot), M::P(Prim::Rot)],
        action: Action::Prims(&[Prim::RRot]),
    },
    Pattern {
        window: &[M::P(Prim::RRot), M::P(Prim::RRot)],
        action: Action::Prims(&[Prim::Rot]),
    },
    Pattern {
        window: &[M::P(Prim::Swap), M::P(Prim::Pop)],
        action: Action::Prims(&[Prim::Nip]),
    },
    Pattern {
        window: &[M::P(Prim::Swap), M::P(Prim::Over)],
        action: Action::Prims(&[Prim::Tuck]),
    },
    Pattern {
        window: &[M::P(Prim::Eq), M::P(Prim::Not)],
        action: Action::Prims(&[Prim::Ne]),
    },
];

fn matches_one(word: &IrOp, m: M) -> bool {
    let IrOp::Op(op) = word else { return false };
    match (m, op) {
        (M::P(prim), Op::Primitive(p)) => *p == prim,
        (M::I(n), Op::Int(v)) => *v == n,
        (M::AnyI, Op::Int(_)) => true,
        (M::EmptyStr, Op::Str(s)) => s.is_empty(),
        (M::AnyS, Op::Str(_)) => true,
        (M::V(n), Op::Var(v)) => *v == n,
        (M::AnyIf, Op::If(_)) => true,
        (M::AnySV, Op::SVar(_)) => true,
        (M::AnyLV, Op::LVar(_)) => true,
        _ => false,
    }
}

fn window_matches(st: &CompileState, start: usize, window: &[M]) -> bool {
    if start + window.len() > st.words.len() {
        return false;
    }
    window
        .iter()
        .enumerate()
        .all(|(offset, &m)| matches_one(&st.words[start + offset].op, m))
}

/// Tries every pattern at `start`; returns whether one applied.
pub(super) fn try_rewrite(
    st: &mut CompileState,
    start: usize,
    referenced: &mut Vec<bool>,
    removed: &mut usize,
) -> bool {
    for pattern in PATTERNS {
        if !window_matches(st, start, pattern.window) {
            continue;
        }
        if !window_clear(st, referenced, start, pattern.window.len()) {
            continue;
        }
        if apply(st, start, pattern, referenced, removed) {
            return true;
        }
    }
    false
}

/// Shrinks the window at `start` down to `keep` instructions.
fn truncate_window(
    st: &mut CompileState,
    referenced: &mut Vec<bool>,
    start: usize,
    window_len: usize,
    keep: usize,
    removed: &mut usize,
) {
    for _ in keep..window_len {
        remove_intermediate(st, referenced, start + keep);
        *removed += 1;
    }
}

fn apply(
    st: &mut CompileState,
    start: usize,
    pattern: &Pattern,
    referenced: &mut Vec<bool>,
    removed: &mut usize,
) -> bool {
    let len = pattern.window.len();
    match pattern.action {
        Action::Prims(prims) => {
            for (offset, prim) in prims.iter().enumerate() {
                st.words[start + offset].op = IrOp::Op(Op::Primitive(*prim));
            }
            truncate_window(st, referenced, start, len, prims.len(), removed);
            true
        }
        Action::StrTell => {
            let text = st.words[start + 2].op.clone();
            st.words[start].op = text;
            st.words[start + 1].op = IrOp::Op(Op::Primitive(Prim::Tell));
            truncate_window(st, referenced, start, len, 2, removed);
            true
        }
        Action::NotNotIf => {
            let branch = st.words[start + 2].op.clone();
            st.words[start].op = branch;
            truncate_window(st, referenced, start, len, 1, removed);
            true
        }
        Action::FuseVar => {
            let fused = match (&st.words[start].op, &st.words[start + 1].op) {
                (IrOp::Op(Op::SVar(n)), IrOp::Op(Op::Primitive(Prim::At))) => Op::SVarAt(*n),
                (IrOp::Op(Op::SVar(n)), IrOp::Op(Op::Primitive(Prim::Bang))) => Op::SVarBang(*n),
                (IrOp::Op(Op::LVar(n)), IrOp::Op(Op::Primitive(Prim::At))) => Op::LVarAt(*n),
                (IrOp::Op(Op::LVar(n)), IrOp::Op(Op::Primitive(Prim::Bang))) => Op::LVarBang(*n),
                _ => return false,
            };
            st.words[start].op = IrOp::Op(fused);
            truncate_window(st, referenced, start, len, 1, removed);
            true
        }
        Action::PickByConst => {
            let IrOp::Op(Op::Int(n)) = st.words[start].op else {
                return false;
            };
            let prim = match n {
                1 => Prim::Dup,
                2 => Prim::Over,
                _ => return false,
            };
            st.words[start].op = IrOp::Op(Op::Primitive(prim));
            truncate_window(st, referenced, start, len, 1, removed);
            true
        }
        Action::RotateByConst => {
            let IrOp::Op(Op::Int(n)) = st.words[start].op else {
                return false;
            };
            match n {
                -1 | 0 | 1 => {
                    truncate_window(st, referenced, start, len, 0, removed);
                }
                2 | -2 => {
                    st.words[start].op = IrOp::Op(Op::Primitive(Prim::Swap));
                    truncate_window(st, referenced, start, len, 1, removed);
                }
                3 => {
                    st.words[start].op = IrOp::Op(Op::Primitive(Prim::Rot));
                    truncate_window(st, referenced, start, len, 1, removed);
                }
                -3 => {
                    st.words[start].op = IrOp::Op(Op::Primitive(Prim::RRot));
                    truncate_window(st, referenced, start, len, 1, removed);
                }
                _ => return false,
            }
            true
        }
        Action::Fold => fold_constants(st, start, referenced, removed),
    }
}

/// Folds `int1 int2 <op>`; division and modulus refuse the undefined cases
/// and warn once per site.
fn fold_constants(
    st: &mut CompileState,
    start: usize,
    referenced: &mut Vec<bool>,
    removed: &mut usize,
) -> bool {
    let (IrOp::Op(Op::Int(a)), IrOp::Op(Op::Int(b)), IrOp::Op(Op::Primitive(prim))) = (
        &st.words[start].op,
        &st.words[start + 1].op,
        &st.words[start + 2].op,
    ) else {
        return false;
    };
    let (a, b, prim) = (*a, *b, *prim);

    let folded = match prim {
        Prim::Add => Some(a.wrapping_add(b)),
        Prim::Sub => Some(a.wrapping_sub(b)),
        Prim::Mul => Some(a.wrapping_mul(b)),
        Prim::Div | Prim::Mod => {
            if b == 0 {
                warn_fold_site(st, start + 2, prim, "by zero");
                None
            } else if a == i32::MIN && b == -1 {
                warn_fold_site(st, start + 2, prim, "overflow");
                None
            } else if prim == Prim::Div {
                Some(a / b)
            } else {
                Some(a % b)
            }
        }
        _ => None,
    };

    let Some(value) = folded else { return false };
    st.words[start].op = IrOp::Op(Op::Int(value));
    truncate_window(st, referenced, start, 3, 1, removed);
    true
}

fn warn_fold_site(st: &mut CompileState, site: usize, prim: Prim, kind: &str) {
    if st.words[site].warned {
        return;
    }
    st.words[site].warned = true;
    let line = st.words[site].line;
    let what = match (prim, kind) {
        (Prim::Div, "by zero") => "Divide by zero",
        (Prim::Mod, "by zero") => "Modulus by zero",
        _ => "Integer overflow",
    };
    let message = format!("Warning on line {line}: {what}.");
    st.compile_message(&message);
}
