mod barrier;
mod context;
mod copy;

pub use barrier::*;
pub use context::*;
pub use copy::*;

use tilecl_ir::{Scope, Variable, WARPGROUP_SIZE};

/// Runs `func` on the first thread of every warp-group.
pub fn once<R>(scope: &mut Scope, func: impl FnOnce(&mut Scope) -> R) -> R {
    let tid = scope.thread_idx();
    let lane = scope.rem(tid, Variable::index(WARPGROUP_SIZE));
    let cond = scope.cmp_eq(lane, Variable::index(0));
    scope.if_then(cond, func)
}

/// Runs `func` on the first thread of the block.
pub fn single_thread<R>(scope: &mut Scope, func: impl FnOnce(&mut Scope) -> R) -> R {
    let tid = scope.thread_idx();
    let cond = scope.cmp_eq(tid, Variable::index(0));
    scope.if_then(cond, func)
}
