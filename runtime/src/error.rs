// error.rs — Unrecoverable runtime failures

/// Report a violated runtime invariant (or exhausted stack memory) and abort.
#[track_caller]
pub fn internal_error(msg: &str) -> ! {
    tracing::error!(target: "fibers", "internal error: {msg}");
    panic!("internal error: {msg}")
}
