//! Small helpers shared by the codec and the session engine.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// Works like `assert!`, but for validation paths that report an error instead of panicking.
///
/// ```ignore
/// ensure!(buf.remaining() >= 4, ProtocolError::truncated("stream id"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Clamps a 64-bit credit counter into what a single `request(n)` or REQUEST_N can carry.
pub(crate) fn clamp_credit(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
