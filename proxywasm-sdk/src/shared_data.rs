//! Process-wide key/value store guarded by compare-and-swap
//!
//! Every key carries a CAS counter. A write succeeds only when the caller
//! passes the counter it last read; a stale counter fails with
//! [`HostError::CasMismatch`](proxywasm_api::HostError::CasMismatch) and
//! leaves the value untouched. Retrying is the caller's decision.

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::HostError;

/// Value and CAS counter of `key`; `None` when the key was never written
pub fn get_shared_data(key: &str) -> Result<Option<(Vec<u8>, u32)>> {
    let mut value = Vec::new();
    let mut cas = 0;
    match hostcall::host()
        .get_shared_data(key.as_bytes(), &mut value, &mut cas)
        .into_result()
    {
        Ok(()) => Ok(Some((value, cas))),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write `value` if the stored counter still equals `cas`
///
/// Pass `0` for a key that does not exist yet.
pub fn set_shared_data(key: &str, value: &[u8], cas: u32) -> Result<()> {
    hostcall::host()
        .set_shared_data(key.as_bytes(), value, cas)
        .into_result()?;
    Ok(())
}
