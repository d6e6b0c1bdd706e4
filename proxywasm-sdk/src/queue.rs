//! Named shared queues
//!
//! A plugin registers a queue under a name and is notified through
//! `on_queue_ready` whenever data is enqueued. Other plugins (or VMs) find
//! the queue with [`resolve`].

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::HostError;

/// Register a queue owned by the active plugin; returns its id
pub fn register(name: &str) -> Result<u32> {
    let mut queue_id = 0;
    hostcall::host()
        .register_shared_queue(name.as_bytes(), &mut queue_id)
        .into_result()?;
    Ok(queue_id)
}

/// Find a queue registered by `vm_id`; `None` when no such queue exists
pub fn resolve(vm_id: &str, name: &str) -> Result<Option<u32>> {
    let mut queue_id = 0;
    match hostcall::host()
        .resolve_shared_queue(vm_id.as_bytes(), name.as_bytes(), &mut queue_id)
        .into_result()
    {
        Ok(()) => Ok(Some(queue_id)),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Push `data` onto a queue
pub fn enqueue(queue_id: u32, data: &[u8]) -> Result<()> {
    hostcall::host()
        .enqueue_shared_queue(queue_id, data)
        .into_result()?;
    Ok(())
}

/// Pop the oldest item; an empty queue is [`HostError::Empty`]
pub fn dequeue(queue_id: u32) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    hostcall::host()
        .dequeue_shared_queue(queue_id, &mut data)
        .into_result()?;
    Ok(data)
}
