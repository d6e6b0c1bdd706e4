//! Plugin-level host calls: configuration, clock, tick, context switching

use crate::buffer::get_buffer;
use crate::error::Result;
use crate::hostcall;
use proxywasm_api::{BufferType, HostError};
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration bytes delivered with `on_plugin_start`
pub fn plugin_configuration() -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::PluginConfiguration, 0, usize::MAX)
}

/// Configuration bytes delivered with `on_vm_start`
pub fn vm_configuration() -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::VmConfiguration, 0, usize::MAX)
}

/// Plugin configuration parsed as JSON; `None` when no configuration was given
pub fn plugin_configuration_json<T: DeserializeOwned>() -> Result<Option<T>> {
    match plugin_configuration()? {
        Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(&bytes)?)),
        _ => Ok(None),
    }
}

/// Ask the host to call `on_tick` every `period`; zero disables ticks
pub fn set_tick_period(period: Duration) -> Result<()> {
    let millis = u32::try_from(period.as_millis()).map_err(|_| HostError::BadArgument)?;
    hostcall::host()
        .set_tick_period_milliseconds(millis)
        .into_result()?;
    Ok(())
}

/// Make `context_id` the target of subsequent host calls
///
/// Used from callbacks that act on a different stream than the one the
/// host is currently calling into.
pub fn set_effective_context(context_id: u32) -> Result<()> {
    hostcall::host().set_effective_context(context_id).into_result()?;
    crate::dispatcher::set_active_context(context_id);
    Ok(())
}

/// Tell the host a deferred plugin shutdown has finished
pub fn done() -> Result<()> {
    hostcall::host().done().into_result()?;
    Ok(())
}

/// Host wall clock
pub fn current_time() -> Result<SystemTime> {
    let mut nanos = 0;
    hostcall::host()
        .get_current_time_nanoseconds(&mut nanos)
        .into_result()?;
    Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
}

/// Call a host extension function by name
pub fn call_foreign_function(name: &str, argument: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    match hostcall::host()
        .call_foreign_function(name.as_bytes(), argument, &mut data)
        .into_result()
    {
        Ok(()) => Ok(Some(data)),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxywasm_api::Status;
    use serde::Deserialize;
    use std::rc::Rc;

    struct Configured(&'static [u8]);

    impl hostcall::ProxyHost for Configured {
        fn get_buffer_bytes(
            &self,
            buffer_type: u32,
            start: usize,
            max_size: usize,
            return_data: &mut Vec<u8>,
        ) -> Status {
            if buffer_type != BufferType::PluginConfiguration as u32 || self.0.is_empty() {
                return Status::NotFound;
            }
            let end = start.saturating_add(max_size).min(self.0.len());
            return_data.extend_from_slice(&self.0[start.min(end)..end]);
            Status::Ok
        }

        fn get_current_time_nanoseconds(&self, return_time: &mut u64) -> Status {
            *return_time = 1_500_000_000;
            Status::Ok
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Settings {
        required_keys: Vec<String>,
    }

    #[test]
    fn test_configuration_json() {
        hostcall::install(Rc::new(Configured(br#"{"requiredKeys":["my_key"]}"#)));
        let settings: Settings = plugin_configuration_json()
            .expect("Failed to parse configuration")
            .expect("configuration should be present");
        assert_eq!(settings.required_keys, vec!["my_key".to_string()]);
        assert!(vm_configuration().expect("Failed to read").is_none());
        hostcall::uninstall();
    }

    #[test]
    fn test_configuration_json_invalid() {
        hostcall::install(Rc::new(Configured(b"not json")));
        let err = plugin_configuration_json::<Settings>().expect_err("should not parse");
        assert!(matches!(err, crate::Error::Configuration(_)));
        hostcall::uninstall();
    }

    #[test]
    fn test_missing_configuration_is_none() {
        hostcall::install(Rc::new(Configured(b"")));
        assert!(plugin_configuration_json::<Settings>()
            .expect("Failed to read")
            .is_none());
        hostcall::uninstall();
    }

    #[test]
    fn test_current_time() {
        hostcall::install(Rc::new(Configured(b"")));
        let now = current_time().expect("Failed to read clock");
        assert_eq!(
            now.duration_since(UNIX_EPOCH).expect("clock before epoch"),
            Duration::from_millis(1500)
        );
        hostcall::uninstall();
    }
}
