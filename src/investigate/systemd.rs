//! Decoding of systemd unit status

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::exec::Executor;
use crate::state::{ComponentStatus, StatusFlag};

/// Query the three unit properties the decoder understands
pub fn show_status_command(service: &str) -> String {
    format!("systemctl show {service} -p LoadState,ActiveState,SubState")
}

/// Fetch and decode the status of a systemd unit on a host
pub async fn systemd_status(conn: &dyn Executor, service: &str) -> Result<ComponentStatus> {
    let output = conn.exec_checked(&show_status_command(service)).await?;
    let status = decode_status(&output.stdout)?;
    debug!("{} status on {}: {:?}", service, conn.host(), status);
    Ok(status)
}

/// Turn `systemctl show` output into a status flag set
///
/// Lines may use either `key=value` or `key: value`.
pub fn decode_status(raw: &str) -> Result<ComponentStatus> {
    let properties = parse_properties(raw)?;
    let get = |key: &str| properties.get(key).map(String::as_str).unwrap_or_default();

    let mut status = ComponentStatus::empty();

    if get("LoadState") == "loaded" {
        status |= StatusFlag::Installed;
    }

    if matches!(get("ActiveState"), "active" | "activating") {
        status |= StatusFlag::Active;
    }

    status |= match get("SubState") {
        "running" => StatusFlag::Running,
        "auto-restart" => StatusFlag::Restarting,
        "dead" => StatusFlag::Dead,
        _ => StatusFlag::Unknown,
    };

    Ok(status)
}

fn parse_properties(raw: &str) -> Result<BTreeMap<String, String>> {
    let normalized = normalize(raw);
    if normalized.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let parse_error = |message: String| Error::ParseError {
        message,
        raw: raw.to_string(),
    };

    let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&normalized)
        .map_err(|e| parse_error(format!("unit status: {e}")))?;

    values
        .into_iter()
        .map(|(key, value)| match value {
            serde_yaml::Value::String(s) => Ok((key, s)),
            serde_yaml::Value::Bool(b) => Ok((key, b.to_string())),
            serde_yaml::Value::Number(n) => Ok((key, n.to_string())),
            serde_yaml::Value::Null => Ok((key, String::new())),
            other => Err(parse_error(format!(
                "unit status: property {key} has non-scalar value {other:?}"
            ))),
        })
        .collect()
}

/// Rewrite `key=value` lines as `key: 'value'`
fn normalize(raw: &str) -> String {
    raw.lines()
        .map(|line| match line.split_once('=') {
            Some((key, value)) if !key.contains(':') => {
                format!("{}: '{}'", key.trim(), value.trim().replace('\'', "''"))
            }
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_states(status: ComponentStatus) -> Vec<StatusFlag> {
        StatusFlag::SUB_STATES
            .into_iter()
            .filter(|f| status.contains(*f))
            .collect()
    }

    #[test]
    fn test_running_service() {
        let status =
            decode_status("LoadState=loaded\nActiveState=active\nSubState=running\n").unwrap();

        assert_eq!(
            status,
            StatusFlag::Installed | StatusFlag::Active | StatusFlag::Running
        );
    }

    #[test]
    fn test_colon_separator() {
        let status =
            decode_status("LoadState: loaded\nActiveState: activating\nSubState: auto-restart")
                .unwrap();

        assert_eq!(
            status,
            StatusFlag::Installed | StatusFlag::Active | StatusFlag::Restarting
        );
    }

    #[test]
    fn test_not_installed_service() {
        let status =
            decode_status("LoadState=not-found\nActiveState=inactive\nSubState=dead").unwrap();

        assert_eq!(status, ComponentStatus::from(StatusFlag::Dead));
    }

    #[test]
    fn test_unknown_sub_state() {
        let status =
            decode_status("LoadState=loaded\nActiveState=failed\nSubState=failed").unwrap();

        assert_eq!(status, StatusFlag::Installed | StatusFlag::Unknown);
    }

    #[test]
    fn test_empty_output_is_unknown() {
        let status = decode_status("").unwrap();
        assert_eq!(status, ComponentStatus::from(StatusFlag::Unknown));
    }

    #[test]
    fn test_exactly_one_sub_state() {
        for sub in ["running", "auto-restart", "dead", "exited", "start-pre", ""] {
            for load in ["loaded", "not-found", "masked"] {
                for active in ["active", "activating", "inactive", "failed"] {
                    let raw = format!("LoadState={load}\nActiveState={active}\nSubState={sub}");
                    let status = decode_status(&raw).unwrap();

                    let set = sub_states(status);
                    assert_eq!(set.len(), 1, "{raw:?} decoded to {status:?}");

                    let expect_unknown = !matches!(sub, "running" | "auto-restart" | "dead");
                    assert_eq!(set[0] == StatusFlag::Unknown, expect_unknown);

                    assert_eq!(status.contains(StatusFlag::Installed), load == "loaded");
                    assert_eq!(
                        status.contains(StatusFlag::Active),
                        active == "active" || active == "activating"
                    );
                }
            }
        }
    }

    #[test]
    fn test_decode_is_idempotent() {
        let raw = "LoadState=loaded\nActiveState=active\nSubState=running";
        assert_eq!(decode_status(raw).unwrap(), decode_status(raw).unwrap());
    }

    #[test]
    fn test_malformed_output() {
        let raw = "- not\n- a map";
        match decode_status(raw) {
            Err(Error::ParseError { raw: got, .. }) => assert_eq!(got, raw),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_value_rejected() {
        let raw = "LoadState:\n  nested: value";
        assert!(matches!(
            decode_status(raw),
            Err(Error::ParseError { .. })
        ));
    }

    #[test]
    fn test_values_with_separators() {
        let status =
            decode_status("LoadState=loaded\nDescription=Docker: engine=ce\nSubState=running")
                .unwrap();
        assert_eq!(status, StatusFlag::Installed | StatusFlag::Running);
    }

    #[test]
    fn test_status_command() {
        assert_eq!(
            show_status_command("docker"),
            "systemctl show docker -p LoadState,ActiveState,SubState"
        );
    }
}
