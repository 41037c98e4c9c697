//! CRI-O drop-in rendering
//!
//! The drop-in registers the Kata runtime handler with CRI-O. It is embedded
//! base64-encoded in the MachineConfig so the Machine Config Operator can
//! write it to every node of the pool.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Error, Result};

/// Path of the drop-in on the host
pub const CRIO_DROPIN_PATH: &str = "/etc/crio/crio.conf.d/50-kata.conf";

/// Placeholder replaced by the runtime handler name
pub const RUNTIME_NAME_PLACEHOLDER: &str = "{{runtime_name}}";

pub const CRIO_DROPIN_TEMPLATE: &str = r#"
[crio.runtime]
  manage_ns_lifecycle = true

[crio.runtime.runtimes.{{runtime_name}}]
  runtime_path = "/usr/bin/containerd-shim-kata-v2"
  runtime_type = "vm"
  runtime_root = "/run/vc"

[crio.runtime.runtimes.runc]
  runtime_path = ""
  runtime_type = "oci"
  runtime_root = "/run/runc"
"#;

/// Render the drop-in for `runtime_name`.
///
/// The name becomes a bare TOML table key, so it must be a non-empty DNS-1123
/// label.
pub fn render_crio_dropin(runtime_name: &str) -> Result<String> {
    validate_runtime_name(runtime_name)?;
    if !CRIO_DROPIN_TEMPLATE.contains(RUNTIME_NAME_PLACEHOLDER) {
        return Err(Error::TemplateError(
            "template has no runtime name placeholder".to_string(),
        ));
    }
    Ok(CRIO_DROPIN_TEMPLATE.replace(RUNTIME_NAME_PLACEHOLDER, runtime_name))
}

/// Render the drop-in and encode it for embedding in an Ignition file source
pub fn encoded_crio_dropin(runtime_name: &str) -> Result<String> {
    render_crio_dropin(runtime_name).map(|text| STANDARD.encode(text.as_bytes()))
}

fn validate_runtime_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(Error::TemplateError(format!(
            "runtime name {name:?} must be 1-63 characters"
        )));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(Error::TemplateError(format!(
            "runtime name {name:?} is not a valid DNS-1123 label"
        )));
    }
    Ok(())
}
