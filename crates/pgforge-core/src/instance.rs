//! Per-node instance identification (§6, §9).
//!
//! Every in-process job name and audit row installed by this node is
//! suffixed with its instance id so crashed-node residue can be
//! purged on recovery without disturbing rows owned by other nodes.
//! The suffix is `hostname + 4-byte hex digest of hostname`; MD5 is
//! used for its length, not for any security property.

use md5::{Digest, Md5};

/// Resolve this process's host name, falling back to a fixed sentinel
/// when the platform can't provide one (containers without `/etc/hostname`,
/// sandboxes, etc). Never panics.
pub fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Compute the stable per-node instance id used to suffix job and
/// audit row names: `{hostname}-{4_byte_md5_hex}`.
pub fn instance_id() -> String {
    instance_id_for(&local_host_name())
}

fn instance_id_for(hostname: &str) -> String {
    let digest = Md5::digest(hostname.as_bytes());
    let short = hex::encode(&digest[..4]);
    format!("{hostname}-{short}")
}

/// Suffix a logical job name with this node's instance id, giving the
/// convention described in §6:
/// `<logical-name>-<hostname>-<4-byte-md5-hex>`.
pub fn suffixed_job_name(logical_name: &str, instance_id: &str) -> String {
    format!("{logical_name}-{instance_id}")
}
