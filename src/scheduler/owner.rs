//! Lock Owner Identity
//!
//! Every scheduler instance stamps the locks it takes in the metadata store
//! with an owner string `host:tid:time:counter`. For the owner name to
//! collide, either the thread id or the instance counter would have to loop
//! within one second. Each segment is width-limited so the whole identifier
//! never exceeds 256 bytes.

use crate::error::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-local monotone counter, one tick per generated identity.
static OWNER_COUNTER: AtomicU64 = AtomicU64::new(0);

static HOSTNAME: OnceLock<String> = OnceLock::new();

// =============================================================================
// Lock Owner
// =============================================================================

/// Identity under which one scheduler instance takes shared locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner(String);

impl LockOwner {
    /// Build a fresh identity for this instance.
    pub fn generate() -> Result<Self> {
        let host = host_short_name()?;
        let tid = thread_token();
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let counter = OWNER_COUNTER.fetch_add(1, Ordering::SeqCst);

        // 213 + 1 + 8 + 1 + 16 + 1 + 16 = 256 bytes at most
        let host = &host[..host.len().min(213)];
        Ok(Self(format!("{host}:{tid:08x}:{secs:016x}:{counter:016x}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric token for the current thread, stable for its lifetime.
fn thread_token() -> u32 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

// =============================================================================
// Hostname
// =============================================================================

/// The host's short name (domain part stripped), cached for the process.
pub fn host_short_name() -> Result<String> {
    if let Some(name) = HOSTNAME.get() {
        return Ok(name.clone());
    }

    let name = read_hostname()?;
    let short = name.split('.').next().unwrap_or(&name).to_string();
    Ok(HOSTNAME.get_or_init(|| short).clone())
}

fn read_hostname() -> Result<String> {
    // Try /etc/hostname first
    if let Ok(hostname) = std::fs::read_to_string("/etc/hostname") {
        let trimmed = hostname.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    // Fall back to the hostname command
    #[cfg(unix)]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("hostname").output() {
            if output.status.success() {
                let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !name.is_empty() {
                    return Ok(name);
                }
            }
        }
    }

    Err(Error::Configuration("cannot determine hostname".into()))
}

/// Host segment of a persisted lock owner string.
pub fn owner_hostname(owner: &str) -> Option<&str> {
    let host = owner.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
