//! Architecture gating evaluated before a test instance touches the device.

use bnorm::arch::{base_arch, CK_ARCHITECTURES, HOST_ARCH};
use bnorm::BatchNormBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Run only on the listed architectures (feature suffixes ignored).
    ArchWhitelist(Vec<String>),
    RunAll,
}

impl SkipPolicy {
    /// Composable-kernel architectures plus the host emulation architecture.
    pub fn default_whitelist() -> Self {
        let mut archs: Vec<String> = CK_ARCHITECTURES.iter().map(|a| a.to_string()).collect();
        archs.push(HOST_ARCH.to_string());
        SkipPolicy::ArchWhitelist(archs)
    }

    /// `BNORM_ARCH_WHITELIST` replaces the default whitelist when set.
    pub fn from_env() -> Self {
        match bnorm::env::arch_whitelist_override() {
            Some(archs) => SkipPolicy::ArchWhitelist(archs.to_vec()),
            None => Self::default_whitelist(),
        }
    }

    /// Returns the skip reason for the device behind `backend`, if any.
    pub fn check<B: BatchNormBackend + ?Sized>(&self, backend: &B) -> Option<String> {
        match self {
            SkipPolicy::RunAll => None,
            SkipPolicy::ArchWhitelist(archs) => {
                let arch = backend.device_arch();
                let base = base_arch(&arch);
                if archs.iter().any(|allowed| base_arch(allowed) == base) {
                    None
                } else {
                    Some(format!(
                        "device {} ({arch}) is not in the architecture whitelist",
                        backend.device_name()
                    ))
                }
            }
        }
    }
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::default_whitelist()
    }
}
