//! Device architecture names used by skip policies.

/// Architecture reported by host-emulated backends.
pub const HOST_ARCH: &str = "host";

/// Architectures the composable-kernel batch-norm paths are enabled for.
pub const CK_ARCHITECTURES: &[&str] = &[
    "gfx803", "gfx900", "gfx906", "gfx908", "gfx90a", "gfx940", "gfx941", "gfx942", "gfx950",
    "gfx1030", "gfx1100", "gfx1101", "gfx1102", "gfx1200", "gfx1201",
];

/// Strips target feature suffixes (`gfx90a:sramecc+:xnack-` -> `gfx90a`).
pub fn base_arch(name: &str) -> &str {
    name.split(':').next().unwrap_or(name).trim()
}
