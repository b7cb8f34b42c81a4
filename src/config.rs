use std::path::PathBuf;

/// Top-level configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub firecracker_bin: PathBuf,
    pub max_sandboxes: usize,
    pub memory_budget_mib: u64,
    pub default_memory_mib: u64,
    pub min_memory_mib: u64,
    pub max_memory_mib: u64,
    pub default_vcpu: u64,
    pub min_vcpu: u64,
    pub max_vcpu: u64,
    pub boot_timeout_s: u64,
    pub exec_timeout_s: u64,
    /// Running sandboxes idle longer than this are reaped. 0 disables.
    pub idle_timeout_s: u64,
    pub api_key: Option<String>,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables with defaults matching
    /// the original deployment.
    pub fn from_env() -> Self {
        let base_dir = PathBuf::from(
            std::env::var("WORKSPACE_BASE_DIR")
                .unwrap_or_else(|_| "/var/lib/firecracker-workspaces".to_string()),
        );

        let firecracker_bin = PathBuf::from(
            std::env::var("FIRECRACKER_BIN").unwrap_or_else(|_| "/usr/bin/firecracker".to_string()),
        );

        let host_reserved_mib = env_u64("HOST_RESERVED_MEMORY_MB", 4096);
        let memory_budget_mib = std::env::var("MEMORY_BUDGET_MIB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| default_memory_budget_mib(host_reserved_mib));

        Self {
            base_dir,
            firecracker_bin,
            max_sandboxes: env_u64("MAX_SANDBOXES", 20) as usize,
            memory_budget_mib,
            default_memory_mib: env_u64("DEFAULT_MEMORY_MB", 512),
            min_memory_mib: env_u64("MIN_MEMORY_MB", 256),
            max_memory_mib: env_u64("MAX_MEMORY_MB", 2048),
            default_vcpu: env_u64("DEFAULT_VCPU_COUNT", 1),
            min_vcpu: env_u64("MIN_VCPU_COUNT", 1),
            max_vcpu: env_u64("MAX_VCPU_COUNT", 4),
            boot_timeout_s: env_u64("VM_BOOT_TIMEOUT", 30),
            exec_timeout_s: env_u64("COMMAND_DEFAULT_TIMEOUT", 300),
            idle_timeout_s: env_u64("IDLE_TIMEOUT_S", 0),
            api_key: std::env::var("API_KEY").ok().filter(|s| !s.is_empty()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        }
    }

    /// Validate configuration and return a list of errors.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.min_memory_mib > self.max_memory_mib {
            errors.push(format!(
                "MIN_MEMORY_MB ({}) > MAX_MEMORY_MB ({})",
                self.min_memory_mib, self.max_memory_mib
            ));
        }
        if self.default_memory_mib < self.min_memory_mib
            || self.default_memory_mib > self.max_memory_mib
        {
            errors.push(format!(
                "DEFAULT_MEMORY_MB ({}) outside [{}, {}]",
                self.default_memory_mib, self.min_memory_mib, self.max_memory_mib
            ));
        }
        if self.min_vcpu > self.max_vcpu {
            errors.push(format!(
                "MIN_VCPU_COUNT ({}) > MAX_VCPU_COUNT ({})",
                self.min_vcpu, self.max_vcpu
            ));
        }
        if self.default_vcpu < self.min_vcpu || self.default_vcpu > self.max_vcpu {
            errors.push(format!(
                "DEFAULT_VCPU_COUNT ({}) outside [{}, {}]",
                self.default_vcpu, self.min_vcpu, self.max_vcpu
            ));
        }
        if self.max_sandboxes < 1 {
            errors.push(format!(
                "MAX_SANDBOXES ({}) must be >= 1",
                self.max_sandboxes
            ));
        }
        if !self.firecracker_bin.exists() {
            errors.push(format!(
                "Firecracker binary not found: {}",
                self.firecracker_bin.display()
            ));
        }

        errors
    }

    /// Path to read-only kernel images: {base_dir}/kernels
    pub fn kernels_dir(&self) -> PathBuf {
        self.base_dir.join("kernels")
    }

    /// Path to read-only base rootfs images: {base_dir}/rootfs
    pub fn rootfs_dir(&self) -> PathBuf {
        self.base_dir.join("rootfs")
    }

    /// Path to per-sandbox working directories: {base_dir}/sandboxes
    pub fn sandboxes_dir(&self) -> PathBuf {
        self.base_dir.join("sandboxes")
    }

    /// Path to per-workspace snapshot directories: {base_dir}/snapshots
    pub fn snapshots_dir(&self) -> PathBuf {
        self.base_dir.join("snapshots")
    }

    /// Kernel image for a template: {kernels_dir}/{template}-vmlinux.bin
    pub fn kernel_path(&self, template: &str) -> PathBuf {
        self.kernels_dir().join(format!("{}-vmlinux.bin", template))
    }

    /// Base rootfs for a template: {rootfs_dir}/{template}-rootfs.ext4
    pub fn base_rootfs_path(&self, template: &str) -> PathBuf {
        self.rootfs_dir().join(format!("{}-rootfs.ext4", template))
    }

    /// Snapshot directory for a workspace: {snapshots_dir}/{workspace_id}
    pub fn snapshot_dir(&self, workspace_id: &str) -> PathBuf {
        self.snapshots_dir().join(workspace_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/lib/firecracker-workspaces"),
            firecracker_bin: PathBuf::from("/usr/bin/firecracker"),
            max_sandboxes: 20,
            memory_budget_mib: 16384 - 4096,
            default_memory_mib: 512,
            min_memory_mib: 256,
            max_memory_mib: 2048,
            default_vcpu: 1,
            min_vcpu: 1,
            max_vcpu: 4,
            boot_timeout_s: 30,
            exec_timeout_s: 300,
            idle_timeout_s: 0,
            api_key: None,
            port: 8080,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Total memory available for sandboxes: MemTotal minus the host reservation,
/// falling back to 16 GiB minus the reservation when /proc/meminfo is absent.
fn default_memory_budget_mib(host_reserved_mib: u64) -> u64 {
    let total = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                line.strip_prefix("MemTotal:")?
                    .split_whitespace()
                    .next()?
                    .parse::<u64>()
                    .ok()
                    .map(|kb| kb / 1024)
            })
        })
        .unwrap_or(16384);
    total.saturating_sub(host_reserved_mib)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        ENV_LOCK.lock().unwrap()
    }

    const VARS: &[&str] = &[
        "WORKSPACE_BASE_DIR",
        "FIRECRACKER_BIN",
        "MAX_SANDBOXES",
        "MEMORY_BUDGET_MIB",
        "HOST_RESERVED_MEMORY_MB",
        "DEFAULT_MEMORY_MB",
        "MIN_MEMORY_MB",
        "MAX_MEMORY_MB",
        "DEFAULT_VCPU_COUNT",
        "MIN_VCPU_COUNT",
        "MAX_VCPU_COUNT",
        "VM_BOOT_TIMEOUT",
        "COMMAND_DEFAULT_TIMEOUT",
        "IDLE_TIMEOUT_S",
        "API_KEY",
        "PORT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let _env = env_lock();
        clear_env();

        let cfg = Config::from_env();
        assert_eq!(
            cfg.base_dir,
            PathBuf::from("/var/lib/firecracker-workspaces")
        );
        assert_eq!(cfg.max_sandboxes, 20);
        assert_eq!(cfg.default_memory_mib, 512);
        assert_eq!(cfg.min_memory_mib, 256);
        assert_eq!(cfg.max_memory_mib, 2048);
        assert_eq!(cfg.default_vcpu, 1);
        assert_eq!(cfg.max_vcpu, 4);
        assert_eq!(cfg.boot_timeout_s, 30);
        assert_eq!(cfg.exec_timeout_s, 300);
        assert_eq!(cfg.idle_timeout_s, 0);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_derived_paths() {
        let mut cfg = Config::default();
        cfg.base_dir = PathBuf::from("/tmp/test-ws");

        assert_eq!(cfg.kernels_dir(), PathBuf::from("/tmp/test-ws/kernels"));
        assert_eq!(cfg.rootfs_dir(), PathBuf::from("/tmp/test-ws/rootfs"));
        assert_eq!(cfg.sandboxes_dir(), PathBuf::from("/tmp/test-ws/sandboxes"));
        assert_eq!(cfg.snapshots_dir(), PathBuf::from("/tmp/test-ws/snapshots"));
        assert_eq!(
            cfg.kernel_path("default"),
            PathBuf::from("/tmp/test-ws/kernels/default-vmlinux.bin")
        );
        assert_eq!(
            cfg.base_rootfs_path("default"),
            PathBuf::from("/tmp/test-ws/rootfs/default-rootfs.ext4")
        );
        assert_eq!(
            cfg.snapshot_dir("ws-1"),
            PathBuf::from("/tmp/test-ws/snapshots/ws-1")
        );
    }

    #[test]
    fn test_custom_budget() {
        let _env = env_lock();
        clear_env();
        std::env::set_var("MEMORY_BUDGET_MIB", "8192");
        let cfg = Config::from_env();
        assert_eq!(cfg.memory_budget_mib, 8192);
        std::env::remove_var("MEMORY_BUDGET_MIB");
    }

    #[test]
    fn test_empty_api_key_is_none() {
        let _env = env_lock();
        clear_env();
        std::env::set_var("API_KEY", "");
        assert!(Config::from_env().api_key.is_none());

        std::env::set_var("API_KEY", "secret");
        assert_eq!(Config::from_env().api_key.as_deref(), Some("secret"));
        std::env::remove_var("API_KEY");
    }

    #[test]
    fn test_validate_inverted_memory_bounds() {
        let mut cfg = Config::default();
        cfg.min_memory_mib = 4096;
        cfg.max_memory_mib = 1024;
        cfg.default_memory_mib = 512;

        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("MIN_MEMORY_MB")));
        assert!(errors.iter().any(|e| e.contains("DEFAULT_MEMORY_MB")));
    }

    #[test]
    fn test_validate_vcpu_bounds() {
        let mut cfg = Config::default();
        cfg.default_vcpu = 8;

        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("DEFAULT_VCPU_COUNT")));
    }

    #[test]
    fn test_validate_zero_max_sandboxes() {
        let mut cfg = Config::default();
        cfg.max_sandboxes = 0;

        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("MAX_SANDBOXES")));
    }

    #[test]
    fn test_invalid_numeric_fields_use_defaults() {
        let _env = env_lock();
        clear_env();
        std::env::set_var("MAX_SANDBOXES", "xyz");
        std::env::set_var("PORT", "not-a-port");

        let cfg = Config::from_env();
        assert_eq!(cfg.max_sandboxes, 20);
        assert_eq!(cfg.port, 8080);

        std::env::remove_var("MAX_SANDBOXES");
        std::env::remove_var("PORT");
    }
}
