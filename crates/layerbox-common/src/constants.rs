//! System-wide constants and default paths.

/// Default base directory for layerbox images and containers.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/layerbox";

/// Name of the configuration file looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Directory under each cgroup subsystem that groups layerbox containers.
pub const CGROUP_GROUP: &str = "layerbox";

/// Run directory for named network namespaces, shared with iproute2.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// Sysfs directory listing host network links.
pub const SYSFS_NET_DIR: &str = "/sys/class/net";

/// Name of the host bridge that container veth pairs attach to.
pub const DEFAULT_BRIDGE: &str = "lbx0";

/// Prefix for named network namespaces.
pub const NETNS_PREFIX: &str = "lbx_";

/// Number of container ID characters used to derive namespace and link names.
pub const ID_PREFIX_LEN: usize = 8;

/// Default CFS period in microseconds.
pub const DEFAULT_CPU_PERIOD_US: u64 = 100_000;

/// Mask that rounds a byte count down to a 4 KiB page boundary.
pub const PAGE_MASK: u64 = !0xFFF;

/// Sentinel stored in an image's `parent` file when it has no parent.
pub const NO_PARENT: &str = "none";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image chain.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// `PATH` handed to container processes.
pub const CONTAINER_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Exit status of an init process whose setup failed before exec.
pub const EXIT_SETUP_FAILED: i32 = 1;

/// Exit status of a process whose command could not be executed.
pub const EXIT_EXEC_FAILED: i32 = 127;

/// Application name used in CLI output.
pub const APP_NAME: &str = "layerbox";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "lbx";
