//! IPVS generic netlink commands and attribute definitions.
//!
//! Values match the kernel ABI in include/uapi/linux/ip_vs.h and must be
//! reproduced exactly.

/// IPVS generic netlink commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpvsCommand {
    /// Add a new virtual service
    NewService = 1,
    /// Modify an existing virtual service
    SetService = 2,
    /// Delete a virtual service
    DelService = 3,
    /// Get virtual service information (dump with NLM_F_DUMP)
    GetService = 4,
    /// Add a new destination to a service
    NewDest = 5,
    /// Modify an existing destination
    SetDest = 6,
    /// Delete a destination from a service
    DelDest = 7,
    /// Get destination information (dump with NLM_F_DUMP)
    GetDest = 8,
    /// Add a new sync daemon
    NewDaemon = 9,
    /// Delete a sync daemon
    DelDaemon = 10,
    /// Get sync daemon information
    GetDaemon = 11,
    /// Set timeout configuration
    SetConfig = 12,
    /// Get timeout configuration
    GetConfig = 13,
    /// Reply command used by the kernel for GET_INFO responses
    SetInfo = 14,
    /// Get IPVS version and connection table size
    GetInfo = 15,
    /// Zero counters
    Zero = 16,
    /// Flush all virtual services
    Flush = 17,
}

impl IpvsCommand {
    pub fn from_raw(cmd: u8) -> Option<Self> {
        Some(match cmd {
            1 => Self::NewService,
            2 => Self::SetService,
            3 => Self::DelService,
            4 => Self::GetService,
            5 => Self::NewDest,
            6 => Self::SetDest,
            7 => Self::DelDest,
            8 => Self::GetDest,
            9 => Self::NewDaemon,
            10 => Self::DelDaemon,
            11 => Self::GetDaemon,
            12 => Self::SetConfig,
            13 => Self::GetConfig,
            14 => Self::SetInfo,
            15 => Self::GetInfo,
            16 => Self::Zero,
            17 => Self::Flush,
            _ => return None,
        })
    }
}

impl From<IpvsCommand> for u8 {
    fn from(cmd: IpvsCommand) -> u8 {
        cmd as u8
    }
}

/// Top-level IPVS command attributes.
pub const IPVS_CMD_ATTR_SERVICE: u16 = 1;
pub const IPVS_CMD_ATTR_DEST: u16 = 2;
pub const IPVS_CMD_ATTR_DAEMON: u16 = 3;

/// Service attributes (nested under IPVS_CMD_ATTR_SERVICE).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvcAttrType {
    /// Address family (AF_INET or AF_INET6), u16
    AddressFamily = 1,
    /// IP protocol (IPPROTO_TCP, IPPROTO_UDP, ...), u16
    Protocol = 2,
    /// Virtual address, 4 or 16 raw bytes by family
    Address = 3,
    /// Virtual port, big-endian u16
    Port = 4,
    /// Firewall mark, u32
    FirewallMark = 5,
    /// Scheduler name, NUL-terminated string
    Scheduler = 6,
    /// Flags and mask, two u32 values
    Flags = 7,
    /// Persistence timeout, u32
    Timeout = 8,
    /// Network mask for persistence
    Netmask = 9,
    /// Service statistics (nested, read-only)
    Stats = 10,
    /// Persistence engine name
    PersistenceEngine = 11,
}

/// Destination attributes (nested under IPVS_CMD_ATTR_DEST).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestAttrType {
    /// Destination address, 4 or 16 raw bytes by family
    Address = 1,
    /// Destination port, big-endian u16
    Port = 2,
    /// Forwarding method, u32
    ForwardingMethod = 3,
    /// Weight, i32
    Weight = 4,
    /// Upper connection threshold
    UpperThreshold = 5,
    /// Lower connection threshold
    LowerThreshold = 6,
    /// Active connection count (read-only)
    ActiveConns = 7,
    /// Inactive connection count (read-only)
    InactiveConns = 8,
    /// Persistent connection count (read-only)
    PersistConns = 9,
    /// Destination statistics (nested, read-only)
    Stats = 10,
    /// Destination address family, u16 (newer kernels)
    AddressFamily = 11,
}

/// Info attributes (top-level in GET_INFO replies).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoAttrType {
    /// IPVS version, packed u32
    Version = 1,
    /// Connection table size
    ConnTableSize = 2,
}

/// Forwarding method codes (IP_VS_CONN_F_* & IP_VS_CONN_F_FWD_MASK).
pub const IPVS_FWD_MASQ: u32 = 0;
pub const IPVS_FWD_LOCALNODE: u32 = 1;
pub const IPVS_FWD_TUNNEL: u32 = 2;
pub const IPVS_FWD_DROUTE: u32 = 3;
pub const IPVS_FWD_BYPASS: u32 = 4;
