pub const SPBV10: &str = "spBv1.0";

pub const BDSEQ: &str = "bdSeq";

pub const NBIRTH: &str = "NBIRTH";
pub const NDEATH: &str = "NDEATH";
pub const NDATA: &str = "NDATA";
pub const NCMD: &str = "NCMD";

pub const DBIRTH: &str = "DBIRTH";
pub const DDEATH: &str = "DDEATH";
pub const DDATA: &str = "DDATA";
pub const DCMD: &str = "DCMD";

pub const STATE: &str = "STATE";

pub const STATE_ONLINE: &str = "ONLINE";
pub const STATE_OFFLINE: &str = "OFFLINE";

/// Birth metric name prefixes identifying the group a metric belongs to
pub const ATTR_PREFIX: &str = "ATTR/";
pub const DATA_PREFIX: &str = "DATA/";
pub const CMD_PREFIX: &str = "CMD/";
