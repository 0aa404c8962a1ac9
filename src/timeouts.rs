pub mod ms {
    pub const IDLE_QUIET: u64 = 10_000;
    pub const RESOURCE: u64 = 10_000;
    pub const RESOLVE: u64 = 3_000;
}

pub mod secs {
    pub const MAX_SCAN: u64 = 120;
    pub const REQUEST: u64 = 30;
}
