//! Hard caps. A single process owns the in-memory room state for every
//! active tenant, so these bound worst-case memory and task counts.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_ROOMS_PER_TENANT: usize = 256;
