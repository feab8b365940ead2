//! Patient-to-room dispatch and live-queue notification core of a
//! multi-tenant clinic operations backend. Routes waiting patients to the
//! least-loaded examination room, drains each room's queue with a dedicated
//! worker, and pushes queue snapshots to suspended long-poll clients.

pub mod dispatch;
pub mod error;
pub mod hub;
pub mod limits;
pub mod model;
pub mod observability;
pub mod occupancy;
pub mod tenant;
